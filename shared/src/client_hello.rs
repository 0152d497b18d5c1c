//! ClientHello parsing for SNI sniffing.
//!
//! The entry node never terminates the inner TLS session; it only reads the
//! cleartext ClientHello to learn which backend the client asked for.
//!
//! ```text
//! Handshake:     msg_type(1) | length(3) | body
//! ClientHello:   legacy_version(2) | random(32) | session_id<0..32>
//!                | cipher_suites<2..2^16-2> | compression_methods<1..2^8-1>
//!                | extensions<0..2^16-1>   (optional)
//! Extension:     type(2) | data<0..2^16-1>
//! server_name:   server_name_list<1..2^16-1> of name_type(1) | host_name<1..2^16-1>
//! ```

use crate::cursor::Cursor;
use crate::record::Record;
use crate::{Error, Result};

pub const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

pub const EXT_SERVER_NAME: u16 = 0x0000;
pub const EXT_ALPN: u16 = 0x0010;

const NAME_TYPE_HOST_NAME: u8 = 0x00;

/// legacy_version(2) + random(32)
const FIXED_BODY_LEN: usize = 34;

/// Borrowed view over a ClientHello carried in a single handshake record.
#[derive(Debug, Clone)]
pub struct ClientHello<'a> {
    pub legacy_version: u16,
    pub random: &'a [u8],
    pub session_id: &'a [u8],
    cipher_suites: &'a [u8],
    pub compression_methods: &'a [u8],
    extensions: Option<&'a [u8]>,
}

impl<'a> ClientHello<'a> {
    pub fn parse(record: &'a Record) -> Result<Self> {
        if !record.is_handshake() {
            return Err(Error::NotHandshake(record.content_type()));
        }

        let mut hs = Cursor::new(record.payload());
        let msg_type = hs.u8("handshake type")?;
        if msg_type != HANDSHAKE_TYPE_CLIENT_HELLO {
            return Err(Error::NotClientHello(msg_type));
        }

        let declared = hs.u24("handshake length")? as usize;
        if declared > hs.remaining() {
            return Err(Error::InvalidLength {
                field: "handshake",
                declared,
                remaining: hs.remaining(),
            });
        }
        let body = hs.take(declared, "handshake body")?;
        if body.len() < FIXED_BODY_LEN {
            return Err(Error::BodyTooShort(body.len()));
        }

        let mut c = Cursor::new(body);
        let legacy_version = c.u16("legacy_version")?;
        let random = c.take(32, "random")?;
        let session_id = c.prefixed(1, "session_id")?;
        let cipher_suites = c.prefixed(2, "cipher_suites")?;
        let compression_methods = c.prefixed(1, "compression_methods")?;

        // No extensions block at all is legal and simply means no SNI.
        let extensions = if c.is_empty() {
            None
        } else {
            Some(c.prefixed(2, "extensions").map_err(|e| match e {
                Error::Truncated {
                    needed, remaining, ..
                } => Error::ExtensionsTruncated { needed, remaining },
                Error::InvalidLength {
                    declared,
                    remaining,
                    ..
                } => Error::ExtensionsTruncated {
                    needed: declared,
                    remaining,
                },
                other => other,
            })?)
        };

        Ok(Self {
            legacy_version,
            random,
            session_id,
            cipher_suites,
            compression_methods,
            extensions,
        })
    }

    pub fn cipher_suites(&self) -> impl Iterator<Item = u16> + 'a {
        self.cipher_suites
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
    }

    pub fn has_extensions(&self) -> bool {
        self.extensions.is_some()
    }

    /// Walk the extensions block. Iteration ends quietly at the first entry
    /// whose declared length overruns the block.
    pub fn extensions(&self) -> Extensions<'a> {
        Extensions {
            cursor: Cursor::new(self.extensions.unwrap_or(&[])),
        }
    }

    /// First `host_name` entry of the first usable `server_name` extension.
    pub fn server_name(&self) -> Result<String> {
        for ext in self.extensions() {
            if ext.kind != EXT_SERVER_NAME {
                continue;
            }
            if let Some(host) = parse_server_name(ext.data)? {
                return Ok(host);
            }
        }
        Err(Error::SniNotFound)
    }

    /// ALPN protocol names, empty if absent or malformed.
    pub fn alpn_protocols(&self) -> Vec<String> {
        let Some(ext) = self.extensions().find(|e| e.kind == EXT_ALPN) else {
            return Vec::new();
        };
        let mut outer = Cursor::new(ext.data);
        let Ok(list) = outer.prefixed(2, "alpn list") else {
            return Vec::new();
        };

        let mut protocols = Vec::new();
        let mut c = Cursor::new(list);
        while !c.is_empty() {
            match c.prefixed(1, "alpn protocol") {
                Ok(name) => protocols.push(String::from_utf8_lossy(name).into_owned()),
                Err(_) => break,
            }
        }
        protocols
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extension<'a> {
    pub kind: u16,
    pub data: &'a [u8],
}

pub struct Extensions<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Iterator for Extensions<'a> {
    type Item = Extension<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.remaining() < 4 {
            return None;
        }
        let kind = self.cursor.u16("extension type").ok()?;
        match self.cursor.prefixed(2, "extension data") {
            Ok(data) => Some(Extension { kind, data }),
            Err(_) => {
                // Malformed tail: stop walking rather than fail the sniff
                self.cursor = Cursor::new(&[]);
                None
            }
        }
    }
}

/// Decode the first entry of a server_name list.
///
/// `Ok(None)` when the entry is not a usable hostname, so the caller keeps
/// scanning.
fn parse_server_name(data: &[u8]) -> Result<Option<String>> {
    let mut ext = Cursor::new(data);
    let list = ext.prefixed(2, "server_name list")?;

    let mut entry = Cursor::new(list);
    let name_type = entry.u8("server_name type")?;
    let name = entry.prefixed(2, "host_name")?;

    if name_type != NAME_TYPE_HOST_NAME || name.is_empty() {
        return Ok(None);
    }
    Ok(std::str::from_utf8(name).ok().map(str::to_owned))
}

/// Extract the SNI hostname from a captured first record.
pub fn extract_sni(record: &Record) -> Result<String> {
    ClientHello::parse(record)?.server_name()
}
