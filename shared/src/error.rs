//! Error types for OI-TLS.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Not enough bytes for a fixed-size field or a length prefix.
    #[error("truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// A declared length does not fit in what remains of its container.
    #[error("invalid length for {field}: declared {declared}, {remaining} remaining")]
    InvalidLength {
        field: &'static str,
        declared: usize,
        remaining: usize,
    },

    #[error("not a handshake record (content type 0x{0:02x})")]
    NotHandshake(u8),

    #[error("not a ClientHello (handshake type 0x{0:02x})")]
    NotClientHello(u8),

    #[error("ClientHello body too short: {0} bytes")]
    BodyTooShort(usize),

    /// The extensions length field, or the block it declares, runs past the
    /// end of the ClientHello body.
    #[error("extensions block truncated: need {needed} bytes, {remaining} remaining")]
    ExtensionsTruncated { needed: usize, remaining: usize },

    #[error("server_name not found")]
    SniNotFound,

    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("outer dial: {0}")]
    OuterDial(#[source] std::io::Error),

    #[error("inner handshake: {0}")]
    InnerHandshake(#[source] std::io::Error),

    #[error("write request: {0}")]
    WriteRequest(#[source] std::io::Error),

    #[error("read response: {0}")]
    ReadResponse(#[source] Box<Error>),

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("timeout: {0}")]
    Timeout(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
