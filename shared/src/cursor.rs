//! Bounds-checked reader over a borrowed byte slice.
//!
//! Every length-prefixed TLS field goes through [`Cursor::prefixed`], so the
//! "declared length vs. what is left" check lives in exactly one place.

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unread tail of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Take exactly `n` bytes.
    pub fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(Error::Truncated {
                field,
                needed: n,
                remaining,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize, field: &'static str) -> Result<()> {
        self.take(n, field).map(|_| ())
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    pub fn u16(&mut self, field: &'static str) -> Result<u16> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24(&mut self, field: &'static str) -> Result<u32> {
        let b = self.take(3, field)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    /// Read a big-endian length of `width` bytes (1..=3), then exactly that
    /// many bytes of content.
    ///
    /// A missing length prefix is `Truncated`; a declared length that
    /// overruns the buffer is `InvalidLength` and leaves the cursor just past
    /// the prefix.
    pub fn prefixed(&mut self, width: usize, field: &'static str) -> Result<&'a [u8]> {
        let declared = match width {
            1 => self.u8(field)? as usize,
            2 => self.u16(field)? as usize,
            3 => self.u24(field)? as usize,
            _ => unreachable!("length prefix width must be 1, 2 or 3"),
        };
        let remaining = self.remaining();
        if declared > remaining {
            return Err(Error::InvalidLength {
                field,
                declared,
                remaining,
            });
        }
        self.take(declared, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_reads() {
        let mut c = Cursor::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(c.u8("a").unwrap(), 0x01);
        assert_eq!(c.u16("b").unwrap(), 0x0203);
        assert_eq!(c.u24("c").unwrap(), 0x040506);
        assert!(c.is_empty());
    }

    #[test]
    fn test_truncated_fixed_read() {
        let mut c = Cursor::new(&[0xff]);
        match c.u16("cipher_suites length") {
            Err(Error::Truncated {
                field,
                needed,
                remaining,
            }) => {
                assert_eq!(field, "cipher_suites length");
                assert_eq!(needed, 2);
                assert_eq!(remaining, 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
        // Failed read does not advance
        assert_eq!(c.remaining(), 1);
    }

    #[test]
    fn test_prefixed() {
        let mut c = Cursor::new(&[0x00, 0x03, b'a', b'b', b'c', 0x7f]);
        assert_eq!(c.prefixed(2, "x").unwrap(), b"abc");
        assert_eq!(c.rest(), &[0x7f]);
    }

    #[test]
    fn test_prefixed_overrun_is_invalid_length() {
        let mut c = Cursor::new(&[0x05, 0x00, 0x00]);
        match c.prefixed(1, "session_id") {
            Err(Error::InvalidLength {
                declared,
                remaining,
                ..
            }) => {
                assert_eq!(declared, 5);
                assert_eq!(remaining, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_prefixed_zero_length() {
        let mut c = Cursor::new(&[0x00]);
        assert!(c.prefixed(1, "empty").unwrap().is_empty());
        assert!(c.is_empty());
    }
}
