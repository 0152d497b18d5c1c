//! TLS record framing.
//!
//! Only the record boundary is interpreted: content type and version are
//! carried through untouched so the captured bytes can be replayed verbatim.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

/// content_type(1) + version(2) + length(2)
pub const RECORD_HEADER_LEN: usize = 5;

pub const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

/// One TLS record, header and payload kept together as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    bytes: Vec<u8>,
}

impl Record {
    /// Frame one record from the front of `buf`.
    ///
    /// Returns the record and the number of bytes it occupied.
    pub fn parse(buf: &[u8]) -> Result<(Record, usize)> {
        if buf.len() < RECORD_HEADER_LEN {
            return Err(Error::Truncated {
                field: "record header",
                needed: RECORD_HEADER_LEN,
                remaining: buf.len(),
            });
        }
        let len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
        let total = RECORD_HEADER_LEN + len;
        if buf.len() < total {
            return Err(Error::Truncated {
                field: "record payload",
                needed: len,
                remaining: buf.len() - RECORD_HEADER_LEN,
            });
        }
        Ok((
            Record {
                bytes: buf[..total].to_vec(),
            },
            total,
        ))
    }

    pub fn content_type(&self) -> u8 {
        self.bytes[0]
    }

    pub fn version(&self) -> u16 {
        u16::from_be_bytes([self.bytes[1], self.bytes[2]])
    }

    /// Length field from the header; always equals `payload().len()`.
    pub fn payload_len(&self) -> usize {
        u16::from_be_bytes([self.bytes[3], self.bytes[4]]) as usize
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[RECORD_HEADER_LEN..]
    }

    pub fn is_handshake(&self) -> bool {
        self.content_type() == CONTENT_TYPE_HANDSHAKE
    }

    /// Header plus payload, exactly as read.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn wire_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Read exactly one record from `reader`.
///
/// Never reads past the record boundary, so whatever follows stays in the
/// stream for the caller. End of stream before the record is complete is
/// `Truncated`.
pub async fn read_record<R>(reader: &mut R) -> Result<Record>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; RECORD_HEADER_LEN];
    let got = read_full(reader, &mut header).await?;
    if got < RECORD_HEADER_LEN {
        return Err(Error::Truncated {
            field: "record header",
            needed: RECORD_HEADER_LEN,
            remaining: got,
        });
    }

    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut bytes = vec![0u8; RECORD_HEADER_LEN + len];
    bytes[..RECORD_HEADER_LEN].copy_from_slice(&header);

    let got = read_full(reader, &mut bytes[RECORD_HEADER_LEN..]).await?;
    if got < len {
        return Err(Error::Truncated {
            field: "record payload",
            needed: len,
            remaining: got,
        });
    }

    Ok(Record { bytes })
}

/// Fill `buf` until full or EOF; returns how many bytes arrived.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn record_bytes(content_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![content_type, 0x03, 0x01];
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_read_record_roundtrip_identity() {
        let payload: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        let wire = record_bytes(CONTENT_TYPE_HANDSHAKE, &payload);

        let mut reader = &wire[..];
        let record = read_record(&mut reader).await.unwrap();

        assert_eq!(record.payload_len(), 300);
        assert_eq!(record.payload(), &payload[..]);
        assert_eq!(record.as_bytes(), &wire[..]);
        assert_eq!(record.version(), 0x0301);
        assert!(record.is_handshake());
    }

    #[tokio::test]
    async fn test_length_uses_both_bytes() {
        // 0x0102 = 258; a single-byte decode would stop at 2
        let payload = vec![0xaa; 0x0102];
        let wire = record_bytes(0x17, &payload);
        let mut reader = &wire[..];
        let record = read_record(&mut reader).await.unwrap();
        assert_eq!(record.payload_len(), 258);
        assert_eq!(record.wire_len(), 263);
    }

    #[tokio::test]
    async fn test_leaves_following_bytes_in_stream() {
        let mut wire = record_bytes(CONTENT_TYPE_HANDSHAKE, b"hello");
        wire.extend_from_slice(b"after");

        let mut reader = &wire[..];
        let record = read_record(&mut reader).await.unwrap();
        assert_eq!(record.payload(), b"hello");
        assert_eq!(reader, b"after");
    }

    #[tokio::test]
    async fn test_short_header_is_truncated() {
        for n in 0..RECORD_HEADER_LEN {
            let wire = [0x16u8, 0x03, 0x01, 0x00][..n.min(4)].to_vec();
            let mut reader = &wire[..];
            match read_record(&mut reader).await {
                Err(Error::Truncated { field, .. }) => assert_eq!(field, "record header"),
                other => panic!("len {}: unexpected {:?}", n, other),
            }
        }
    }

    #[tokio::test]
    async fn test_short_payload_is_truncated() {
        let wire = record_bytes(CONTENT_TYPE_HANDSHAKE, &[1, 2, 3, 4, 5, 6]);
        for cut in RECORD_HEADER_LEN..wire.len() {
            let mut reader = &wire[..cut];
            match read_record(&mut reader).await {
                Err(Error::Truncated {
                    field,
                    needed,
                    remaining,
                }) => {
                    assert_eq!(field, "record payload");
                    assert_eq!(needed, 6);
                    assert_eq!(remaining, cut - RECORD_HEADER_LEN);
                }
                other => panic!("cut {}: unexpected {:?}", cut, other),
            }
        }
    }

    #[tokio::test]
    async fn test_reads_across_partial_writes() {
        let wire = record_bytes(CONTENT_TYPE_HANDSHAKE, &[9u8; 64]);
        let (mut tx, mut rx) = tokio::io::duplex(8);
        let sent = wire.clone();
        let writer = tokio::spawn(async move {
            for chunk in sent.chunks(3) {
                tx.write_all(chunk).await.unwrap();
            }
        });
        let record = read_record(&mut rx).await.unwrap();
        writer.await.unwrap();
        assert_eq!(record.as_bytes(), &wire[..]);
    }

    #[test]
    fn test_parse_matches_stream_read() {
        let mut wire = record_bytes(0x15, &[2, 40]);
        wire.push(0xff);
        let (record, used) = Record::parse(&wire).unwrap();
        assert_eq!(used, 7);
        assert_eq!(record.content_type(), 0x15);
        assert_eq!(record.into_bytes(), wire[..7].to_vec());
    }

    #[test]
    fn test_parse_short_buffers() {
        let wire = record_bytes(CONTENT_TYPE_HANDSHAKE, &[0u8; 10]);
        for cut in 0..wire.len() {
            assert!(matches!(
                Record::parse(&wire[..cut]),
                Err(Error::Truncated { .. })
            ));
        }
    }
}
