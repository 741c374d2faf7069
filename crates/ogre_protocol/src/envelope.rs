//! Length-prefixed envelope framing.
//!
//! ```text
//! +-----------------+-------------------------+-----------------+
//! | magic "OGREv1"  | payload length (u32 BE) | payload bytes   |
//! | 6 bytes         | 4 bytes                 | length bytes    |
//! +-----------------+-------------------------+-----------------+
//! ```

use crate::error::{ProtocolError, ProtocolResult};
use std::io::{self, Read, Write};

/// Magic token opening every envelope.
pub const MAGIC: [u8; 6] = *b"OGREv1";

/// Size of the length prefix.
pub const LENGTH_LEN: usize = 4;

/// Size of magic plus length prefix.
pub const HEADER_LEN: usize = MAGIC.len() + LENGTH_LEN;

/// Default upper bound on a single payload (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Wraps a payload in an envelope.
///
/// # Errors
///
/// Returns `PayloadTooLarge` if the payload does not fit a `u32` length.
pub fn encode_envelope(payload: &[u8]) -> ProtocolResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&MAGIC);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Verifies the magic token.
pub fn check_magic(bytes: &[u8; 6]) -> ProtocolResult<()> {
    if *bytes == MAGIC {
        Ok(())
    } else {
        Err(ProtocolError::BadEnvelope { found: *bytes })
    }
}

/// Parses the length prefix, enforcing `max_payload_len`.
pub fn parse_length(bytes: [u8; LENGTH_LEN], max_payload_len: usize) -> ProtocolResult<usize> {
    let len = u32::from_be_bytes(bytes) as usize;
    if len > max_payload_len {
        return Err(ProtocolError::PayloadTooLarge {
            len,
            max: max_payload_len,
        });
    }
    Ok(len)
}

/// Writes one envelope and flushes.
pub fn write_envelope<W: Write>(writer: &mut W, payload: &[u8]) -> ProtocolResult<()> {
    writer.write_all(&encode_envelope(payload)?)?;
    writer.flush()?;
    Ok(())
}

/// Reads one envelope and returns its payload.
///
/// A stream that ends anywhere before the payload is complete, including
/// before the first byte, is a `TruncatedStream` error.
pub fn read_envelope<R: Read>(reader: &mut R, max_payload_len: usize) -> ProtocolResult<Vec<u8>> {
    EnvelopeReader::new(reader, max_payload_len).read_envelope()
}

/// Reads successive envelopes from a stream.
pub struct EnvelopeReader<R> {
    inner: R,
    max_payload_len: usize,
}

impl<R: Read> EnvelopeReader<R> {
    /// Creates a reader with the given payload limit.
    pub fn new(inner: R, max_payload_len: usize) -> Self {
        Self {
            inner,
            max_payload_len,
        }
    }

    /// Reads one envelope; end of stream is an error.
    pub fn read_envelope(&mut self) -> ProtocolResult<Vec<u8>> {
        self.read_next(false)?.ok_or(ProtocolError::TruncatedStream {
            expected: MAGIC.len(),
            actual: 0,
        })
    }

    /// Reads the next envelope of a stream of envelopes.
    ///
    /// Returns `Ok(None)` if the stream ends cleanly on an envelope
    /// boundary; ending anywhere else is `TruncatedStream`.
    pub fn next_envelope(&mut self) -> ProtocolResult<Option<Vec<u8>>> {
        self.read_next(true)
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_next(&mut self, eof_ok: bool) -> ProtocolResult<Option<Vec<u8>>> {
        let mut magic = [0u8; 6];
        let got = fill(&mut self.inner, &mut magic)?;
        if got == 0 && eof_ok {
            return Ok(None);
        }
        expect_full(magic.len(), got)?;
        check_magic(&magic)?;

        let mut length = [0u8; LENGTH_LEN];
        expect_full(LENGTH_LEN, fill(&mut self.inner, &mut length)?)?;
        let len = parse_length(length, self.max_payload_len)?;

        let mut payload = vec![0u8; len];
        expect_full(len, fill(&mut self.inner, &mut payload)?)?;
        Ok(Some(payload))
    }
}

fn expect_full(expected: usize, actual: usize) -> ProtocolResult<()> {
    if actual < expected {
        Err(ProtocolError::TruncatedStream { expected, actual })
    } else {
        Ok(())
    }
}

/// Reads until `buf` is full or the stream ends; returns bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn header_layout() {
        let frame = encode_envelope(&[0xaa, 0xbb]).unwrap();
        assert_eq!(&frame[..6], b"OGREv1");
        assert_eq!(&frame[6..10], &[0, 0, 0, 2]);
        assert_eq!(&frame[10..], &[0xaa, 0xbb]);
    }

    #[test]
    fn empty_payload_is_not_an_error() {
        let mut stream = Cursor::new(b"OGREv1\0\0\0\0".to_vec());
        let payload = read_envelope(&mut stream, DEFAULT_MAX_PAYLOAD_LEN).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn short_magic_is_truncated() {
        let mut stream = Cursor::new(b"OGR".to_vec());
        let err = read_envelope(&mut stream, DEFAULT_MAX_PAYLOAD_LEN).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TruncatedStream {
                expected: 6,
                actual: 3
            }
        ));
    }

    #[test]
    fn empty_stream_is_truncated_for_single_reads() {
        let mut stream = Cursor::new(Vec::new());
        assert!(matches!(
            read_envelope(&mut stream, DEFAULT_MAX_PAYLOAD_LEN),
            Err(ProtocolError::TruncatedStream { .. })
        ));
    }

    #[test]
    fn short_payload_is_truncated() {
        let mut frame = encode_envelope(&[1, 2, 3, 4]).unwrap();
        frame.truncate(frame.len() - 1);
        let err = read_envelope(&mut Cursor::new(frame), DEFAULT_MAX_PAYLOAD_LEN).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TruncatedStream {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn bad_magic() {
        let mut stream = Cursor::new(b"HTTP/1\0\0\0\0".to_vec());
        let err = read_envelope(&mut stream, DEFAULT_MAX_PAYLOAD_LEN).unwrap_err();
        assert!(matches!(err, ProtocolError::BadEnvelope { found } if &found == b"HTTP/1"));
    }

    #[test]
    fn oversized_length_is_rejected_before_allocating() {
        let mut stream = Cursor::new(b"OGREv1\xff\xff\xff\xff".to_vec());
        let err = read_envelope(&mut stream, 1024).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { max: 1024, .. }));
    }

    #[test]
    fn stream_of_envelopes_ends_cleanly() {
        let mut bytes = Vec::new();
        write_envelope(&mut bytes, b"one").unwrap();
        write_envelope(&mut bytes, b"").unwrap();
        write_envelope(&mut bytes, b"three").unwrap();

        let mut reader = EnvelopeReader::new(Cursor::new(bytes), DEFAULT_MAX_PAYLOAD_LEN);
        assert_eq!(reader.next_envelope().unwrap().unwrap(), b"one");
        assert_eq!(reader.next_envelope().unwrap().unwrap(), b"");
        assert_eq!(reader.next_envelope().unwrap().unwrap(), b"three");
        assert!(reader.next_envelope().unwrap().is_none());
    }

    proptest! {
        #[test]
        fn envelope_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let frame = encode_envelope(&payload).unwrap();
            prop_assert_eq!(frame.len(), HEADER_LEN + payload.len());
            let decoded = read_envelope(&mut Cursor::new(frame), DEFAULT_MAX_PAYLOAD_LEN).unwrap();
            prop_assert_eq!(decoded, payload);
        }
    }
}
