//! Line and byte reading primitives shared by both drafts.
//!
//! Everything here reads from a buffered stream and never consumes past what
//! it returns: the handshake reader hands the same stream to the frame
//! decoder once the headers are done.

use std::io::ErrorKind;

use tokio::io::{AsyncBufReadExt, AsyncReadExt};

use super::FrameReader;
use crate::error::{Error, Result};

/// Longest accepted handshake line, excluding the terminator.
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Cap on the up-front allocation for a length-prefixed payload.
const INITIAL_PAYLOAD_CAPACITY: u64 = 64 * 1024;

/// Reads one `\n` or `\r\n` terminated line.
///
/// A `\r` must be followed by `\n`. The terminator is consumed but not
/// returned.
///
/// # Errors
///
/// - [`Error::Transport`] if the stream ends before the terminator
/// - [`Error::Protocol`] for a bare `\r`, an overlong line or invalid UTF-8
pub async fn read_line(input: &mut FrameReader) -> Result<String> {
    let mut line = Vec::with_capacity(128);

    let saw_cr = loop {
        let available = input.fill_buf().await?;
        if available.is_empty() {
            return Err(Error::transport(format!(
                "stream ended mid-line after {:?}",
                String::from_utf8_lossy(&line)
            )));
        }

        match available.iter().position(|&b| b == b'\n' || b == b'\r') {
            Some(index) => {
                let saw_cr = available[index] == b'\r';
                line.extend_from_slice(&available[..index]);
                input.consume(index + 1);
                break saw_cr;
            }
            None => {
                let len = available.len();
                line.extend_from_slice(available);
                input.consume(len);
            }
        }

        if line.len() > MAX_LINE_LENGTH {
            return Err(Error::protocol(format!(
                "handshake line exceeds {MAX_LINE_LENGTH} bytes"
            )));
        }
    };

    if line.len() > MAX_LINE_LENGTH {
        return Err(Error::protocol(format!(
            "handshake line exceeds {MAX_LINE_LENGTH} bytes"
        )));
    }

    if saw_cr {
        match read_byte_or_eof(input).await? {
            Some(b'\n') => {}
            _ => return Err(Error::protocol("malformed line: CR not followed by LF")),
        }
    }

    String::from_utf8(line).map_err(|_| Error::protocol("handshake line is not valid UTF-8"))
}

/// Reads one byte, mapping a clean end of stream to `None`.
pub async fn read_byte_or_eof(input: &mut FrameReader) -> Result<Option<u8>> {
    match input.read_u8().await {
        Ok(byte) => Ok(Some(byte)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reads exactly `length` payload bytes.
///
/// The buffer grows as data arrives, so a huge declared length costs memory
/// only once the peer actually sends it.
///
/// # Errors
///
/// Returns [`Error::Io`] with `UnexpectedEof` if the stream ends first.
pub async fn read_payload(input: &mut FrameReader, length: u64) -> Result<Vec<u8>> {
    // Bounded by INITIAL_PAYLOAD_CAPACITY.
    #[allow(clippy::cast_possible_truncation)]
    let mut payload = Vec::with_capacity(length.min(INITIAL_PAYLOAD_CAPACITY) as usize);
    let read = (&mut *input).take(length).read_to_end(&mut payload).await?;
    if (read as u64) < length {
        return Err(Error::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("stream ended after {read} of {length} payload bytes"),
        )));
    }
    Ok(payload)
}

/// Consumes the final byte of a closed stream.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if anything but end of stream follows.
pub async fn expect_eof(input: &mut FrameReader) -> Result<()> {
    match read_byte_or_eof(input).await? {
        None => Ok(()),
        Some(byte) => Err(Error::protocol(format!(
            "expected end of stream after close, got {byte:#04x}"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    use tokio::io::BufReader;

    fn reader(bytes: &[u8]) -> Cursor<Vec<u8>> {
        Cursor::new(bytes.to_vec())
    }

    #[tokio::test]
    async fn test_read_line_crlf_and_lf() {
        let mut input = reader(b"HTTP/1.1 101 Switching\r\nUpgrade: WebSocket\n\r\n");
        assert_eq!(read_line(&mut input).await.unwrap(), "HTTP/1.1 101 Switching");
        assert_eq!(read_line(&mut input).await.unwrap(), "Upgrade: WebSocket");
        assert_eq!(read_line(&mut input).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_read_line_leaves_rest_unread() {
        let mut input = reader(b"\r\n\x01\x02");
        assert_eq!(read_line(&mut input).await.unwrap(), "");
        assert_eq!(read_byte_or_eof(&mut input).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_read_line_small_buffer() {
        // Forces the line to span several fill_buf calls.
        let mut input = BufReader::with_capacity(2, reader(b"abcdef\r\nrest"));
        assert_eq!(read_line(&mut input).await.unwrap(), "abcdef");
        assert_eq!(read_byte_or_eof(&mut input).await.unwrap(), Some(b'r'));
    }

    #[tokio::test]
    async fn test_read_line_bare_cr() {
        let err = read_line(&mut reader(b"abc\rdef\n")).await.unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_read_line_cr_at_eof() {
        let err = read_line(&mut reader(b"abc\r")).await.unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_read_line_eof() {
        let err = read_line(&mut reader(b"no terminator")).await.unwrap_err();
        assert!(err.is_transport_error());
    }

    #[tokio::test]
    async fn test_read_line_too_long() {
        let mut long = vec![b'a'; MAX_LINE_LENGTH + 1];
        long.extend_from_slice(b"\r\n");
        let err = read_line(&mut reader(&long)).await.unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_read_line_invalid_utf8() {
        let err = read_line(&mut reader(b"\xff\xfe\r\n")).await.unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_read_payload_short() {
        let err = read_payload(&mut reader(b"abc"), 5).await.unwrap_err();
        assert!(err.is_transport_error());
    }

    #[tokio::test]
    async fn test_read_payload_exact() {
        let mut input = reader(b"hello!");
        assert_eq!(read_payload(&mut input, 5).await.unwrap(), b"hello");
        assert_eq!(read_byte_or_eof(&mut input).await.unwrap(), Some(b'!'));
    }

    #[tokio::test]
    async fn test_expect_eof() {
        expect_eof(&mut reader(b"")).await.unwrap();
        let err = expect_eof(&mut reader(b"x")).await.unwrap_err();
        assert!(err.is_protocol_error());
    }
}
