//! Draft03 length-prefixed framing.
//!
//! # Header
//!
//! ```text
//!  0               1
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-----+-------+-+-------------+------------------+
//! |M| RSV | opcode|R| length (7)  | extended length  |
//! |O|     |  (4)  |S|             | 0, 2 or 8 bytes  |
//! |R|     |       |V|             |                  |
//! +-+-----+-------+-+-------------+------------------+
//! ```
//!
//! Length 126 means a 16-bit length follows, 127 a 64-bit length. Reserved
//! bits must be clear; the MORE bit (fragmentation) is not supported.
//!
//! # Close cookie
//!
//! A close frame this side sends carries a payload that is remembered on the
//! socket. A close frame whose payload matches it is the peer's
//! acknowledgement; any other close frame is the peer starting the
//! handshake, and is echoed back.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use super::handshake;
use super::stream::{expect_eof, read_byte_or_eof, read_payload};
use super::{FrameReader, FrameWriter, ProtocolDraft, SocketContext, WireProtocol};
use crate::error::{Error, Result};
use crate::message::{Message, Opcode};
use crate::state::ReadyState;
use crate::transport::Target;

// ============================================================================
// Constants
// ============================================================================

/// Payload of a client-initiated close frame.
pub const CLOSE_COOKIE: &[u8] = b"clientclose";

/// Longest possible frame header.
pub const MAX_HEADER_LEN: usize = 10;

const MORE_BIT: u8 = 0x80;
const RESERVED_BITS: u8 = 0x70;
const OPCODE_MASK: u8 = 0x0F;
const LENGTH_RESERVED_BIT: u8 = 0x80;

/// Largest length that fits in the 7-bit field.
const MAX_SHORT_LENGTH: usize = 125;
const LENGTH_16: u8 = 126;
const LENGTH_64: u8 = 127;

// ============================================================================
// Frame
// ============================================================================

/// One decoded draft03 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw opcode nibble.
    pub opcode: u8,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// Reads one frame.
///
/// Returns `None` if the stream ends before a complete two-byte header.
///
/// # Errors
///
/// - [`Error::Protocol`] for reserved bits, fragmentation, or a length that
///   does not fit in memory
/// - [`Error::Io`] if the stream ends inside the length or payload
pub async fn read_frame(input: &mut FrameReader) -> Result<Option<Frame>> {
    let Some(first) = read_byte_or_eof(input).await? else {
        return Ok(None);
    };
    let Some(second) = read_byte_or_eof(input).await? else {
        return Ok(None);
    };

    if first & RESERVED_BITS != 0 || second & LENGTH_RESERVED_BIT != 0 {
        return Err(Error::protocol(format!(
            "reserved bits set in frame header {first:#04x} {second:#04x}"
        )));
    }
    if first & MORE_BIT != 0 {
        return Err(Error::protocol("fragmented frames are not supported"));
    }

    let length = match second {
        LENGTH_16 => u64::from(input.read_u16().await?),
        LENGTH_64 => input.read_u64().await?,
        short => u64::from(short),
    };
    if usize::try_from(length).is_err() || length > isize::MAX as u64 {
        return Err(Error::protocol(format!("frame length {length} is too long")));
    }

    let payload = read_payload(input, length).await?;
    Ok(Some(Frame {
        opcode: first & OPCODE_MASK,
        payload,
    }))
}

/// Encodes the header for a frame of `length` payload bytes.
///
/// Returns the header buffer and how many of its bytes are used.
#[must_use]
pub fn encode_header(opcode: Opcode, length: usize) -> ([u8; MAX_HEADER_LEN], usize) {
    let mut header = [0u8; MAX_HEADER_LEN];
    header[0] = opcode.as_u8() & OPCODE_MASK;

    let used = if length <= MAX_SHORT_LENGTH {
        // Fits in 7 bits.
        #[allow(clippy::cast_possible_truncation)]
        let short = length as u8;
        header[1] = short;
        2
    } else if let Ok(medium) = u16::try_from(length) {
        header[1] = LENGTH_16;
        header[2..4].copy_from_slice(&medium.to_be_bytes());
        4
    } else {
        header[1] = LENGTH_64;
        header[2..10].copy_from_slice(&(length as u64).to_be_bytes());
        10
    };
    (header, used)
}

/// Encodes a complete frame.
#[must_use]
pub fn encode_frame(message: &Message) -> Vec<u8> {
    let (header, used) = encode_header(message.opcode(), message.len());
    let mut frame = Vec::with_capacity(used + message.len());
    frame.extend_from_slice(&header[..used]);
    frame.extend_from_slice(message.payload());
    frame
}

// ============================================================================
// Draft03Protocol
// ============================================================================

/// draft-ietf-hybi-thewebsocketprotocol-03.
#[derive(Debug, Clone, Copy, Default)]
pub struct Draft03Protocol;

#[async_trait]
impl WireProtocol for Draft03Protocol {
    fn draft(&self) -> ProtocolDraft {
        ProtocolDraft::Draft03
    }

    async fn perform_handshake(
        &self,
        socket: &dyn SocketContext,
        target: &Target,
        input: &mut FrameReader,
        output: &mut FrameWriter,
    ) -> Result<()> {
        handshake::perform(socket, target, input, output, &[("Sec-WebSocket-Draft", "2")])
            .await
    }

    async fn read_message(
        &self,
        socket: &dyn SocketContext,
        input: &mut FrameReader,
    ) -> Result<Option<Message>> {
        loop {
            let Some(Frame { opcode, payload }) = read_frame(input).await? else {
                socket.set_ready_state(ReadyState::Closed);
                return Ok(None);
            };

            match Opcode::from_u8(opcode) {
                Some(Opcode::Text) => return Ok(Some(Message::new(Opcode::Text, payload))),
                Some(Opcode::Binary) => return Ok(Some(Message::binary(payload))),
                Some(Opcode::Ping) => {
                    trace!(len = payload.len(), "Answering ping");
                    socket.queue().add_head(Message::pong(payload));
                }
                Some(Opcode::Pong) => {
                    trace!(len = payload.len(), "Ignoring pong");
                }
                Some(Opcode::Close) => {
                    if socket.close_cookie().as_deref() == Some(payload.as_slice()) {
                        debug!("Peer acknowledged close");
                        socket.abort();
                        return Ok(None);
                    }

                    debug!(len = payload.len(), "Peer started close handshake");
                    if socket.ready_state() == ReadyState::Open {
                        socket.set_ready_state(ReadyState::Closing);
                    }
                    socket.queue().add_head(Message::close(payload));
                    expect_eof(input).await?;
                    socket.set_ready_state(ReadyState::Closed);
                    return Ok(None);
                }
                Some(Opcode::Continuation) | None => {
                    return Err(Error::protocol(format!("unexpected opcode {opcode:#x}")));
                }
            }
        }
    }

    async fn send_message(
        &self,
        _socket: &dyn SocketContext,
        output: &mut FrameWriter,
        message: &Message,
    ) -> Result<bool> {
        let (header, used) = encode_header(message.opcode(), message.len());
        output.write_all(&header[..used]).await?;
        output.write_all(message.payload()).await?;
        output.flush().await?;
        Ok(message.opcode() != Opcode::Close)
    }

    fn initiate_close(&self, socket: &dyn SocketContext) {
        // Cookie first, so a fast acknowledgement is recognised.
        socket.set_close_cookie(CLOSE_COOKIE.to_vec());
        if socket.ready_state() == ReadyState::Open {
            socket.set_ready_state(ReadyState::Closing);
        }
        socket.queue().add_tail(Message::close(CLOSE_COOKIE.to_vec()));
    }
}

// ============================================================================
// Tests
// ============================================================================
