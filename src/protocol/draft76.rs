//! Draft76 sentinel framing.
//!
//! # Frames
//!
//! ```text
//! type & 0x80 == 0:   [type] [payload ...] [0xFF]        text when type == 0x00
//! type & 0x80 != 0:   [type] [varint length] [payload]   0xFF 0x00 is close
//! ```
//!
//! The varint is big-endian base-128: each byte contributes its low 7 bits,
//! and a set high bit means another byte follows.
//!
//! Only text can be sent. Ping has no wire form here and is dropped
//! silently.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use super::stream::{expect_eof, read_byte_or_eof, read_payload};
use super::{FrameReader, FrameWriter, ProtocolDraft, SocketContext, WireProtocol};
use crate::error::{Error, Result};
use crate::message::{Message, Opcode};
use crate::state::ReadyState;

// ============================================================================
// Constants
// ============================================================================

/// Marks the start of a text frame.
const TEXT_FRAME: u8 = 0x00;

/// Ends a sentinel frame; as a length-frame type it marks close.
const SENTINEL: u8 = 0xFF;

/// The close frame on the wire.
pub const CLOSE_FRAME: [u8; 2] = [SENTINEL, 0x00];

// ============================================================================
// Frame
// ============================================================================

/// One decoded draft76 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `0x00 ... 0xFF` text frame.
    Text(Vec<u8>),
    /// Length-prefixed frame other than close.
    Binary(Vec<u8>),
    /// `0xFF 0x00`.
    Close,
    /// Sentinel frame with a type this client does not know.
    Unknown {
        /// The frame type byte.
        frame_type: u8,
    },
}

/// Reads one frame.
///
/// Returns `None` if the stream ends cleanly between frames.
///
/// # Errors
///
/// - [`Error::Io`] if the stream ends inside a frame
/// - [`Error::Protocol`] if a length does not fit in 64 bits
pub async fn read_frame(input: &mut FrameReader) -> Result<Option<Frame>> {
    let Some(frame_type) = read_byte_or_eof(input).await? else {
        return Ok(None);
    };

    if frame_type & 0x80 != 0 {
        let length = read_length(input).await?;
        if frame_type == SENTINEL && length == 0 {
            return Ok(Some(Frame::Close));
        }
        let payload = read_payload(input, length).await?;
        return Ok(Some(Frame::Binary(payload)));
    }

    let mut payload = Vec::new();
    input.read_until(SENTINEL, &mut payload).await?;
    if payload.pop() != Some(SENTINEL) {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream ended inside a text frame",
        )));
    }

    if frame_type == TEXT_FRAME {
        Ok(Some(Frame::Text(payload)))
    } else {
        Ok(Some(Frame::Unknown { frame_type }))
    }
}

/// Decodes a base-128 length.
async fn read_length(input: &mut FrameReader) -> Result<u64> {
    let mut length: u64 = 0;
    loop {
        let byte = input.read_u8().await?;
        length = length
            .checked_mul(128)
            .and_then(|l| l.checked_add(u64::from(byte & 0x7F)))
            .ok_or_else(|| Error::protocol("frame length overflows 64 bits"))?;
        if byte & 0x80 == 0 {
            return Ok(length);
        }
    }
}

/// Encodes a message for the wire.
///
/// Returns `None` for ping, which draft76 cannot express.
///
/// # Errors
///
/// Returns [`Error::UnsupportedOpcode`] for binary, pong and continuation.
pub fn encode_frame(message: &Message) -> Result<Option<Vec<u8>>> {
    match message.opcode() {
        Opcode::Ping => Ok(None),
        Opcode::Close => Ok(Some(CLOSE_FRAME.to_vec())),
        Opcode::Text => {
            let mut frame = Vec::with_capacity(message.len() + 2);
            frame.push(TEXT_FRAME);
            frame.extend_from_slice(message.payload());
            frame.push(SENTINEL);
            Ok(Some(frame))
        }
        other => Err(Error::unsupported_opcode(other, ProtocolDraft::Draft76)),
    }
}

// ============================================================================
// Draft76Protocol
// ============================================================================

/// draft-hixie-thewebsocketprotocol-76.
#[derive(Debug, Clone, Copy, Default)]
pub struct Draft76Protocol;

#[async_trait]
impl WireProtocol for Draft76Protocol {
    fn draft(&self) -> ProtocolDraft {
        ProtocolDraft::Draft76
    }

    fn supports(&self, opcode: Opcode) -> bool {
        matches!(opcode, Opcode::Text | Opcode::Close | Opcode::Ping)
    }

    async fn read_message(
        &self,
        socket: &dyn SocketContext,
        input: &mut FrameReader,
    ) -> Result<Option<Message>> {
        loop {
            let Some(frame) = read_frame(input).await? else {
                socket.set_ready_state(ReadyState::Closed);
                return Ok(None);
            };

            match frame {
                Frame::Text(payload) => return Ok(Some(Message::new(Opcode::Text, payload))),
                Frame::Binary(payload) => return Ok(Some(Message::binary(payload))),
                Frame::Unknown { frame_type } => {
                    trace!(frame_type, "Skipping frame of unknown type");
                }
                Frame::Close => match socket.ready_state() {
                    ReadyState::Open => {
                        debug!("Peer started close handshake");
                        socket.queue().add_head(Message::close(Vec::new()));
                        socket.set_ready_state(ReadyState::Closing);
                        expect_eof(input).await?;
                        socket.set_ready_state(ReadyState::Closed);
                        return Ok(None);
                    }
                    ReadyState::Closed => {
                        trace!("Ignoring close frame on a closed socket");
                    }
                    _ => {
                        debug!("Peer acknowledged close");
                        socket.abort();
                        return Ok(None);
                    }
                },
            }
        }
    }

    async fn send_message(
        &self,
        _socket: &dyn SocketContext,
        output: &mut FrameWriter,
        message: &Message,
    ) -> Result<bool> {
        let Some(frame) = encode_frame(message)? else {
            trace!("Dropping ping");
            return Ok(true);
        };

        output.write_all(&frame).await?;
        output.flush().await?;
        Ok(message.opcode() != Opcode::Close)
    }

    fn initiate_close(&self, socket: &dyn SocketContext) {
        if socket.ready_state() == ReadyState::Open {
            socket.set_ready_state(ReadyState::Closing);
        }
        socket.queue().add_tail(Message::close(Vec::new()));
    }
}

// ============================================================================
// Tests
// ============================================================================
