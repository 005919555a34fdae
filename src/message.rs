//! Message values exchanged over a WebSocket.
//!
//! A [`Message`] is an opcode plus payload bytes. It is immutable once built
//! and cheap to share: queues hold messages behind an `Arc`.

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, Result};

// ============================================================================
// Opcode
// ============================================================================

/// Frame purpose tag.
///
/// The numeric values are the draft03 wire values; draft76 maps its own
/// frame types onto the same enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation = 0,
    /// Close handshake frame.
    Close = 1,
    /// Ping control frame.
    Ping = 2,
    /// Pong control frame.
    Pong = 3,
    /// UTF-8 text message.
    Text = 4,
    /// Binary message.
    Binary = 5,
}

impl Opcode {
    /// Decodes a draft03 opcode nibble.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Continuation),
            1 => Some(Self::Close),
            2 => Some(Self::Ping),
            3 => Some(Self::Pong),
            4 => Some(Self::Text),
            5 => Some(Self::Binary),
            _ => None,
        }
    }

    /// Returns the draft03 wire value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` for close, ping and pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "continuation",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Text => "text",
            Self::Binary => "binary",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Message
// ============================================================================

/// An immutable WebSocket message.
///
/// # Example
///
/// ```
/// use wsclient_drafts::{Message, Opcode};
///
/// let message = Message::text("hello");
/// assert!(message.is_text());
/// assert_eq!(message.opcode(), Opcode::Text);
/// assert_eq!(message.as_text().unwrap(), "hello");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    opcode: Opcode,
    payload: Vec<u8>,
}

impl Message {
    /// Creates a message from an opcode and raw payload.
    #[inline]
    #[must_use]
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// Creates a text message.
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, text.into().into_bytes())
    }

    /// Creates a binary message.
    #[inline]
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Binary, data)
    }

    /// Creates a close frame carrying `payload`.
    #[inline]
    #[must_use]
    pub fn close(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Close, payload)
    }

    /// Creates a ping frame.
    #[inline]
    #[must_use]
    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    /// Creates a pong frame.
    #[inline]
    #[must_use]
    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Returns the opcode.
    #[inline]
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the message and returns its payload.
    #[inline]
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns `true` if this is a text message.
    #[inline]
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.opcode == Opcode::Text
    }

    /// Returns the payload decoded as UTF-8.
    ///
    /// Invalid sequences are replaced with U+FFFD.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotText`] if the message is not a text message.
    pub fn as_text(&self) -> Result<Cow<'_, str>> {
        if !self.is_text() {
            return Err(Error::NotText {
                opcode: self.opcode,
            });
        }
        Ok(String::from_utf8_lossy(&self.payload))
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("opcode", &self.opcode)
            .field("len", &self.payload.len())
            .finish()
    }
}

impl fmt::Display for Message {
    /// Text messages print their text, everything else prints hex bytes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_text() {
            return f.write_str(&String::from_utf8_lossy(&self.payload));
        }
        for (i, byte) in self.payload.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
