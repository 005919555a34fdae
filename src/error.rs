//! Error types for the WebSocket client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wsclient_drafts::{Result, WebSocket};
//!
//! fn example(socket: &WebSocket) -> Result<()> {
//!     socket.add_request_header("Origin", "http://localhost")?;
//!     socket.send_text("hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Transport | [`Error::Io`], [`Error::Transport`], [`Error::Tls`] |
//! | Protocol | [`Error::Protocol`], [`Error::HandshakeMismatch`] |
//! | Usage | [`Error::AlreadyStarted`], [`Error::InvalidHeader`], [`Error::NotText`], [`Error::UnsupportedOpcode`], [`Error::UnsupportedScheme`], [`Error::InvalidUrl`], [`Error::ConnectionClosed`], [`Error::Usage`] |
//! | Waiting | [`Error::Timeout`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use url::ParseError as UrlError;

use crate::message::Opcode;
use crate::protocol::ProtocolDraft;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Errors raised inside the reader or writer task are terminal for the
/// connection: they are delivered to listeners as an error event and the
/// connection is aborted. Errors from synchronous calls are returned directly.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// IO error on the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Transport failure that is not a plain IO error (short read, refused
    /// connection setup).
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// TLS setup failed.
    #[error("TLS error: {message}")]
    Tls {
        /// Description of the TLS failure.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The peer violated the wire protocol.
    ///
    /// Returned for malformed status lines, malformed headers, invalid frame
    /// header bits, fragmented frames, unknown opcodes and length overflow.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The server's 16-byte handshake reply did not match the expected digest.
    #[error("Handshake mismatch: expected {expected:02x?}, server sent {actual:02x?}")]
    HandshakeMismatch {
        /// Digest computed from the client's keys and nonce.
        expected: [u8; 16],
        /// Bytes the server actually sent.
        actual: [u8; 16],
    },

    // ========================================================================
    // Usage Errors
    // ========================================================================
    /// Configuration was changed after the connection started.
    #[error("WebSocket already started: {operation} is only allowed before start")]
    AlreadyStarted {
        /// The rejected operation.
        operation: &'static str,
    },

    /// A request header name or value contains forbidden characters.
    #[error("Invalid request header {name:?}: {reason}")]
    InvalidHeader {
        /// Header name as supplied by the caller.
        name: String,
        /// Why the header was rejected.
        reason: &'static str,
    },

    /// Text was requested from a message that is not a text message.
    #[error("Message is not text (opcode {opcode})")]
    NotText {
        /// Opcode of the message.
        opcode: Opcode,
    },

    /// The selected draft cannot transmit this opcode.
    #[error("{draft} cannot send {opcode} messages")]
    UnsupportedOpcode {
        /// Opcode of the rejected message.
        opcode: Opcode,
        /// Draft in use.
        draft: ProtocolDraft,
    },

    /// URL scheme is not one of ws, wss, http, https.
    #[error("Unsupported WebSocket scheme: {scheme}")]
    UnsupportedScheme {
        /// The rejected scheme.
        scheme: String,
    },

    /// URL could not be parsed or has no host.
    #[error("Invalid URL: {message}")]
    InvalidUrl {
        /// Description of the problem.
        message: String,
    },

    /// The connection is closing or closed and no longer accepts messages.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Other caller misuse, such as starting outside a Tokio runtime.
    #[error("Usage error: {message}")]
    Usage {
        /// Description of the misuse.
        message: String,
    },

    // ========================================================================
    // Waiting
    // ========================================================================
    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a TLS error.
    #[inline]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a handshake mismatch error.
    #[inline]
    pub fn handshake_mismatch(expected: [u8; 16], actual: [u8; 16]) -> Self {
        Self::HandshakeMismatch { expected, actual }
    }

    /// Creates an already-started error.
    #[inline]
    pub fn already_started(operation: &'static str) -> Self {
        Self::AlreadyStarted { operation }
    }

    /// Creates an invalid header error.
    #[inline]
    pub fn invalid_header(name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            reason,
        }
    }

    /// Creates an unsupported opcode error.
    #[inline]
    pub fn unsupported_opcode(opcode: Opcode, draft: ProtocolDraft) -> Self {
        Self::UnsupportedOpcode { opcode, draft }
    }

    /// Creates an unsupported scheme error.
    #[inline]
    pub fn unsupported_scheme(scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            scheme: scheme.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            message: message.into(),
        }
    }

    /// Creates a usage error.
    #[inline]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

impl From<UrlError> for Error {
    fn from(err: UrlError) -> Self {
        Self::invalid_url(err.to_string())
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a transport failure.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Transport { .. } | Self::Tls { .. }
        )
    }

    /// Returns `true` if the peer violated the protocol or failed the handshake.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::HandshakeMismatch { .. }
        )
    }

    /// Returns `true` if this error reports caller misuse.
    #[inline]
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyStarted { .. }
                | Self::InvalidHeader { .. }
                | Self::NotText { .. }
                | Self::UnsupportedOpcode { .. }
                | Self::UnsupportedScheme { .. }
                | Self::InvalidUrl { .. }
                | Self::ConnectionClosed
                | Self::Usage { .. }
        )
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::protocol("bad status line");
        assert_eq!(err.to_string(), "Protocol error: bad status line");
    }

    #[test]
    fn test_unsupported_opcode_display() {
        let err = Error::unsupported_opcode(Opcode::Binary, ProtocolDraft::Draft76);
        assert_eq!(err.to_string(), "draft76 cannot send binary messages");
    }

    #[test]
    fn test_is_transport_error() {
        let io_err: Error = IoError::new(ErrorKind::ConnectionReset, "reset").into();
        assert!(io_err.is_transport_error());
        assert!(Error::transport("short read").is_transport_error());
        assert!(!Error::protocol("x").is_transport_error());
    }

    #[test]
    fn test_is_protocol_error() {
        assert!(Error::protocol("x").is_protocol_error());
        assert!(Error::handshake_mismatch([0; 16], [1; 16]).is_protocol_error());
        assert!(!Error::ConnectionClosed.is_protocol_error());
    }

    #[test]
    fn test_is_usage_error() {
        assert!(Error::already_started("add_request_header").is_usage_error());
        assert!(Error::invalid_header("Bad:Name", "name contains ':'").is_usage_error());
        assert!(Error::NotText { opcode: Opcode::Binary }.is_usage_error());
        assert!(!Error::timeout("wait", 10).is_usage_error());
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::timeout("wait_for_ready_state", 1000).is_timeout());
        assert!(!Error::ConnectionClosed.is_timeout());
    }

    #[test]
    fn test_from_url_error() {
        let err: Error = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }
}
