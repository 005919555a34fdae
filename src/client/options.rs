//! Per-socket configuration.
//!
//! Options are fixed once the socket starts; setters on a started socket
//! fail with [`Error::AlreadyStarted`].
//!
//! # Example
//!
//! ```ignore
//! use wsclient_drafts::{ProtocolDraft, SocketOptions};
//!
//! let options = SocketOptions::new()
//!     .with_draft(ProtocolDraft::Draft03)
//!     .with_protocol("chat")
//!     .with_verify_handshake(false);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use super::event::{DirectDispatcher, EventDispatcher};
use crate::error::{Error, Result};
use crate::protocol::{Headers, ProtocolDraft};
use crate::transport::NetConfig;

// ============================================================================
// SocketOptions
// ============================================================================

/// Configuration captured by a socket when it starts.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Wire protocol draft.
    pub draft: ProtocolDraft,

    /// Check the server's handshake digest.
    pub verify_handshake: bool,

    /// Subprotocols to request, in preference order.
    pub protocols: Vec<String>,

    /// Extra request headers; always validated.
    pub(crate) request_headers: Headers,

    /// Transport factories.
    pub net_config: NetConfig,

    /// How listeners are invoked.
    pub dispatcher: Arc<dyn EventDispatcher>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            draft: ProtocolDraft::default(),
            verify_handshake: true,
            protocols: Vec::new(),
            request_headers: Headers::new(),
            net_config: NetConfig::default(),
            dispatcher: Arc::new(DirectDispatcher),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl SocketOptions {
    /// Creates options with defaults: draft76, verification on, direct
    /// dispatch, default transports.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the wire protocol draft.
    #[inline]
    #[must_use]
    pub fn with_draft(mut self, draft: ProtocolDraft) -> Self {
        self.draft = draft;
        self
    }

    /// Adds a subprotocol to request.
    #[inline]
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Enables or disables the handshake digest check.
    #[inline]
    #[must_use]
    pub fn with_verify_handshake(mut self, verify: bool) -> Self {
        self.verify_handshake = verify;
        self
    }

    /// Sets the transport factories.
    #[inline]
    #[must_use]
    pub fn with_net_config(mut self, net_config: NetConfig) -> Self {
        self.net_config = net_config;
        self
    }

    /// Sets the event dispatcher.
    #[inline]
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Adds a request header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] if the header would corrupt the
    /// request. The header is not stored.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.request_headers.insert(name, value)
    }

    /// Caller request headers.
    #[inline]
    #[must_use]
    pub fn request_headers(&self) -> &Headers {
        &self.request_headers
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SocketOptions {
    /// Checks that the requested subprotocols can be sent.
    ///
    /// They are joined with spaces into one header, so each must be a
    /// non-empty token without whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] naming `Sec-WebSocket-Protocol`.
    pub fn validate(&self) -> Result<()> {
        for protocol in &self.protocols {
            if protocol.is_empty() {
                return Err(Error::invalid_header(
                    "Sec-WebSocket-Protocol",
                    "subprotocol is empty",
                ));
            }
            if protocol.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(Error::invalid_header(
                    "Sec-WebSocket-Protocol",
                    "subprotocol contains whitespace",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SocketOptions::new();
        assert_eq!(options.draft, ProtocolDraft::Draft76);
        assert!(options.verify_handshake);
        assert!(options.protocols.is_empty());
        assert!(options.request_headers().is_empty());
    }

    #[test]
    fn test_chaining() {
        let options = SocketOptions::new()
            .with_draft(ProtocolDraft::Draft03)
            .with_protocol("chat")
            .with_protocol("superchat")
            .with_verify_handshake(false);
        assert_eq!(options.draft, ProtocolDraft::Draft03);
        assert_eq!(options.protocols, ["chat", "superchat"]);
        assert!(!options.verify_handshake);
    }

    #[test]
    fn test_add_header_rejects_crlf() {
        let mut options = SocketOptions::new();
        assert!(options.add_header("X-Evil", "a\r\nb: c").is_err());
        assert!(options.request_headers().is_empty());
        options.add_header("Origin", "http://localhost").unwrap();
        assert_eq!(options.request_headers().get("origin"), Some("http://localhost"));
    }

    #[test]
    fn test_validate_protocols() {
        assert!(SocketOptions::new().with_protocol("chat").validate().is_ok());
        assert!(SocketOptions::new().with_protocol("two words").validate().is_err());
        assert!(SocketOptions::new().with_protocol("").validate().is_err());
    }
}
