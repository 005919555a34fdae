//! Builder pattern for socket configuration.
//!
//! # Example
//!
//! ```no_run
//! use wsclient_drafts::{ProtocolDraft, WebSocket};
//!
//! # fn example() -> wsclient_drafts::Result<()> {
//! let socket = WebSocket::builder("ws://localhost:8080/chat")
//!     .draft(ProtocolDraft::Draft03)
//!     .protocol("chat")
//!     .header("Origin", "http://localhost")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use super::event::EventDispatcher;
use super::options::SocketOptions;
use super::socket::WebSocket;
use crate::error::Result;
use crate::protocol::ProtocolDraft;
use crate::transport::{NetConfig, Target};

// ============================================================================
// WebSocketBuilder
// ============================================================================

/// Builder for a [`WebSocket`].
///
/// Unlike the setters on an unstarted socket, the builder defers validation
/// to [`build`](Self::build), where the URL, headers and subprotocols are
/// all checked.
#[derive(Debug, Clone)]
pub struct WebSocketBuilder {
    /// Target URL.
    url: String,
    /// Options other than headers.
    options: SocketOptions,
    /// Headers, validated on build.
    headers: Vec<(String, String)>,
}

impl WebSocketBuilder {
    /// Creates a builder for `url` with default options.
    #[inline]
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: SocketOptions::default(),
            headers: Vec::new(),
        }
    }

    /// Selects the wire protocol draft.
    #[inline]
    #[must_use]
    pub fn draft(mut self, draft: ProtocolDraft) -> Self {
        self.options.draft = draft;
        self
    }

    /// Requests a subprotocol. Call repeatedly for several, most preferred
    /// first.
    #[inline]
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.options.protocols.push(protocol.into());
        self
    }

    /// Adds a request header.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Enables or disables the handshake digest check.
    #[inline]
    #[must_use]
    pub fn verify_handshake(mut self, verify: bool) -> Self {
        self.options.verify_handshake = verify;
        self
    }

    /// Sets the transport factories.
    #[inline]
    #[must_use]
    pub fn net_config(mut self, net_config: NetConfig) -> Self {
        self.options.net_config = net_config;
        self
    }

    /// Sets the event dispatcher.
    #[inline]
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.options.dispatcher = dispatcher;
        self
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the configuration and creates an unstarted socket.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidUrl`] or [`crate::Error::UnsupportedScheme`]
    ///   if the URL cannot be resolved
    /// - [`crate::Error::InvalidHeader`] for a malformed header or subprotocol
    pub fn build(self) -> Result<WebSocket> {
        Target::parse(&self.url)?;

        let mut options = self.options;
        for (name, value) in self.headers {
            options.add_header(name, value)?;
        }
        options.validate()?;

        Ok(WebSocket::from_options(self.url, options))
    }
}

// ============================================================================
// Tests
// ============================================================================
