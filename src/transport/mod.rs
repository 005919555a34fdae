//! Byte-stream transports a WebSocket runs over.
//!
//! The socket core never opens connections itself. It resolves the URL into
//! a [`Target`], asks the matching [`TransportFactory`] from the socket's
//! [`NetConfig`] for a stream, and splits it into a read and a write half.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  Target   ┌──────────────────┐  BoxedTransport
//! │  WebSocket   │──────────►│ TransportFactory │──────────────────►  reader / writer
//! │  (url)       │           │ plain | secure   │                     tasks
//! └──────────────┘           └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `net` | TCP and TLS factories, [`NetConfig`] |
//! | `target` | URL resolution |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// TCP and TLS transport factories.
pub mod net;

/// URL resolution.
pub mod target;

// ============================================================================
// Re-exports
// ============================================================================

pub use net::{NetConfig, TcpTransportFactory, TlsTransportFactory};
pub use target::{Security, Target};

// ============================================================================
// Traits
// ============================================================================

/// A connected, bidirectional byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// Owned transport handed to the socket core.
pub type BoxedTransport = Box<dyn Transport>;

/// Opens transports to a host and port.
///
/// Implement this to run sockets over something other than the default TCP
/// and rustls streams (a proxy, an in-memory pipe in tests).
#[async_trait]
pub trait TransportFactory: Send + Sync + fmt::Debug {
    /// Connects to `host:port`.
    ///
    /// `host` is a DNS name or an IP literal without brackets.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] or [`crate::Error::Tls`] if the
    /// connection cannot be established.
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedTransport>;
}
