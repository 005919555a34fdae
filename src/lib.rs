//! WebSocket client for the legacy draft76 and draft03 wire protocols.
//!
//! Speaks the pre-RFC 6455 protocols still found on embedded devices and
//! older servers: the draft76 (hixie) key/nonce handshake with sentinel
//! framed text, and the draft03 (hybi) framing with opcodes, ping/pong and a
//! cookie-based close handshake.
//!
//! # Architecture
//!
//! Each started [`WebSocket`] runs two tasks:
//!
//! - **Reader**: connects, performs the handshake, then decodes inbound
//!   frames and raises events
//! - **Writer**: drains the outbound [`MessageQueue`] and encodes frames
//!
//! Framing and handshake rules live behind the [`WireProtocol`] trait, one
//! stateless implementation per [`ProtocolDraft`]. Transports come from a
//! [`transport::TransportFactory`], TCP or rustls by default.
//!
//! # Quick Start
//!
//! ```no_run
//! use wsclient_drafts::{Event, ProtocolDraft, ReadyState, Result, WebSocket};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let socket = WebSocket::builder("ws://localhost:8080/echo")
//!         .draft(ProtocolDraft::Draft76)
//!         .header("Origin", "http://localhost")
//!         .build()?;
//!
//!     socket.add_listener(|event: &Event| {
//!         if let Some(message) = event.message() {
//!             println!("received: {message}");
//!         }
//!     });
//!
//!     socket.start()?;
//!     socket.wait_for_ready_state(ReadyState::Open).await;
//!     socket.send_text("Echo me back")?;
//!
//!     socket.close();
//!     socket.join().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`WebSocket`], builder, options, events |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`message`] | [`Message`] and [`Opcode`] |
//! | [`protocol`] | Handshake and framing per draft |
//! | [`queue`] | Outbound [`MessageQueue`] |
//! | [`state`] | [`ReadyState`] |
//! | [`transport`] | TCP/TLS transports and URL resolution |

// ============================================================================
// Modules
// ============================================================================

/// The WebSocket client: socket handle, builder, options and events.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Message type and opcodes.
pub mod message;

/// Wire protocols: HTTP upgrade, challenge, framing.
pub mod protocol;

/// Outbound message queue.
pub mod queue;

/// Connection ready state.
pub mod state;

/// Transport factories and URL resolution.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    ChannelDispatcher, DirectDispatcher, DispatchQueue, Event, EventDispatcher, EventKind,
    EventListener, ListenerId, SocketOptions, WebSocket, WebSocketBuilder,
};

// Error types
pub use error::{Error, Result};

// Message types
pub use message::{Message, Opcode};

// Protocol types
pub use protocol::{ProtocolDraft, SocketContext, WireProtocol};

// Queue and state
pub use queue::MessageQueue;
pub use state::ReadyState;

// Transport types
pub use transport::NetConfig;
