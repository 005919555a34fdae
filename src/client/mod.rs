//! The WebSocket client.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`WebSocket`] | Connection handle: start, send, close, listen |
//! | [`WebSocketBuilder`] | Fluent configuration with validation on build |
//! | [`SocketOptions`] | Configuration frozen at start |
//! | [`Event`] | State change, message or error notification |
//! | [`EventDispatcher`] | Chooses where listeners run |
//!
//! # Example
//!
//! ```no_run
//! use wsclient_drafts::{ReadyState, Result, WebSocket};
//!
//! # async fn example() -> Result<()> {
//! let socket = WebSocket::builder("ws://localhost:8080/echo")
//!     .protocol("echo")
//!     .build()?;
//!
//! socket.add_listener(|event: &wsclient_drafts::Event| println!("{event}"));
//! socket.start()?;
//!
//! if socket.wait_for_ready_state(ReadyState::Open).await == ReadyState::Open {
//!     socket.send_text("hello")?;
//! }
//! socket.close();
//! socket.join().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for sockets.
pub mod builder;

/// Events, listeners and dispatchers.
pub mod event;

/// Per-socket configuration.
pub mod options;

/// The socket handle and its connection tasks.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::WebSocketBuilder;
pub use event::{
    ChannelDispatcher, DirectDispatcher, DispatchQueue, Event, EventDispatcher, EventKind,
    EventListener, ListenerId,
};
pub use options::SocketOptions;
pub use socket::WebSocket;
