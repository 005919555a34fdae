//! Wire protocols for the supported WebSocket drafts.
//!
//! Each draft owns its handshake and framing behind the [`WireProtocol`]
//! trait. The draft is picked by value ([`ProtocolDraft`]) before a socket
//! starts and never changes afterwards.
//!
//! # Drafts
//!
//! | Draft | Framing | Close handshake |
//! |-------|---------|-----------------|
//! | [`ProtocolDraft::Draft76`] | `0x00 text 0xFF` sentinel frames, varint length frames | `0xFF 0x00`, then EOF |
//! | [`ProtocolDraft::Draft03`] | 2/4/10 byte header with opcode and length | close frame with cookie echo |
//!
//! Both drafts share the draft76 key/nonce challenge during the HTTP upgrade.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `draft03` | Length-prefixed framing |
//! | `draft76` | Sentinel framing |
//! | `handshake` | Key challenge and upgrade exchange |
//! | `request` | Upgrade request/response types |
//! | `stream` | Line and byte reading primitives |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::error::Result;
use crate::message::{Message, Opcode};
use crate::queue::MessageQueue;
use crate::state::ReadyState;
use crate::transport::Target;

// ============================================================================
// Submodules
// ============================================================================

/// Draft03 length-prefixed framing.
pub mod draft03;

/// Draft76 sentinel framing.
pub mod draft76;

/// Key challenge and upgrade exchange shared by both drafts.
pub mod handshake;

/// Upgrade request and response types.
pub mod request;

/// Stream reading primitives.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use draft03::Draft03Protocol;
pub use draft76::Draft76Protocol;
pub use handshake::HandshakeChallenge;
pub use request::{Headers, ResponseHeaders, UpgradeRequest, UpgradeResponse};

// ============================================================================
// Types
// ============================================================================

/// Buffered input the protocols decode from.
pub type FrameReader = dyn AsyncBufRead + Send + Unpin;

/// Output the protocols encode into.
pub type FrameWriter = dyn AsyncWrite + Send + Unpin;

// ============================================================================
// ProtocolDraft
// ============================================================================

/// Selects which wire protocol a socket speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolDraft {
    /// draft-hixie-thewebsocketprotocol-76.
    #[default]
    Draft76,
    /// draft-ietf-hybi-thewebsocketprotocol-03.
    Draft03,
}

impl ProtocolDraft {
    /// Returns the protocol implementation for this draft.
    #[inline]
    #[must_use]
    pub fn wire_protocol(self) -> &'static dyn WireProtocol {
        match self {
            Self::Draft76 => &Draft76Protocol,
            Self::Draft03 => &Draft03Protocol,
        }
    }
}

impl fmt::Display for ProtocolDraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft76 => f.write_str("draft76"),
            Self::Draft03 => f.write_str("draft03"),
        }
    }
}

// ============================================================================
// SocketContext
// ============================================================================

/// The connection fields a wire protocol reads and writes.
///
/// Implemented by the socket core; protocols never see the socket itself.
pub trait SocketContext: Send + Sync {
    /// Current ready state.
    fn ready_state(&self) -> ReadyState;

    /// Moves to `state` if that is a forward transition.
    fn set_ready_state(&self, state: ReadyState);

    /// Caller-supplied request headers.
    fn request_headers(&self) -> Headers;

    /// Subprotocols to request, in preference order.
    fn requested_protocols(&self) -> Vec<String>;

    /// Whether the server's handshake digest is checked.
    fn verify_handshake(&self) -> bool;

    /// Stores the handshake response headers.
    fn set_response_headers(&self, headers: ResponseHeaders);

    /// Payload of the close frame this side sent, if any.
    fn close_cookie(&self) -> Option<Vec<u8>>;

    /// Remembers the payload of a close frame this side is about to send.
    fn set_close_cookie(&self, cookie: Vec<u8>);

    /// Outbound queue shared with the writer task.
    fn queue(&self) -> &MessageQueue;

    /// Tears the connection down immediately.
    fn abort(&self);
}

// ============================================================================
// WireProtocol
// ============================================================================

/// Handshake and framing for one draft.
///
/// Implementations are stateless; everything per-connection lives behind the
/// [`SocketContext`].
#[async_trait]
pub trait WireProtocol: Send + Sync + fmt::Debug {
    /// The draft this protocol implements.
    fn draft(&self) -> ProtocolDraft;

    /// Returns `true` if messages with `opcode` can be transmitted.
    fn supports(&self, opcode: Opcode) -> bool {
        let _ = opcode;
        true
    }

    /// Runs the HTTP upgrade and challenge, then moves the socket to Open.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Protocol`] for a bad status line or header line
    /// - [`crate::Error::HandshakeMismatch`] if the server reply is wrong
    /// - [`crate::Error::Io`] if the stream ends mid-handshake
    async fn perform_handshake(
        &self,
        socket: &dyn SocketContext,
        target: &Target,
        input: &mut FrameReader,
        output: &mut FrameWriter,
    ) -> Result<()> {
        handshake::perform(socket, target, input, output, &[]).await
    }

    /// Reads the next text or binary message.
    ///
    /// Control frames are handled internally. Returns `None` once the peer
    /// has closed the stream cleanly.
    async fn read_message(
        &self,
        socket: &dyn SocketContext,
        input: &mut FrameReader,
    ) -> Result<Option<Message>>;

    /// Encodes and flushes one message.
    ///
    /// Returns `false` if this was the terminal close frame and the writer
    /// should stop.
    async fn send_message(
        &self,
        socket: &dyn SocketContext,
        output: &mut FrameWriter,
        message: &Message,
    ) -> Result<bool>;

    /// Starts a caller-requested close. Without a close handshake the only
    /// option is to abort.
    fn initiate_close(&self, socket: &dyn SocketContext) {
        socket.abort();
    }
}

// ============================================================================
// Test Support
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
