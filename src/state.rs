//! Connection ready state.

use std::fmt;

/// Lifecycle state of a WebSocket, named after the HTML5 `readyState`.
///
/// States only move forward: `Connecting → Open → Closing → Closed`, with
/// `Closed` reachable from anywhere and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ReadyState {
    /// Transport or handshake in progress.
    #[default]
    Connecting,
    /// Handshake complete; messages flow both ways.
    Open,
    /// A close handshake has started.
    Closing,
    /// Transport released. Terminal.
    Closed,
}

impl ReadyState {
    /// Returns `true` if moving from `self` to `next` is allowed.
    ///
    /// Staying in the same state is allowed (and is a no-op).
    #[inline]
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self != Self::Closed && next >= self
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
