//! Events delivered to socket listeners.
//!
//! Every state change, received message and terminal error becomes an
//! [`Event`]. Listeners are called through an [`EventDispatcher`]: by default
//! inline on the socket's reader task, or handed off through a channel with
//! [`ChannelDispatcher`].
//!
//! # Example
//!
//! ```ignore
//! use wsclient_drafts::{Event, EventKind, WebSocket};
//!
//! let socket = WebSocket::new("ws://localhost:8080/echo");
//! socket.add_listener(|event: &Event| {
//!     if event.kind() == EventKind::Message {
//!         println!("got {}", event.message().unwrap());
//!     }
//! });
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::error::Error;
use crate::message::Message;
use crate::state::ReadyState;

// ============================================================================
// EventKind
// ============================================================================

/// What an [`Event`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The ready state changed.
    ReadyState,
    /// A text or binary message arrived.
    Message,
    /// The connection failed.
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadyState => f.write_str("ready-state"),
            Self::Message => f.write_str("message"),
            Self::Error => f.write_str("error"),
        }
    }
}

// ============================================================================
// Event
// ============================================================================

/// A notification from a socket.
///
/// Cheap to clone; message and error are shared.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    source: Uuid,
    ready_state: ReadyState,
    message: Option<Arc<Message>>,
    error: Option<Arc<Error>>,
}

impl Event {
    pub(crate) fn state_change(source: Uuid, ready_state: ReadyState) -> Self {
        Self {
            kind: EventKind::ReadyState,
            source,
            ready_state,
            message: None,
            error: None,
        }
    }

    pub(crate) fn received(source: Uuid, ready_state: ReadyState, message: Message) -> Self {
        Self {
            kind: EventKind::Message,
            source,
            ready_state,
            message: Some(Arc::new(message)),
            error: None,
        }
    }

    pub(crate) fn failed(source: Uuid, ready_state: ReadyState, error: Arc<Error>) -> Self {
        Self {
            kind: EventKind::Error,
            source,
            ready_state,
            message: None,
            error: Some(error),
        }
    }

    /// What this event reports.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Id of the socket that raised the event.
    #[inline]
    #[must_use]
    pub fn source(&self) -> Uuid {
        self.source
    }

    /// Ready state when the event was raised.
    ///
    /// For [`EventKind::ReadyState`] this is the new state.
    #[inline]
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    /// The received message, for [`EventKind::Message`].
    #[inline]
    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        self.message.as_deref()
    }

    /// The failure, for [`EventKind::Error`].
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_deref()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.kind, self.ready_state)?;
        if let Some(message) = &self.message {
            write!(f, " {} ({} bytes)", message.opcode(), message.len())?;
        }
        if let Some(error) = &self.error {
            write!(f, " {error}")?;
        }
        Ok(())
    }
}

// ============================================================================
// EventListener
// ============================================================================

/// Receives socket events.
///
/// Any `Fn(&Event) + Send + Sync` closure is a listener.
pub trait EventListener: Send + Sync {
    /// Handles one event.
    fn handle_event(&self, event: &Event);
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle_event(&self, event: &Event) {
        self(event);
    }
}

/// Handle returned by `add_listener`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

// ============================================================================
// EventDispatcher
// ============================================================================

/// Decides on which task listeners run.
pub trait EventDispatcher: Send + Sync + fmt::Debug {
    /// Delivers `event` to `listener`.
    fn dispatch(&self, event: &Event, listener: &Arc<dyn EventListener>);
}

/// Calls listeners inline on the task that raised the event.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDispatcher;

impl EventDispatcher for DirectDispatcher {
    fn dispatch(&self, event: &Event, listener: &Arc<dyn EventListener>) {
        listener.handle_event(event);
    }
}

/// One queued delivery.
type Delivery = (Event, Arc<dyn EventListener>);

/// Hands events to a [`DispatchQueue`] drained by the caller.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use wsclient_drafts::{ChannelDispatcher, WebSocket};
///
/// let (dispatcher, queue) = ChannelDispatcher::channel();
/// let socket = WebSocket::builder("ws://localhost:8080/")
///     .dispatcher(Arc::new(dispatcher))
///     .build()?;
/// tokio::spawn(queue.run());
/// ```
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelDispatcher {
    /// Creates a dispatcher and the queue that delivers its events.
    #[must_use]
    pub fn channel() -> (Self, DispatchQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DispatchQueue { rx })
    }
}

impl fmt::Debug for ChannelDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDispatcher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl EventDispatcher for ChannelDispatcher {
    fn dispatch(&self, event: &Event, listener: &Arc<dyn EventListener>) {
        if self.tx.send((event.clone(), Arc::clone(listener))).is_err() {
            trace!(kind = %event.kind(), "Dispatch queue dropped; event discarded");
        }
    }
}

/// Receiving end of a [`ChannelDispatcher`].
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl DispatchQueue {
    /// Waits for one event and delivers it.
    ///
    /// Returns `false` once every dispatcher has been dropped and the queue
    /// is drained.
    pub async fn dispatch_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some((event, listener)) => {
                listener.handle_event(&event);
                true
            }
            None => false,
        }
    }

    /// Delivers events already queued without waiting. Returns how many.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok((event, listener)) = self.rx.try_recv() {
            listener.handle_event(&event);
            delivered += 1;
        }
        delivered
    }

    /// Delivers events until every dispatcher is dropped.
    pub async fn run(mut self) {
        while self.dispatch_next().await {}
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("pending", &self.rx.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener() -> (Arc<AtomicUsize>, Arc<dyn EventListener>) {
        let count = Arc::new(AtomicUsize::new(0));
        let listener: Arc<dyn EventListener> = {
            let count = Arc::clone(&count);
            Arc::new(move |_: &Event| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, listener)
    }

    #[test]
    fn test_event_accessors() {
        let id = Uuid::new_v4();
        let event = Event::received(id, ReadyState::Open, Message::text("hi"));
        assert_eq!(event.kind(), EventKind::Message);
        assert_eq!(event.source(), id);
        assert_eq!(event.message(), Some(&Message::text("hi")));
        assert!(event.error().is_none());
        assert_eq!(event.to_string(), "message [OPEN] text (2 bytes)");
    }

    #[test]
    fn test_error_event_display() {
        let event = Event::failed(
            Uuid::new_v4(),
            ReadyState::Open,
            Arc::new(Error::protocol("bad frame")),
        );
        assert_eq!(event.to_string(), "error [OPEN] Protocol error: bad frame");
    }

    #[test]
    fn test_direct_dispatch_is_inline() {
        let (count, listener) = counting_listener();
        let event = Event::state_change(Uuid::new_v4(), ReadyState::Open);
        DirectDispatcher.dispatch(&event, &listener);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_dispatch_defers() {
        let (dispatcher, mut queue) = ChannelDispatcher::channel();
        let (count, listener) = counting_listener();
        let event = Event::state_change(Uuid::new_v4(), ReadyState::Open);

        dispatcher.dispatch(&event, &listener);
        dispatcher.dispatch(&event, &listener);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert_eq!(queue.dispatch_pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        drop(dispatcher);
        assert!(!queue.dispatch_next().await);
    }
}
