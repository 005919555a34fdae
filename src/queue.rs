//! Outbound message queue.
//!
//! Messages are put on the tail for ordinary traffic or on the head for
//! control replies that must overtake it. Head inserts keep their own FIFO
//! order: `p2` lands behind `p1` but ahead of every tail entry.
//!
//! The writer task peeks at the front, transmits it, and only then removes
//! it, so a failed send leaves the message in place.
//!
//! # Ordering
//!
//! ```text
//! add_head(p2)  ┌────┬────┬────┐   add_tail(t3)
//!    ───────►   │ p1 │ t1 │ t2 │  ◄───────
//!               └────┴────┴────┘
//!                 ▲
//!                 └── wait_next() / remove()
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};

use crate::message::Message;

// ============================================================================
// QueueState
// ============================================================================

/// Queue contents and the counters derived from them.
///
/// Both are only ever changed together under the same lock.
#[derive(Default)]
struct QueueState {
    messages: VecDeque<Arc<Message>>,
    /// Leading entries that were inserted at the head.
    priority: usize,
    bytes: u64,
}

// ============================================================================
// MessageQueue
// ============================================================================

/// Thread-safe, order-preserving outbound mailbox.
#[derive(Default)]
pub struct MessageQueue {
    /// Messages and byte counter.
    state: Mutex<QueueState>,
    /// Signalled when the queue goes from empty to non-empty.
    not_empty: Notify,
}

impl MessageQueue {
    /// Creates an empty queue.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued messages.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Approximate number of payload bytes queued.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.state.lock().bytes
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().messages.is_empty()
    }

    /// Queues a message ahead of all ordinary (tail) traffic.
    pub fn add_head(&self, message: Message) -> Arc<Message> {
        self.insert(message, true)
    }

    /// Queues a message behind everything already queued.
    pub fn add_tail(&self, message: Message) -> Arc<Message> {
        self.insert(message, false)
    }

    fn insert(&self, message: Message, head: bool) -> Arc<Message> {
        let message = Arc::new(message);
        let was_empty = {
            let mut state = self.state.lock();
            let was_empty = state.messages.is_empty();
            state.bytes += message.len() as u64;
            if head {
                let index = state.priority;
                state.messages.insert(index, Arc::clone(&message));
                state.priority += 1;
            } else {
                state.messages.push_back(Arc::clone(&message));
            }
            was_empty
        };

        if was_empty {
            self.not_empty.notify_waiters();
        }
        message
    }

    /// Returns the next message without removing it.
    #[must_use]
    pub fn peek_next(&self) -> Option<Arc<Message>> {
        self.state.lock().messages.front().cloned()
    }

    /// Waits for the next message without removing it.
    ///
    /// With no deadline this only returns once a message is available. With a
    /// deadline it returns `None` if the queue is still empty when it passes.
    pub async fn wait_next(&self, deadline: Option<Instant>) -> Option<Arc<Message>> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            // Register before checking so an insert between the check and the
            // await is not missed.
            notified.as_mut().enable();

            if let Some(next) = self.peek_next() {
                return Some(next);
            }

            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, notified).await.is_err() {
                        return self.peek_next();
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Removes the first entry that is this exact message.
    ///
    /// Identity, not equality, is compared so that two equal payloads queued
    /// separately are removed one at a time.
    pub fn remove(&self, message: &Arc<Message>) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state
            .messages
            .iter()
            .position(|queued| Arc::ptr_eq(queued, message))
        else {
            return false;
        };

        state.messages.remove(index);
        if index < state.priority {
            state.priority -= 1;
        }
        state.bytes -= message.len() as u64;
        true
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MessageQueue")
            .field("depth", &state.messages.len())
            .field("bytes", &state.bytes)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
