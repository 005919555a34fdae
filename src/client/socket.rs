//! The WebSocket handle and its connection tasks.
//!
//! A started socket runs two tokio tasks:
//!
//! - the reader connects, performs the handshake, starts the writer, then
//!   decodes messages until the stream ends or fails
//! - the writer transmits queued messages until it sends the terminal close
//!   frame or a write fails
//!
//! Either task ending abnormally raises an error event and aborts the
//! connection. The reader ending for any reason aborts it too, which also
//! stops the writer and releases the transport.
//!
//! # Lifecycle
//!
//! ```text
//!   new ──► start ──► CONNECTING ──► OPEN ──► CLOSING ──► CLOSED
//!                          │           │                    ▲
//!                          └───────────┴── abort / error ───┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{BufReader, BufWriter, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::builder::WebSocketBuilder;
use super::event::{Event, EventDispatcher, EventListener, ListenerId};
use super::options::SocketOptions;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::request::PROTOCOL_HEADER;
use crate::protocol::{Headers, ProtocolDraft, ResponseHeaders, SocketContext, WireProtocol};
use crate::queue::MessageQueue;
use crate::state::ReadyState;
use crate::transport::{BoxedTransport, NetConfig, Target};

// ============================================================================
// Constants
// ============================================================================

/// Buffer size for both halves of the transport.
const IO_BUFFER_SIZE: usize = 1500;

// ============================================================================
// Types
// ============================================================================

/// Buffered write half owned by the writer task.
type SocketWriter = BufWriter<WriteHalf<BoxedTransport>>;

/// Listeners with their ids, replaced wholesale on change.
type ListenerSnapshot = Arc<Vec<(ListenerId, Arc<dyn EventListener>)>>;

tokio::task_local! {
    /// Id of the socket whose task is running.
    static CURRENT_SOCKET: Uuid;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskRole {
    Reader,
    Writer,
}

/// Task handles and the abort flag, guarded together.
#[derive(Default)]
struct TaskSet {
    aborted: bool,
    abort_handles: Vec<AbortHandle>,
    join_handles: Vec<(TaskRole, JoinHandle<()>)>,
}

#[derive(Default)]
struct ListenerList {
    next_id: u64,
    entries: ListenerSnapshot,
}

#[derive(Default)]
struct HandshakeResult {
    headers: ResponseHeaders,
    protocol: Option<String>,
}

// ============================================================================
// WebSocketInner
// ============================================================================

/// State shared by the handle and the connection tasks.
pub(crate) struct WebSocketInner {
    /// Log correlation id.
    id: Uuid,
    url: String,
    started: AtomicBool,
    /// Frozen once `started` is set.
    options: Mutex<SocketOptions>,
    state: watch::Sender<ReadyState>,
    response: Mutex<HandshakeResult>,
    close_cookie: Mutex<Option<Vec<u8>>>,
    last_error: Mutex<Option<Arc<Error>>>,
    queue: MessageQueue,
    listeners: Mutex<ListenerList>,
    tasks: Mutex<TaskSet>,
}

impl WebSocketInner {
    fn new(url: String, options: SocketOptions) -> Self {
        let (state, _) = watch::channel(ReadyState::Connecting);
        Self {
            id: Uuid::new_v4(),
            url,
            started: AtomicBool::new(false),
            options: Mutex::new(options),
            state,
            response: Mutex::new(HandshakeResult::default()),
            close_cookie: Mutex::new(None),
            last_error: Mutex::new(None),
            queue: MessageQueue::new(),
            listeners: Mutex::new(ListenerList::default()),
            tasks: Mutex::new(TaskSet::default()),
        }
    }

    // ------------------------------------------------------------------------
    // Reader
    // ------------------------------------------------------------------------

    async fn run_reader(self: Arc<Self>, options: SocketOptions) {
        if let Err(e) = self.run_session(&options).await {
            warn!(socket = %self.id, error = %e, "Connection failed");
            self.signal_error(e);
        }
        self.abort_connection();
    }

    async fn run_session(self: &Arc<Self>, options: &SocketOptions) -> Result<()> {
        let socket: &dyn SocketContext = &**self;

        let target = Target::parse(&self.url)?;
        let factory = options.net_config.factory_for(target.security())?;
        debug!(
            socket = %self.id,
            host = target.host(),
            port = target.port(),
            draft = %options.draft,
            "Connecting"
        );
        let transport = factory.connect(target.host(), target.port()).await?;

        let (read_half, write_half) = tokio::io::split(transport);
        let mut input = BufReader::with_capacity(IO_BUFFER_SIZE, read_half);
        let mut output = BufWriter::with_capacity(IO_BUFFER_SIZE, write_half);

        let protocol = options.draft.wire_protocol();
        protocol
            .perform_handshake(socket, &target, &mut input, &mut output)
            .await?;
        info!(
            socket = %self.id,
            protocol = ?self.response.lock().protocol,
            "WebSocket open"
        );

        self.spawn_writer(protocol, output);

        while let Some(message) = protocol.read_message(socket, &mut input).await? {
            trace!(
                socket = %self.id,
                opcode = %message.opcode(),
                len = message.len(),
                "Message received"
            );
            self.signal_event(Event::received(self.id, self.ready_state(), message));
        }

        debug!(socket = %self.id, "Reader reached end of stream");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Writer
    // ------------------------------------------------------------------------

    fn spawn_writer(self: &Arc<Self>, protocol: &'static dyn WireProtocol, output: SocketWriter) {
        let mut tasks = self.tasks.lock();
        if tasks.aborted {
            return;
        }

        let writer = Arc::clone(self).run_writer(protocol, output);
        let handle = tokio::spawn(CURRENT_SOCKET.scope(self.id, writer));
        tasks.abort_handles.push(handle.abort_handle());
        tasks.join_handles.push((TaskRole::Writer, handle));
    }

    async fn run_writer(self: Arc<Self>, protocol: &'static dyn WireProtocol, mut output: SocketWriter) {
        let socket: &dyn SocketContext = &*self;
        trace!(socket = %self.id, "Writer started");

        while let Some(message) = self.queue.wait_next(None).await {
            match protocol.send_message(socket, &mut output, &message).await {
                Ok(more) => {
                    self.queue.remove(&message);
                    trace!(
                        socket = %self.id,
                        opcode = %message.opcode(),
                        len = message.len(),
                        "Message sent"
                    );
                    if !more {
                        debug!(socket = %self.id, "Close frame sent, writer done");
                        break;
                    }
                }
                Err(e) => {
                    warn!(socket = %self.id, error = %e, "Send failed");
                    self.signal_error(e);
                    self.abort_connection();
                    break;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Cancels both tasks and moves to Closed. Idempotent.
    ///
    /// The transport halves are owned by the tasks and are dropped when the
    /// runtime next polls them, not before this returns. `join` waits for
    /// that.
    fn abort_connection(&self) {
        let first = {
            let mut tasks = self.tasks.lock();
            let first = !tasks.aborted;
            tasks.aborted = true;
            for handle in &tasks.abort_handles {
                handle.abort();
            }
            first
        };

        if first {
            debug!(socket = %self.id, "Connection aborted");
        }
        self.set_ready_state(ReadyState::Closed);
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    fn signal_event(&self, event: Event) {
        let listeners = Arc::clone(&self.listeners.lock().entries);
        if listeners.is_empty() {
            return;
        }

        let dispatcher = Arc::clone(&self.options.lock().dispatcher);
        for (_, listener) in listeners.iter() {
            dispatcher.dispatch(&event, listener);
        }
    }

    fn signal_error(&self, error: Error) {
        if self.tasks.lock().aborted {
            trace!(socket = %self.id, error = %error, "Ignoring error after abort");
            return;
        }

        let error = Arc::new(error);
        *self.last_error.lock() = Some(Arc::clone(&error));
        self.signal_event(Event::failed(self.id, self.ready_state(), error));
    }
}

impl SocketContext for WebSocketInner {
    fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    fn set_ready_state(&self, next: ReadyState) {
        let changed = self.state.send_if_modified(|current| {
            if *current != next && current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });

        if changed {
            debug!(socket = %self.id, state = %next, "Ready state changed");
            self.signal_event(Event::state_change(self.id, next));
        }
    }

    fn request_headers(&self) -> Headers {
        self.options.lock().request_headers.clone()
    }

    fn requested_protocols(&self) -> Vec<String> {
        self.options.lock().protocols.clone()
    }

    fn verify_handshake(&self) -> bool {
        self.options.lock().verify_handshake
    }

    fn set_response_headers(&self, headers: ResponseHeaders) {
        let protocol = headers.get(PROTOCOL_HEADER).cloned();
        *self.response.lock() = HandshakeResult { headers, protocol };
    }

    fn close_cookie(&self) -> Option<Vec<u8>> {
        self.close_cookie.lock().clone()
    }

    fn set_close_cookie(&self, cookie: Vec<u8>) {
        *self.close_cookie.lock() = Some(cookie);
    }

    fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    fn abort(&self) {
        self.abort_connection();
    }
}

// ============================================================================
// WebSocket
// ============================================================================

/// A WebSocket client connection.
///
/// Cloning gives another handle to the same connection. The connection
/// tasks keep running after every handle is dropped, until the peer closes
/// or an error occurs.
///
/// # Example
///
/// ```no_run
/// use wsclient_drafts::{Event, ReadyState, WebSocket};
///
/// # async fn example() -> wsclient_drafts::Result<()> {
/// let socket = WebSocket::new("ws://localhost:8080/echo");
/// socket.add_listener(|event: &Event| {
///     if let Some(message) = event.message() {
///         println!("{message}");
///     }
/// });
///
/// socket.start()?;
/// socket.wait_for_ready_state(ReadyState::Open).await;
/// socket.send_text("Echo me back")?;
/// socket.close();
/// socket.join().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<WebSocketInner>,
}

// ============================================================================
// WebSocket - Construction
// ============================================================================

impl WebSocket {
    /// Creates an unstarted socket with default options.
    ///
    /// The URL is resolved when the socket starts; problems with it are
    /// reported as an error event.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_options(url.into(), SocketOptions::default())
    }

    /// Creates an unstarted socket that requests `protocols`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHeader`] if a subprotocol is empty or contains
    ///   whitespace or control characters
    pub fn with_protocols<I, S>(url: impl Into<String>, protocols: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = SocketOptions {
            protocols: protocols.into_iter().map(Into::into).collect(),
            ..SocketOptions::default()
        };
        Self::with_options(url, options)
    }

    /// Creates an unstarted socket from prepared options.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHeader`] if the options fail
    ///   [`SocketOptions::validate`]
    pub fn with_options(url: impl Into<String>, options: SocketOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::from_options(url.into(), options))
    }

    /// Wraps options that have already been validated.
    pub(crate) fn from_options(url: String, options: SocketOptions) -> Self {
        Self {
            inner: Arc::new(WebSocketInner::new(url, options)),
        }
    }

    /// Returns a builder for `url`.
    #[inline]
    #[must_use]
    pub fn builder(url: impl Into<String>) -> WebSocketBuilder {
        WebSocketBuilder::new(url)
    }
}

// ============================================================================
// WebSocket - Configuration
// ============================================================================

impl WebSocket {
    /// Runs `apply` on the options if the socket has not started.
    fn configure<T>(
        &self,
        operation: &'static str,
        apply: impl FnOnce(&mut SocketOptions) -> Result<T>,
    ) -> Result<T> {
        let mut options = self.inner.options.lock();
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(Error::already_started(operation));
        }
        apply(&mut options)
    }

    /// Adds a header to the upgrade request.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] after [`start`](Self::start)
    /// - [`Error::InvalidHeader`] if the name contains CR, LF or `:`, or the
    ///   value contains CR or LF
    pub fn add_request_header(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.configure("add_request_header", |options| options.add_header(name, value))
    }

    /// Enables or disables the handshake digest check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] after [`start`](Self::start).
    pub fn set_verify_handshake(&self, verify: bool) -> Result<()> {
        self.configure("set_verify_handshake", |options| {
            options.verify_handshake = verify;
            Ok(())
        })
    }

    /// Replaces the transport factories.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] after [`start`](Self::start).
    pub fn set_net_config(&self, net_config: NetConfig) -> Result<()> {
        self.configure("set_net_config", |options| {
            options.net_config = net_config;
            Ok(())
        })
    }

    /// Selects the wire protocol draft.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] after [`start`](Self::start).
    pub fn set_draft(&self, draft: ProtocolDraft) -> Result<()> {
        self.configure("set_draft", |options| {
            options.draft = draft;
            Ok(())
        })
    }

    /// Replaces the event dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] after [`start`](Self::start).
    pub fn set_dispatcher(&self, dispatcher: Arc<dyn EventDispatcher>) -> Result<()> {
        self.configure("set_dispatcher", |options| {
            options.dispatcher = dispatcher;
            Ok(())
        })
    }
}

// ============================================================================
// WebSocket - Accessors
// ============================================================================

impl WebSocket {
    /// Id used to correlate this socket's log lines and events.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The URL this socket connects to.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current ready state.
    #[inline]
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.inner.ready_state()
    }

    /// Selected wire protocol draft.
    #[must_use]
    pub fn draft(&self) -> ProtocolDraft {
        self.inner.options.lock().draft
    }

    /// Returns `true` once [`start`](Self::start) has been called.
    #[inline]
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Subprotocol the server selected, once the handshake has completed.
    #[must_use]
    pub fn protocol(&self) -> Option<String> {
        self.inner.response.lock().protocol.clone()
    }

    /// Handshake response headers, keyed by lowercased name.
    #[must_use]
    pub fn response_headers(&self) -> ResponseHeaders {
        self.inner.response.lock().headers.clone()
    }

    /// Caller request headers.
    #[must_use]
    pub fn request_headers(&self) -> Headers {
        self.inner.request_headers()
    }

    /// Subprotocols requested.
    #[must_use]
    pub fn requested_protocols(&self) -> Vec<String> {
        self.inner.requested_protocols()
    }

    /// Whether the handshake digest is checked.
    #[must_use]
    pub fn verify_handshake(&self) -> bool {
        self.inner.verify_handshake()
    }

    /// Payload bytes queued but not yet written.
    #[inline]
    #[must_use]
    pub fn buffered_amount(&self) -> u64 {
        self.inner.queue.bytes()
    }

    /// Messages queued but not yet written.
    #[inline]
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.depth()
    }

    /// The outbound queue.
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &MessageQueue {
        &self.inner.queue
    }

    /// The error that ended the connection, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.inner.last_error.lock().clone()
    }
}

// ============================================================================
// WebSocket - Listeners
// ============================================================================

impl WebSocket {
    /// Registers a listener for all events.
    ///
    /// Listeners added while an event is being delivered see the next one.
    pub fn add_listener<L>(&self, listener: L) -> ListenerId
    where
        L: EventListener + 'static,
    {
        let mut list = self.inner.listeners.lock();
        let id = ListenerId(list.next_id);
        list.next_id += 1;
        Arc::make_mut(&mut list.entries).push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut list = self.inner.listeners.lock();
        let Some(index) = list.entries.iter().position(|(entry, _)| *entry == id) else {
            return false;
        };
        Arc::make_mut(&mut list.entries).remove(index);
        true
    }

    /// Removes every listener.
    pub fn remove_all_listeners(&self) {
        self.inner.listeners.lock().entries = Arc::default();
    }
}

// ============================================================================
// WebSocket - Lifecycle
// ============================================================================

impl WebSocket {
    /// Starts connecting in the background.
    ///
    /// Calling it again is a no-op. Progress is reported through events
    /// and [`ready_state`](Self::ready_state).
    ///
    /// # Errors
    ///
    /// - [`Error::Usage`] outside a Tokio runtime
    /// - [`Error::ConnectionClosed`] if the socket was aborted before start
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::usage("start() must be called within a Tokio runtime"))?;

        let options = {
            let options = self.inner.options.lock();
            if self.inner.started.swap(true, Ordering::SeqCst) {
                trace!(socket = %self.inner.id, "Already started");
                return Ok(());
            }
            options.clone()
        };

        let mut tasks = self.inner.tasks.lock();
        if tasks.aborted {
            return Err(Error::ConnectionClosed);
        }

        info!(socket = %self.inner.id, url = %self.inner.url, draft = %options.draft, "Starting");
        let reader = Arc::clone(&self.inner).run_reader(options);
        let handle = runtime.spawn(CURRENT_SOCKET.scope(self.inner.id, reader));
        tasks.abort_handles.push(handle.abort_handle());
        tasks.join_handles.push((TaskRole::Reader, handle));
        Ok(())
    }

    /// Starts an orderly close.
    ///
    /// Only an open socket runs the close handshake; in any other state this
    /// aborts.
    pub fn close(&self) {
        let state = self.ready_state();
        if state != ReadyState::Open {
            debug!(socket = %self.inner.id, %state, "Close outside OPEN, aborting");
            self.abort();
            return;
        }

        let draft = self.draft();
        debug!(socket = %self.inner.id, %draft, "Starting close handshake");
        draft.wire_protocol().initiate_close(&*self.inner);
    }

    /// Cancels the connection tasks and moves to Closed.
    ///
    /// Safe to call repeatedly and from several tasks at once.
    ///
    /// The transport is closed when the runtime drops the cancelled tasks,
    /// which can happen after this returns. A listener running on the
    /// reader task delays it until the callback finishes. Use
    /// [`shutdown`](Self::shutdown) to wait until the transport is gone.
    pub fn abort(&self) {
        self.inner.abort_connection();
    }

    /// Waits for the connection tasks to finish.
    ///
    /// Returns at once if the socket never started or if called from one of
    /// the socket's own tasks (a listener, for example).
    pub async fn join(&self) {
        if !self.is_started() {
            return;
        }
        if CURRENT_SOCKET
            .try_with(|socket| *socket == self.inner.id)
            .unwrap_or(false)
        {
            trace!(socket = %self.inner.id, "join() from inside the socket, skipping");
            return;
        }

        self.wait_for_ready_state(ReadyState::Closed).await;

        let handles = std::mem::take(&mut self.inner.tasks.lock().join_handles);
        for (role, handle) in handles {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                warn!(socket = %self.inner.id, ?role, "Socket task panicked");
            }
        }
    }

    /// Aborts, then waits for the connection tasks to finish.
    ///
    /// When this returns the transport has been dropped.
    pub async fn shutdown(&self) {
        self.abort();
        self.join().await;
    }

    /// Waits until the ready state reaches `target` or a later state.
    ///
    /// Returns the state observed, which is `Closed` if the connection
    /// failed before reaching `target`.
    pub async fn wait_for_ready_state(&self, target: ReadyState) -> ReadyState {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|state| *state >= target).await {
            Ok(state) => *state,
            Err(_) => self.ready_state(),
        }
    }

    /// Like [`wait_for_ready_state`](Self::wait_for_ready_state) with a time
    /// limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if `target` is not reached in time.
    pub async fn wait_for_ready_state_timeout(
        &self,
        target: ReadyState,
        limit: Duration,
    ) -> Result<ReadyState> {
        timeout(limit, self.wait_for_ready_state(target))
            .await
            .map_err(|_| {
                Error::timeout(
                    format!("waiting for {target}"),
                    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                )
            })
    }
}

// ============================================================================
// WebSocket - Sending
// ============================================================================

impl WebSocket {
    /// Queues a message behind everything already queued.
    ///
    /// Messages may be queued while connecting; they are sent once the
    /// handshake completes.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] once closing or closed
    /// - [`Error::UnsupportedOpcode`] if the draft cannot send the message
    pub fn send(&self, message: Message) -> Result<()> {
        self.enqueue(message, false)
    }

    /// Queues a message ahead of ordinary traffic.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn send_immediate(&self, message: Message) -> Result<()> {
        self.enqueue(message, true)
    }

    /// Queues a text message.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::text(text))
    }

    /// Queues a binary message.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send); draft76 cannot send binary.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::binary(data))
    }

    fn enqueue(&self, message: Message, head: bool) -> Result<()> {
        if self.ready_state() >= ReadyState::Closing {
            return Err(Error::ConnectionClosed);
        }
        let draft = self.draft();
        if !draft.wire_protocol().supports(message.opcode()) {
            return Err(Error::unsupported_opcode(message.opcode(), draft));
        }

        trace!(
            socket = %self.inner.id,
            opcode = %message.opcode(),
            len = message.len(),
            head,
            "Queueing message"
        );
        if head {
            self.inner.queue.add_head(message);
        } else {
            self.inner.queue.add_tail(message);
        }
        Ok(())
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("ready_state", &self.ready_state())
            .field("queue", &self.inner.queue)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
