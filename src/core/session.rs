//! Per-connection session state and outbound buffering.
//!
//! A [`Session`] adapts push-style result production from any number of
//! concurrent provider calls into a single ordered stream with exactly one
//! consumer: the [`OutboundReceiver`] drained by the connection's sender task.
//!
//! All mutable state (lifecycle, outbound sender, active call handles) lives
//! behind one mutex so that teardown and emission can never interleave: once
//! the buffer is closed, [`Session::emit`] is a silent no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default outbound depth at which a slow-consumer warning is logged
pub const DEFAULT_OUTBOUND_WARN_DEPTH: usize = 1024;

/// Opaque identifier of one open client connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier (UUID v4)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Session lifecycle: `Open -> Closing -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// A single item delivered to the client, one text frame each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutput {
    /// Interim transcription
    Partial { text: String },
    /// Completed transcription for a chunk or utterance
    Final { text: String },
    /// Server-originated notice (e.g. unknown message type)
    SystemNotice { text: String },
    /// A provider call failed
    ProviderError { message: String },
}

impl RelayOutput {
    pub fn system_notice(text: impl Into<String>) -> Self {
        Self::SystemNotice { text: text.into() }
    }
}

/// Wire format of outbound frames
impl fmt::Display for RelayOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayOutput::Partial { text } => write!(f, "partial: {text}"),
            RelayOutput::Final { text } => write!(f, "final: {text}"),
            RelayOutput::SystemNotice { text } => write!(f, "[system] {text}"),
            RelayOutput::ProviderError { message } => write!(f, "[error] {message}"),
        }
    }
}

/// Cancellable handle for one in-flight provider call
#[derive(Debug, Clone)]
pub struct CallHandle {
    id: u64,
    token: CancellationToken,
}

impl CallHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
        }
    }

    /// Per-session sequence number of the chunk this call was started for
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request cancellation. Never blocks and is safe to call repeatedly.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`CallHandle::cancel`] has been called
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Shared depth counter between the session and its receiver.
struct BufferDepth {
    connection_id: ConnectionId,
    current: AtomicUsize,
    warn_at: usize,
    warned: AtomicBool,
}

impl BufferDepth {
    fn increment(&self) {
        let depth = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        if depth >= self.warn_at && !self.warned.swap(true, Ordering::AcqRel) {
            warn!(
                connection_id = %self.connection_id,
                depth,
                "Outbound buffer is backing up, client is consuming slowly"
            );
        }
    }

    fn decrement(&self) {
        let previous = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d.saturating_sub(1)))
            .unwrap_or(0);
        if previous.saturating_sub(1) < self.warn_at {
            self.warned.store(false, Ordering::Release);
        }
    }

    fn get(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }
}

/// Consumer side of a session's outbound buffer.
///
/// Yields outputs strictly in enqueue order and returns `None` only after the
/// buffer was closed and every item buffered before the close was delivered.
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<RelayOutput>,
    depth: Arc<BufferDepth>,
}

impl fmt::Debug for OutboundReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundReceiver")
            .field("connection_id", &self.depth.connection_id)
            .field("depth", &self.depth.get())
            .finish()
    }
}

impl OutboundReceiver {
    pub async fn recv(&mut self) -> Option<RelayOutput> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.depth.decrement();
        }
        item
    }

    pub fn try_recv(&mut self) -> Result<RelayOutput, mpsc::error::TryRecvError> {
        let item = self.rx.try_recv()?;
        self.depth.decrement();
        Ok(item)
    }

    /// Number of outputs currently buffered
    pub fn depth(&self) -> usize {
        self.depth.get()
    }
}

struct SessionInner {
    state: SessionState,
    outbound: Option<mpsc::UnboundedSender<RelayOutput>>,
    calls: HashMap<u64, CallHandle>,
}

/// Server-side state of one open client connection
pub struct Session {
    id: ConnectionId,
    inner: Mutex<SessionInner>,
    depth: Arc<BufferDepth>,
    next_call_id: AtomicU64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("active_calls", &inner.calls.len())
            .field("depth", &self.depth.get())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(id: ConnectionId, warn_depth: usize) -> (Arc<Self>, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(BufferDepth {
            connection_id: id.clone(),
            current: AtomicUsize::new(0),
            warn_at: warn_depth.max(1),
            warned: AtomicBool::new(false),
        });

        let session = Arc::new(Self {
            id,
            inner: Mutex::new(SessionInner {
                state: SessionState::Open,
                outbound: Some(tx),
                calls: HashMap::new(),
            }),
            depth: depth.clone(),
            next_call_id: AtomicU64::new(0),
        });

        (session, OutboundReceiver { rx, depth })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Number of provider calls still registered with this session
    pub fn active_calls(&self) -> usize {
        self.inner.lock().calls.len()
    }

    /// Outputs emitted but not yet taken by the receiver
    pub fn buffered(&self) -> usize {
        self.depth.get()
    }

    /// Enqueue an output for the client without blocking.
    ///
    /// Returns `false` when the output was discarded because the buffer is
    /// closed or its consumer has gone away. Never an error.
    pub fn emit(&self, output: RelayOutput) -> bool {
        let inner = self.inner.lock();
        let Some(tx) = inner.outbound.as_ref() else {
            debug!(connection_id = %self.id, "Session torn down, dropping output");
            return false;
        };

        self.depth.increment();
        if tx.send(output).is_err() {
            self.depth.decrement();
            debug!(connection_id = %self.id, "Outbound sender stopped, dropping output");
            return false;
        }
        true
    }

    /// Register a new provider call. Returns `None` once the session has
    /// started closing.
    pub(crate) fn register_call(&self) -> Option<CallHandle> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Open {
            return None;
        }
        let handle = CallHandle::new(self.next_call_id.fetch_add(1, Ordering::Relaxed));
        inner.calls.insert(handle.id, handle.clone());
        Some(handle)
    }

    /// Forget a call that ran to completion. Unknown ids are ignored.
    pub(crate) fn finish_call(&self, call_id: u64) {
        self.inner.lock().calls.remove(&call_id);
    }

    /// Move to `Closing` and cancel every active call without waiting for the
    /// provider. Returns the number of calls cancelled.
    pub(crate) fn cancel_calls(&self) -> usize {
        let calls = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Open {
                inner.state = SessionState::Closing;
            }
            std::mem::take(&mut inner.calls)
        };

        for handle in calls.values() {
            handle.cancel();
        }
        calls.len()
    }

    /// Mark the buffer complete and move to `Closed`. Items already buffered
    /// are still delivered to the receiver.
    pub(crate) fn close_buffer(&self) {
        let mut inner = self.inner.lock();
        inner.state = SessionState::Closed;
        inner.outbound.take();
    }
}
