//! # Session (C2)
//!
//! One live WebSocket peer: a send queue, a read-side handler table (owned
//! by the caller, not this module), and a pending-response map keyed by
//! frame sequence id with per-request timers.
//!
//! A `Session` does not own its socket; it owns the write queue feeding it
//! and the bookkeeping for correlated responses. The caller (the HTTP front,
//! C9) drives the actual socket read/write loop and feeds decoded frames in,
//! encoded bytes out.

pub mod registry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub use registry::{ClientRemovalListener, SessionRegistry};

use crate::config::DEFAULT_SESSION_TIMEOUT_MS;
use crate::frame::{Frame, FrameError};

/// Bounded depth of a session's write queue. A single logical write at a
/// time per session; this is the FIFO backing additional enqueues.
const WRITE_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is closed")]
    ConnectionClosed,
    #[error("request timed out")]
    Timeout,
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Invoked at most once with either the decoded response frame or an error.
pub type ResponseCallback = Box<dyn FnOnce(Result<Frame, SessionError>) + Send + 'static>;

/// Per-call overrides for [`Session::send`].
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    pub timeout_ms: u64,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
        }
    }
}

struct PendingEntry {
    callback: Option<ResponseCallback>,
}

/// Identity is the remote endpoint string (host:port). Destroyed on close
/// or drop; background timers hold only weak references so they never
/// extend a session's lifetime past disconnect.
pub struct Session {
    endpoint: String,
    protocol_version: AtomicU64,
    connected: AtomicBool,
    write_tx: mpsc::Sender<Bytes>,
    pending: Mutex<HashMap<[u8; 16], PendingEntry>>,
}

impl Session {
    /// Creates a session and returns the receiving half of its write queue,
    /// which the caller drains to push bytes onto the actual socket.
    pub fn new(endpoint: impl Into<String>) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let session = Arc::new(Self {
            endpoint: endpoint.into(),
            protocol_version: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            write_tx,
            pending: Mutex::new(HashMap::new()),
        });
        (session, write_rx)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn protocol_version(&self) -> u64 {
        self.protocol_version.load(Ordering::Acquire)
    }

    pub fn set_protocol_version(&self, version: u64) {
        self.protocol_version.store(version, Ordering::Release);
    }

    /// Enqueues a frame with no correlated response expected.
    pub async fn send_frame(&self, frame: &Frame, max_payload: usize) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::ConnectionClosed);
        }
        let bytes = frame.encode(max_payload)?;
        self.write_tx
            .send(bytes)
            .await
            .map_err(|_| SessionError::ConnectionClosed)
    }

    /// Enqueues `frame`. If this is a request awaiting a response, a slot
    /// keyed by the frame's sequence id is armed with `options.timeout_ms`
    /// and `callback` is guaranteed to run exactly once: with the decoded
    /// response frame, with `Timeout`, or with `ConnectionClosed`.
    pub fn send(self: &Arc<Self>, frame: Frame, options: SendOptions, max_payload: usize, callback: ResponseCallback) {
        if !self.is_connected() {
            callback(Err(SessionError::ConnectionClosed));
            return;
        }
        let seq = frame.seq;
        let encoded = match frame.encode(max_payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                callback(Err(SessionError::Frame(err)));
                return;
            }
        };
        self.pending.lock().insert(
            seq,
            PendingEntry {
                callback: Some(callback),
            },
        );

        let write_tx = self.write_tx.clone();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            if write_tx.send(encoded).await.is_err() {
                if let Some(session) = weak.upgrade() {
                    session.fire_pending(seq, Err(SessionError::ConnectionClosed));
                }
            }
        });

        let weak = Arc::downgrade(self);
        let timeout = Duration::from_millis(options.timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(session) = weak.upgrade() {
                session.fire_pending(seq, Err(SessionError::Timeout));
            }
        });
    }

    /// Routes an inbound frame to its pending-response slot if its sequence
    /// id matches one (response demultiplexing). Returns `true` if consumed
    /// this way, `false` if the caller should dispatch by `frame.frame_type`
    /// instead.
    pub fn dispatch_response(&self, frame: Frame) -> bool {
        let seq = frame.seq;
        let has_slot = self.pending.lock().contains_key(&seq);
        if has_slot {
            self.fire_pending(seq, Ok(frame));
        }
        has_slot
    }

    fn fire_pending(&self, seq: [u8; 16], result: Result<Frame, SessionError>) {
        let callback = {
            let mut pending = self.pending.lock();
            pending.remove(&seq).and_then(|mut entry| entry.callback.take())
        };
        if let Some(callback) = callback {
            callback(result);
        }
    }

    /// Idempotent: marks the session disconnected, fires every outstanding
    /// callback with `ConnectionClosed`, and drops the write queue.
    pub fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let pending: Vec<_> = self.pending.lock().drain().collect();
            for (_, mut entry) in pending {
                if let Some(callback) = entry.callback.take() {
                    callback(Err(SessionError::ConnectionClosed));
                }
            }
        }
    }
}
