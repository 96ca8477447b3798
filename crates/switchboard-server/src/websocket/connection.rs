//! Per-connection state: the outbound queue and the protocol session.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use switchboard_core::{ConnectionId, Reply, encode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ConnectionError;

/// Frame queued for the connection's writer task.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Serialized envelope.
    Text(Arc<String>),
    /// Transport-level ping.
    Ping,
}

/// Authentication payload and group memberships of one connection.
///
/// `data` being `Some` is what "authenticated" means.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Payload set by the authenticator.
    pub data: Option<Value>,
    /// Joined groups.
    pub groups: HashSet<String>,
}

impl Session {
    /// Whether login has completed.
    pub fn is_authenticated(&self) -> bool {
        self.data.is_some()
    }
}

/// A connected WebSocket peer.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the writer task.
    tx: mpsc::Sender<Frame>,
    session: RwLock<Session>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the peer has answered the last ping.
    pub is_alive: AtomicBool,
    /// Count of frames dropped due to a full queue.
    pub dropped_messages: AtomicU64,
    closed: CancellationToken,
    close_reason: Mutex<Option<ConnectionError>>,
}

impl ClientConnection {
    /// Create a connection. `closed` is cancelled when the connection closes.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Frame>, closed: CancellationToken) -> Self {
        Self {
            id,
            tx,
            session: RwLock::new(Session::default()),
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
            closed,
            close_reason: Mutex::new(None),
        }
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Queue a serialized frame.
    ///
    /// Returns `false` if the queue is full or the connection is gone, and
    /// increments the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.tx.try_send(Frame::Text(message)).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue a reply.
    pub fn send_reply(&self, reply: &Reply) -> bool {
        match encode(reply) {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize reply");
                false
            }
        }
    }

    /// Queue a transport-level ping.
    pub fn ping(&self) -> bool {
        !self.is_closed() && self.tx.try_send(Frame::Ping).is_ok()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    // ── Liveness ────────────────────────────────────────────────────

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Read and clear the alive flag.
    ///
    /// Returns `true` if the peer answered since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    // ── Session ─────────────────────────────────────────────────────

    /// Whether login has completed.
    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_authenticated()
    }

    /// Store the authentication payload. `null` leaves the connection
    /// unauthenticated.
    pub fn set_session(&self, data: Value) {
        self.session.write().data = (!data.is_null()).then_some(data);
    }

    /// Authentication payload, if logged in.
    pub fn session_data(&self) -> Option<Value> {
        self.session.read().data.clone()
    }

    /// Copy of the full session.
    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    /// Add a group. Returns `false` if already a member.
    pub fn join(&self, group: &str) -> bool {
        self.session.write().groups.insert(group.to_owned())
    }

    /// Remove a group. Returns `false` if it was not a member.
    pub fn leave(&self, group: &str) -> bool {
        self.session.write().groups.remove(group)
    }

    /// Remove every group.
    pub fn leave_all(&self) {
        self.session.write().groups.clear();
    }

    /// Whether the session belongs to `group`.
    pub fn in_group(&self, group: &str) -> bool {
        self.session.read().groups.contains(group)
    }

    // ── Close ───────────────────────────────────────────────────────

    /// Close the connection.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Close the connection, recording why. The first reason wins.
    pub fn terminate(&self, reason: ConnectionError) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() && !self.closed.is_cancelled() {
                *slot = Some(reason);
            }
        }
        self.closed.cancel();
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled on close.
    pub fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    /// Take the recorded close reason, if any.
    pub fn take_close_reason(&self) -> Option<ConnectionError> {
        self.close_reason.lock().take()
    }
}
