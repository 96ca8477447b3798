//! Live connection set and broadcast fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde_json::Value;
use switchboard_core::{ConnectionId, Reply, RequestName, encode};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::error::ConnectionError;
use crate::metrics::{SOCKET_BROADCASTS_TOTAL, WS_BROADCAST_DROPS_TOTAL};

/// Frames a connection may drop before a broadcast disconnects it.
const MAX_DROPPED_FRAMES: u64 = 256;

/// Owns the set of live connections and fans broadcasts out over it.
pub struct BroadcastManager {
    /// Connected clients indexed by connection ID.
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    /// Last broadcast sequence handed out.
    sequence: AtomicU64,
}

impl BroadcastManager {
    /// Create a new broadcast manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, connection_id: &ConnectionId) {
        let mut conns = self.connections.write().await;
        let _ = conns.remove(connection_id);
    }

    /// Look up a live connection.
    pub async fn get(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of live connections that have logged in.
    pub async fn authenticated_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.is_authenticated())
            .count()
    }

    /// Clone out the current connection set.
    pub async fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Close every live connection.
    pub async fn close_all(&self) {
        for conn in self.connections.read().await.values() {
            conn.close();
        }
    }

    /// Sequence the next broadcast will carry.
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Push `payload` on `channel` to every authenticated, open connection.
    ///
    /// With a `group`, only members of that group receive it. `exclude`
    /// skips one connection (typically the emitter). Sends never block: a
    /// connection whose queue is full misses the frame, and one that keeps
    /// missing frames is disconnected.
    ///
    /// Returns the number of connections the frame was queued for.
    pub async fn broadcast(
        &self,
        channel: impl Into<RequestName>,
        group: Option<&str>,
        payload: Value,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let reply = Reply::broadcast(
            channel,
            group.map(str::to_owned),
            self.next_sequence(),
            payload,
        );
        let json = match encode(&reply) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(channel = %reply.info.request, error = %e, "failed to serialize broadcast");
                return 0;
            }
        };
        counter!(SOCKET_BROADCASTS_TOTAL).increment(1);

        let conns = self.connections.read().await;
        let mut delivered = 0;
        for conn in conns.values() {
            if exclude == Some(&conn.id) || conn.is_closed() || !conn.is_authenticated() {
                continue;
            }
            if let Some(g) = group {
                if !conn.in_group(g) {
                    continue;
                }
            }
            if conn.send(json.clone()) {
                delivered += 1;
            } else {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                let dropped = conn.drop_count();
                warn!(conn_id = %conn.id, dropped, "failed to queue broadcast");
                if dropped >= MAX_DROPPED_FRAMES {
                    conn.terminate(ConnectionError::SlowConsumer { dropped });
                }
            }
        }
        debug!(
            channel = %reply.info.request,
            group,
            sequence = reply.info.sequence,
            delivered,
            "broadcast"
        );
        delivered
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}
