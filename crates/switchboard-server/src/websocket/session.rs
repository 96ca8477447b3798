//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use switchboard_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::broadcast::BroadcastManager;
use super::connection::{ClientConnection, Frame};
use super::handler::{Disposition, Protocol, handle_message};
use crate::auth::UpgradeRequest;
use crate::error::{ConnectionError, ErrorSink};
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// How long the writer may spend flushing queued frames after close.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a session needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    /// Routes and auth hooks.
    pub protocol: Arc<Protocol>,
    /// Live connection set.
    pub broadcast: Arc<BroadcastManager>,
    /// Login deadline.
    pub auth_timeout: Duration,
    /// Outbound queue depth.
    pub send_queue_capacity: usize,
    /// Optional failure sink.
    pub error_sink: Option<ErrorSink>,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection (with an empty session) for heartbeat and broadcast
/// 2. Starts the authentication deadline
/// 3. Dispatches inbound frames through the protocol state machine
/// 4. Forwards queued replies, broadcasts and pings via the writer task
/// 5. On close, flushes the queue, sends a close frame and unregisters
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    closed: CancellationToken,
    upgrade: Arc<UpgradeRequest>,
    ctx: SessionContext,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Frame>(ctx.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx, closed.clone()));

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    ctx.broadcast.add(connection.clone()).await;

    let writer = tokio::spawn(run_writer(ws_tx, send_rx, closed.clone()));
    let deadline = tokio::spawn(run_auth_deadline(
        connection.clone(),
        ctx.auth_timeout,
        closed.clone(),
    ));

    loop {
        let msg = tokio::select! {
            () = closed.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                connection.terminate(ConnectionError::Transport(e.to_string()));
                break;
            }
            None => {
                debug!("stream ended");
                break;
            }
        };

        let outcome = match msg {
            Message::Text(ref text) => {
                dispatch(text.as_str().as_bytes(), &connection, &ctx, &upgrade, &closed).await
            }
            Message::Binary(ref data) => dispatch(data, &connection, &ctx, &upgrade, &closed).await,
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                continue;
            }
        };

        match outcome {
            Disposition::Continue => {}
            Disposition::Close => {
                connection.close();
                break;
            }
            Disposition::Fail(err) => {
                connection.terminate(err);
                break;
            }
        }
    }

    // Clean up
    connection.close();
    ctx.broadcast.remove(&conn_id).await;
    deadline.abort();
    if tokio::time::timeout(FLUSH_TIMEOUT, writer).await.is_err() {
        warn!("writer did not finish flushing");
    }

    let reason = connection.take_close_reason();
    match &reason {
        Some(err) => {
            warn!(error = %err, "connection closed with error");
            if let Some(sink) = &ctx.error_sink {
                sink(&conn_id, err);
            }
        }
        None => info!("client disconnected"),
    }
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => close_label(reason.as_ref())).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    debug!(
        duration_secs = connection_start.elapsed().as_secs_f64(),
        dropped = connection.drop_count(),
        "session ended"
    );
}

/// Run one inbound frame through the protocol unless the connection closes
/// first.
async fn dispatch(
    payload: &[u8],
    connection: &Arc<ClientConnection>,
    ctx: &SessionContext,
    upgrade: &Arc<UpgradeRequest>,
    closed: &CancellationToken,
) -> Disposition {
    tokio::select! {
        outcome = handle_message(payload, connection, &ctx.protocol, upgrade) => outcome,
        () = closed.cancelled() => Disposition::Close,
    }
}

/// Drain the outbound queue into the socket. After close, frames already
/// queued are flushed before the close frame.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Frame>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            frame = send_rx.recv() => match frame {
                Some(frame) => {
                    if write_frame(&mut ws_tx, frame).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
            () = closed.cancelled() => break,
        }
    }

    send_rx.close();
    while let Ok(frame) = send_rx.try_recv() {
        if write_frame(&mut ws_tx, frame).await.is_err() {
            return;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = ws_tx.close().await;
}

async fn write_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: Frame,
) -> Result<(), axum::Error> {
    let msg = match frame {
        Frame::Text(text) => Message::Text(text.to_string().into()),
        Frame::Ping => Message::Ping(Vec::new().into()),
    };
    ws_tx.send(msg).await
}

/// Close the connection if it has not logged in within `timeout`.
async fn run_auth_deadline(
    connection: Arc<ClientConnection>,
    timeout: Duration,
    closed: CancellationToken,
) {
    tokio::select! {
        () = tokio::time::sleep(timeout) => {
            if !connection.is_authenticated() {
                warn!(conn_id = %connection.id, "authentication deadline elapsed");
                connection.terminate(ConnectionError::AuthTimeout);
            }
        }
        () = closed.cancelled() => {}
    }
}

fn close_label(reason: Option<&ConnectionError>) -> &'static str {
    match reason {
        None => "normal",
        Some(ConnectionError::Transport(_)) => "transport",
        Some(ConnectionError::Decode(_)) => "decode",
        Some(ConnectionError::AuthTimeout) => "auth_timeout",
        Some(ConnectionError::AuthRejected) => "auth_rejected",
        Some(ConnectionError::ProtocolViolation { .. }) => "protocol_violation",
        Some(ConnectionError::HeartbeatTimeout) => "heartbeat_timeout",
        Some(ConnectionError::SlowConsumer { .. }) => "slow_consumer",
    }
}

#[cfg(test)]
mod tests {
    // Full sessions need a real socket and are covered in tests/integration.rs.
    use super::*;
    use serde_json::json;

    fn make_connection(closed: &CancellationToken) -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(ClientConnection::new(ConnectionId::new(), tx, closed.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_terminates_unauthenticated() {
        let closed = CancellationToken::new();
        let conn = make_connection(&closed);
        run_auth_deadline(conn.clone(), Duration::from_millis(50), closed.clone()).await;
        assert!(closed.is_cancelled());
        assert!(matches!(conn.take_close_reason(), Some(ConnectionError::AuthTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_spares_authenticated() {
        let closed = CancellationToken::new();
        let conn = make_connection(&closed);
        conn.set_session(json!({"user": "admin"}));
        run_auth_deadline(conn.clone(), Duration::from_millis(50), closed.clone()).await;
        assert!(!closed.is_cancelled());
    }

    #[tokio::test]
    async fn deadline_ends_with_connection() {
        let closed = CancellationToken::new();
        let conn = make_connection(&closed);
        closed.cancel();
        run_auth_deadline(conn.clone(), Duration::from_secs(3600), closed).await;
        assert!(conn.take_close_reason().is_none());
    }

    #[test]
    fn close_labels_are_distinct() {
        let labels = [
            close_label(None),
            close_label(Some(&ConnectionError::AuthTimeout)),
            close_label(Some(&ConnectionError::AuthRejected)),
            close_label(Some(&ConnectionError::HeartbeatTimeout)),
            close_label(Some(&ConnectionError::SlowConsumer { dropped: 1 })),
            close_label(Some(&ConnectionError::Transport("x".into()))),
        ];
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }
}
