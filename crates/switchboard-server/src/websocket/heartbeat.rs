//! Heartbeat ping/pong liveness sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::broadcast::BroadcastManager;
use crate::error::ConnectionError;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Connections that were pinged.
    pub pinged: usize,
    /// Connections terminated for missing the previous ping.
    pub terminated: usize,
}

/// Check every live connection once.
///
/// A connection whose alive flag is still clear from the previous sweep is
/// terminated. Every other connection has its flag cleared and is pinged;
/// its pong sets the flag again before the next sweep.
pub async fn sweep(manager: &BroadcastManager) -> SweepStats {
    let mut stats = SweepStats::default();
    for conn in manager.snapshot().await {
        if conn.is_closed() {
            continue;
        }
        if !conn.check_alive() {
            info!(conn_id = %conn.id, "peer missed heartbeat, terminating");
            conn.terminate(ConnectionError::HeartbeatTimeout);
            stats.terminated += 1;
            continue;
        }
        if conn.ping() {
            stats.pinged += 1;
        } else {
            trace!(conn_id = %conn.id, "ping not queued");
        }
    }
    stats
}

/// Sweep all connections every `interval` until `cancel` fires.
pub async fn run_heartbeat(
    manager: Arc<BroadcastManager>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = sweep(&manager).await;
                if stats.terminated > 0 {
                    debug!(pinged = stats.pinged, terminated = stats.terminated, "heartbeat sweep");
                }
            }
            () = cancel.cancelled() => {
                debug!("heartbeat stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::{ClientConnection, Frame};
    use std::sync::atomic::Ordering;
    use switchboard_core::ConnectionId;
    use tokio::sync::mpsc;

    fn make_connection(id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::from_raw(id), tx, CancellationToken::new());
        (Arc::new(conn), rx)
    }

    #[tokio::test]
    async fn alive_connection_is_pinged_and_cleared() {
        let bm = BroadcastManager::new();
        let (conn, mut rx) = make_connection("c1");
        bm.add(conn.clone()).await;

        let stats = sweep(&bm).await;
        assert_eq!(stats, SweepStats { pinged: 1, terminated: 0 });
        assert!(!conn.is_alive.load(Ordering::Relaxed));
        assert!(matches!(rx.try_recv(), Ok(Frame::Ping)));
    }

    #[tokio::test]
    async fn silent_connection_is_terminated_on_second_sweep() {
        let bm = BroadcastManager::new();
        let (conn, _rx) = make_connection("c1");
        bm.add(conn.clone()).await;

        let _ = sweep(&bm).await;
        assert!(!conn.is_closed());
        let stats = sweep(&bm).await;
        assert_eq!(stats.terminated, 1);
        assert!(conn.is_closed());
        assert!(matches!(
            conn.take_close_reason(),
            Some(ConnectionError::HeartbeatTimeout)
        ));
    }

    #[tokio::test]
    async fn pong_between_sweeps_keeps_connection() {
        let bm = BroadcastManager::new();
        let (conn, _rx) = make_connection("c1");
        bm.add(conn.clone()).await;

        for _ in 0..5 {
            let _ = sweep(&bm).await;
            conn.mark_alive();
        }
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn closed_connections_are_ignored() {
        let bm = BroadcastManager::new();
        let (conn, _rx) = make_connection("c1");
        conn.close();
        bm.add(conn).await;
        assert_eq!(sweep(&bm).await, SweepStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_reaps_within_two_intervals() {
        let bm = Arc::new(BroadcastManager::new());
        let (conn, _rx) = make_connection("c1");
        bm.add(conn.clone()).await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat(
            bm.clone(),
            Duration::from_millis(100),
            cancel.clone(),
        ));

        time::sleep(Duration::from_millis(150)).await;
        assert!(!conn.is_closed());
        time::sleep(Duration::from_millis(100)).await;
        assert!(conn.is_closed());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn loop_stops_on_cancel() {
        let bm = Arc::new(BroadcastManager::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        run_heartbeat(bm, Duration::from_secs(100), cancel).await;
    }
}
