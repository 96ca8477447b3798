//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_settings::ServerSettings;

/// Configuration for a [`SocketServer`](crate::server::SocketServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Route path of the WebSocket endpoint.
    pub ws_path: String,
    /// Time a fresh connection has to complete `auth/login`, in milliseconds.
    pub auth_timeout_ms: u64,
    /// Period of the heartbeat sweep, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Outbound frames buffered per connection before sends start dropping.
    pub send_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/ws".into(),
            auth_timeout_ms: 2_250,
            heartbeat_interval_ms: 3_000,
            send_queue_capacity: 1024,
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            ws_path: settings.ws_path.clone(),
            auth_timeout_ms: settings.auth_timeout_ms,
            heartbeat_interval_ms: settings.heartbeat_interval_ms,
            send_queue_capacity: settings.send_queue_capacity.max(1),
            max_message_size: settings.max_message_size,
        }
    }

    /// Authentication deadline.
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// Heartbeat sweep period. Never zero.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Per-connection outbound queue size. Never zero.
    pub fn send_queue_capacity(&self) -> usize {
        self.send_queue_capacity.max(1)
    }

    /// Set the authentication deadline.
    ///
    /// The heartbeat is raised to 1.5x the deadline when it would otherwise
    /// fire first.
    pub fn set_auth_timeout(&mut self, timeout: Duration) {
        let ms = duration_ms(timeout);
        self.auth_timeout_ms = ms;
        if self.heartbeat_interval_ms < ms {
            self.heartbeat_interval_ms = ms.saturating_mul(3) / 2;
        }
    }

    /// Set the heartbeat period.
    ///
    /// The authentication deadline is lowered to 0.75x the period when it
    /// would otherwise outlast it.
    pub fn set_heartbeat_interval(&mut self, interval: Duration) {
        let ms = duration_ms(interval);
        self.heartbeat_interval_ms = ms;
        if self.auth_timeout_ms > ms {
            self.auth_timeout_ms = ms.saturating_mul(3) / 4;
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.ws_path, "/ws");
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(3));
        assert_eq!(cfg.auth_timeout(), Duration::from_millis(2_250));
    }

    #[test]
    fn auth_deadline_below_heartbeat_by_default() {
        let cfg = ServerConfig::default();
        assert!(cfg.auth_timeout() < cfg.heartbeat_interval());
    }

    #[test]
    fn long_auth_timeout_raises_heartbeat() {
        let mut cfg = ServerConfig::default();
        cfg.set_auth_timeout(Duration::from_secs(4));
        assert_eq!(cfg.auth_timeout_ms, 4_000);
        assert_eq!(cfg.heartbeat_interval_ms, 6_000);
    }

    #[test]
    fn short_auth_timeout_leaves_heartbeat() {
        let mut cfg = ServerConfig::default();
        cfg.set_auth_timeout(Duration::from_millis(500));
        assert_eq!(cfg.auth_timeout_ms, 500);
        assert_eq!(cfg.heartbeat_interval_ms, 3_000);
    }

    #[test]
    fn short_heartbeat_lowers_auth_timeout() {
        let mut cfg = ServerConfig::default();
        cfg.set_heartbeat_interval(Duration::from_secs(1));
        assert_eq!(cfg.heartbeat_interval_ms, 1_000);
        assert_eq!(cfg.auth_timeout_ms, 750);
    }

    #[test]
    fn long_heartbeat_leaves_auth_timeout() {
        let mut cfg = ServerConfig::default();
        cfg.set_heartbeat_interval(Duration::from_secs(10));
        assert_eq!(cfg.auth_timeout_ms, 2_250);
    }

    #[test]
    fn from_settings_copies_fields() {
        let settings = ServerSettings {
            port: 9000,
            heartbeat_interval_ms: 500,
            ..ServerSettings::default()
        };
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.heartbeat_interval_ms, 500);
        assert_eq!(cfg.ws_path, "/ws");
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let cfg = ServerConfig {
            send_queue_capacity: 0,
            heartbeat_interval_ms: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.send_queue_capacity(), 1);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(1));

        let settings = ServerSettings {
            send_queue_capacity: 0,
            ..ServerSettings::default()
        };
        assert_eq!(ServerConfig::from_settings(&settings).send_queue_capacity, 1);
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"host":"10.0.0.1","port":3000,"ws_path":"/socket","auth_timeout_ms":100,"heartbeat_interval_ms":200,"send_queue_capacity":8,"max_message_size":512}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.ws_path, "/socket");
        assert_eq!(cfg.send_queue_capacity, 8);
    }
}
