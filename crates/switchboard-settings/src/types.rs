//! Settings types.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Server listener and timers.
    pub server: ServerSettings,
    /// Client address and reconnect policy.
    pub client: ClientSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Settings {
    /// Reject combinations the protocol cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be > 0".into(),
            ));
        }
        if self.server.auth_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.authTimeoutMs must be > 0".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be > 0".into(),
            ));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.wsPath must start with '/': {}",
                self.server.ws_path
            )));
        }
        Ok(())
    }
}

/// Server network and timer settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Route path of the WebSocket endpoint.
    pub ws_path: String,
    /// Time a new connection has to log in, in milliseconds.
    pub auth_timeout_ms: u64,
    /// Heartbeat sweep period in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Per-connection outbound queue depth.
    pub send_queue_capacity: usize,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            ws_path: "/ws".to_string(),
            auth_timeout_ms: 2_250,
            heartbeat_interval_ms: 3_000,
            send_queue_capacity: 1024,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Client connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server WebSocket URL.
    pub url: String,
    /// Delay before an automatic reconnect, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Upper bound on a single connect attempt, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3000/ws".to_string(),
            reconnect_delay_ms: 2_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_heartbeat_rejected() {
        let mut settings = Settings::default();
        settings.server.heartbeat_interval_ms = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn relative_ws_path_rejected() {
        let mut settings = Settings::default();
        settings.server.ws_path = "ws".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("wsPath"));
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(value["server"]["heartbeatIntervalMs"], 3000);
        assert_eq!(value["client"]["reconnectDelayMs"], 2000);
        assert!(value["server"].get("heartbeat_interval_ms").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.client.reconnect_delay_ms, 2000);
    }
}
