//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_settings::ClientSettings;

/// Configuration for a [`SocketClient`](crate::client::SocketClient).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server WebSocket URL.
    pub url: String,
    /// Fixed delay before an automatic reconnect, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Upper bound on one connect attempt, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

impl ClientConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            url: settings.url.clone(),
            reconnect_delay_ms: settings.reconnect_delay_ms,
            connect_timeout_ms: settings.connect_timeout_ms,
        }
    }

    /// Same settings, different URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Same settings, different reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Reconnect backoff.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Connect attempt timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_settings() {
        let config = ClientConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:3000/ws");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn builders_override() {
        let config = ClientConfig::default()
            .with_url("ws://example.test/socket")
            .with_reconnect_delay(Duration::from_millis(50));
        assert_eq!(config.url, "ws://example.test/socket");
        assert_eq!(config.reconnect_delay_ms, 50);
    }

    #[test]
    fn from_settings_copies_fields() {
        let settings = ClientSettings {
            url: "ws://10.0.0.1:9000/ws".into(),
            reconnect_delay_ms: 500,
            connect_timeout_ms: 1_000,
        };
        let config = ClientConfig::from_settings(&settings);
        assert_eq!(config.url, settings.url);
        assert_eq!(config.connect_timeout(), Duration::from_secs(1));
    }
}
