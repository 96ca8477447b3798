//! Broadcast listener registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use switchboard_core::RequestName;

/// Broadcast callback: `(error, payload)`. Runs once per matching broadcast.
pub type Listener = Arc<dyn Fn(Option<Value>, Value) + Send + Sync>;

/// Channel name → subscribed listeners, in subscription order.
///
/// Registrations outlive reconnects; nothing here is cleared when the
/// connection drops.
#[derive(Default)]
pub struct ListenerRegistry {
    channels: HashMap<RequestName, Vec<Listener>>,
}

impl ListenerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener` to `channel`. Duplicates are kept and fire twice.
    pub fn subscribe(&mut self, channel: impl Into<RequestName>, listener: Listener) {
        self.channels.entry(channel.into()).or_default().push(listener);
    }

    /// Listeners for `channel`, cloned so they can run outside the lock.
    pub fn listeners_for(&self, channel: &RequestName) -> Vec<Listener> {
        self.channels.get(channel).cloned().unwrap_or_default()
    }

    /// Number of channels with at least one listener.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Total registrations across all channels.
    pub fn len(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("channels", &self.channels.len())
            .field("listeners", &self.len())
            .finish()
    }
}
