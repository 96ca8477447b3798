//! Outstanding-request table.
//!
//! Each outgoing request takes the next sequence number and parks its
//! callback here until the matching reply arrives. Clearing the table drops
//! callbacks without running them.

use std::collections::HashMap;

use serde_json::Value;

/// One-shot reply callback: `(error, response)`.
pub type Callback = Box<dyn FnOnce(Option<Value>, Value) + Send>;

/// Sequence counter plus the callbacks still waiting on a reply.
#[derive(Default)]
pub struct CorrelationTable {
    next: u64,
    pending: HashMap<u64, Callback>,
}

impl CorrelationTable {
    /// Empty table starting at sequence 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next sequence number. Numbers are never reused, even across
    /// [`clear`](Self::clear).
    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.next;
        self.next += 1;
        sequence
    }

    /// Park `callback` under `sequence`.
    pub fn register(&mut self, sequence: u64, callback: Callback) {
        let _ = self.pending.insert(sequence, callback);
    }

    /// Remove and return the callback for `sequence`. The caller runs it
    /// outside any lock.
    pub fn resolve(&mut self, sequence: u64) -> Option<Callback> {
        self.pending.remove(&sequence)
    }

    /// Drop every pending callback without invoking it. Returns how many
    /// were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Number of requests still waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("next", &self.next)
            .field("pending", &self.pending.len())
            .finish()
    }
}
