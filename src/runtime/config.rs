//! Runtime tuning knobs.

use serde::Deserialize;

/// When a write is acknowledged to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Reply once the write's ops are appended and flushed to the journal.
    #[default]
    Durable,
    /// Reply once the write is applied in memory; the journal catches up.
    InMemory,
}

/// Configuration for [`crate::runtime::handle::spawn_contacts`].
///
/// Missing fields fall back to [`ContactsConfig::default`] when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContactsConfig {
    /// Acknowledgement policy for writes.
    pub ack_mode: AckMode,
    /// Append every op as soon as it reaches the persistence worker.
    pub flush_every_write: bool,
    /// Append once this many ops are buffered.
    pub batch_max_ops: usize,
    /// Append buffered ops after this long even if the batch is not full.
    pub batch_max_latency_ms: u64,
    /// Capacity of the queue between the writer and the persistence worker.
    pub persist_queue_bound: usize,
    /// Write a checkpoint after this many ops; 0 disables.
    pub snapshot_every_ops: usize,
    /// Drop journal entries covered by a fresh checkpoint.
    pub compact_after_snapshot: bool,
}

impl Default for ContactsConfig {
    fn default() -> Self {
        Self {
            ack_mode: AckMode::Durable,
            flush_every_write: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_ops: 2000,
            compact_after_snapshot: false,
        }
    }
}

impl ContactsConfig {
    /// Parses a JSON settings blob; absent keys keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
