pub mod sqlite;

use thiserror::Error;

use crate::{
    core::store::{StoreError, StoreSnapshotV1},
    op::StoredOp,
    types::OpSeq,
};

/// Journal I/O and decoding failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite reported an error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A payload failed to encode or decode.
    #[error("payload: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else, already rendered.
    #[error("{0}")]
    Message(String),
}

impl From<StoreError> for PersistError {
    fn from(value: StoreError) -> Self {
        Self::Message(format!("replay rejected: {value}"))
    }
}

/// Result alias for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Destination for journaled ops.
///
/// Only `append_ops` is required; the rest default to no-ops so that a sink
/// without checkpoint support still works.
pub trait OpSink: Send {
    /// Appends `ops` atomically and returns the highest durable sequence.
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq>;
    /// Forces previously appended ops to stable storage.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    /// Records a checkpoint covering everything through `last_seq`.
    fn write_snapshot(&mut self, _snapshot: &StoreSnapshotV1, _last_seq: OpSeq) -> PersistResult<()> {
        Ok(())
    }
    /// Drops journal entries covered by a checkpoint.
    fn compact_through(&mut self, _seq: OpSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
