//! Runtime event stream payloads.

use crate::types::{ContactId, OpSeq};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactEvent {
    /// A new contact was inserted.
    Inserted {
        /// Inserted contact id.
        id: ContactId,
    },
    /// An existing contact was replaced.
    Updated {
        /// Updated contact id.
        id: ContactId,
    },
    /// A contact was removed.
    Deleted {
        /// Removed contact id.
        id: ContactId,
    },
    /// An import batch was applied.
    Imported {
        /// Records added by the batch.
        added: usize,
        /// Records updated by the batch.
        updated: usize,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
}
