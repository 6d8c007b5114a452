//! Shared primitive IDs.

/// Monotonic contact identifier, allocated by the store starting at 1.
pub type ContactId = u64;
/// Monotonic operation sequence number.
pub type OpSeq = u64;
