//! In-memory authoritative store and index helpers.

/// Helper index aliases.
pub mod indices;
/// Authoritative contact store with email uniqueness enforcement.
pub mod store;
