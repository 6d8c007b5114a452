//! Single-writer async runtime and event stream APIs.

/// Runtime configuration.
pub mod config;
/// Event stream types emitted by the runtime.
pub mod events;
/// Handle and command loop implementation.
pub mod handle;
