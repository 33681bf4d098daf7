//! Durable run state.

pub mod send_log;

pub use send_log::{DEFAULT_COOLDOWN, HistoryItem, SendLog, SendLogEntry};
