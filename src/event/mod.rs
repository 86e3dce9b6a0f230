//! Event Module - execution audit trail and monitoring hooks
//!
//! Key types:
//! - `Event`: Envelope with id + timestamp + kind
//! - `EventKind`: workflow-level and node-level lifecycle events
//! - `EventLog`: Thread-safe, append-only log
//! - `EventEmitter`: Trait for dependency injection
//! - `NoopEmitter`: No-op default

mod emitter;
mod log;

pub use emitter::{EventEmitter, NoopEmitter};
pub use log::{Event, EventKind, EventLog};
