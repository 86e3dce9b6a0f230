//! Store Module - execution persistence
//!
//! Contract for saving finished executions plus a DashMap-backed
//! in-memory implementation.
//!
//! Key types:
//! - `ResultRepository`: async `save` / `get` / `find`
//! - `ExecutionRecord`: persisted summary of one execution
//! - `InMemoryRepository`: lock-free store for tests and the CLI

mod repository;

pub use repository::{ExecutionRecord, InMemoryRepository, ResultRepository};
