//! Persistence boundary for telemetry and alarms
//!
//! The core only depends on the traits in [`backend`]. Adapters for real
//! databases live outside this crate; [`memory`] provides the in-process
//! stores used by the hub binary and by tests.
//!
//! ## Design
//!
//! - **Trait-based**: `TelemetryStore` and `AlarmStore` can be swapped freely
//! - **Async**: all operations are async so actors can await them
//! - **Batch-oriented**: telemetry is written one message (many entries) at a time

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::{AlarmStore, TelemetryQuery, TelemetryStore};
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryAlarmStore, MemoryTelemetryStore};
