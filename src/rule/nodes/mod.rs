//! Standard rule nodes

mod alarm;
mod filter;
mod log;
mod save_telemetry;

pub use alarm::AlarmNode;
pub use filter::FilterNode;
pub use log::LogNode;
pub use save_telemetry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, SaveTelemetryNode};
