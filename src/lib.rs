pub mod actors;
pub mod alarm;
pub mod config;
pub mod device;
pub mod error;
pub mod hub;
pub mod message;
pub mod rule;
pub mod storage;
pub mod telemetry;
pub mod transport;
pub mod util;

pub use error::{EngineError, EngineResult};
pub use hub::{HubParts, TelemetryHub};
