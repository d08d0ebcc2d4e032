//! Storage trait definitions
//!
//! The rule engine writes telemetry through [`TelemetryStore`] and the alarm
//! service reads and writes alarms through [`AlarmStore`].

use async_trait::async_trait;

use super::error::StorageResult;
use crate::alarm::{Alarm, AlarmId};
use crate::telemetry::TelemetryEntry;

/// Query parameters for fetching one key's history
#[derive(Debug, Clone)]
pub struct TelemetryQuery {
    pub device_id: String,

    pub key: String,

    /// Start of time range in epoch millis (inclusive)
    pub start: i64,

    /// End of time range in epoch millis (inclusive)
    pub end: i64,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

/// Time-series store for device telemetry
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; the same store is shared by every
/// rule-chain actor.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Persist all entries of one message
    async fn save(&self, device_id: &str, entries: &[TelemetryEntry]) -> StorageResult<()>;

    /// Most recent entry per key for a device
    async fn latest(&self, device_id: &str) -> StorageResult<Vec<TelemetryEntry>>;

    /// Entries of one key within a time range, oldest first
    async fn query(&self, query: TelemetryQuery) -> StorageResult<Vec<TelemetryEntry>>;

    /// Drop all telemetry of a device; returns the number of entries removed
    async fn delete_by_device(&self, device_id: &str) -> StorageResult<usize>;
}

/// Store for alarm records
#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Latest alarm of this type for the device that is not cleared
    async fn find_latest_open(&self, device_id: &str, alarm_type: &str) -> StorageResult<Option<Alarm>>;

    /// Insert or replace an alarm, returning the stored copy
    async fn save(&self, alarm: Alarm) -> StorageResult<Alarm>;

    async fn find_by_id(&self, id: &AlarmId) -> StorageResult<Option<Alarm>>;

    /// All alarms of a device, newest first
    async fn find_by_originator(&self, device_id: &str) -> StorageResult<Vec<Alarm>>;

    async fn find_all_unacknowledged(&self) -> StorageResult<Vec<Alarm>>;

    /// Alarms that are not cleared
    async fn find_all_active(&self) -> StorageResult<Vec<Alarm>>;

    /// Remove every alarm of a device; returns the number removed
    async fn delete_by_originator(&self, device_id: &str) -> StorageResult<usize>;
}
