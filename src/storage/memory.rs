//! In-memory stores (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Running the hub standalone
//!
//! ## Limitations
//!
//! - **No persistence**: all data lost on restart
//! - **Limited capacity**: telemetry history per device is a ring buffer

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::backend::{AlarmStore, TelemetryQuery, TelemetryStore};
use super::error::StorageResult;
use crate::alarm::{Alarm, AlarmId};
use crate::telemetry::TelemetryEntry;

/// Maximum entries to keep in memory per device
const MAX_ENTRIES_PER_DEVICE: usize = 10_000;

/// In-memory telemetry store
///
/// When a device's buffer is full, oldest entries are evicted.
pub struct MemoryTelemetryStore {
    entries: RwLock<HashMap<String, VecDeque<TelemetryEntry>>>,
    capacity: usize,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES_PER_DEVICE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Total entries stored across all devices
    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(VecDeque::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryTelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn save(&self, device_id: &str, entries: &[TelemetryEntry]) -> StorageResult<()> {
        let mut all = self.entries.write().await;
        let buffer = all.entry(device_id.to_string()).or_default();

        for entry in entries {
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(entry.clone());
        }

        trace!("stored {} entries for {device_id}", entries.len());
        Ok(())
    }

    async fn latest(&self, device_id: &str) -> StorageResult<Vec<TelemetryEntry>> {
        let all = self.entries.read().await;
        let Some(buffer) = all.get(device_id) else {
            return Ok(vec![]);
        };

        let mut latest: HashMap<&str, &TelemetryEntry> = HashMap::new();
        for entry in buffer {
            let newer = latest
                .get(entry.key())
                .is_none_or(|current| current.ts() <= entry.ts());
            if newer {
                latest.insert(entry.key(), entry);
            }
        }

        let mut result: Vec<TelemetryEntry> = latest.into_values().cloned().collect();
        result.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(result)
    }

    async fn query(&self, query: TelemetryQuery) -> StorageResult<Vec<TelemetryEntry>> {
        debug!("querying in-memory telemetry for {}/{}", query.device_id, query.key);

        let all = self.entries.read().await;
        let mut result: Vec<TelemetryEntry> = all
            .get(&query.device_id)
            .map(|buffer| {
                buffer
                    .iter()
                    .filter(|e| e.key() == query.key && e.ts() >= query.start && e.ts() <= query.end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        result.sort_by_key(TelemetryEntry::ts);
        result.truncate(query.limit.unwrap_or(usize::MAX));
        Ok(result)
    }

    async fn delete_by_device(&self, device_id: &str) -> StorageResult<usize> {
        let removed = self
            .entries
            .write()
            .await
            .remove(device_id)
            .map(|buffer| buffer.len())
            .unwrap_or_default();
        debug!("deleted {removed} telemetry entries of {device_id}");
        Ok(removed)
    }
}

/// In-memory alarm store
#[derive(Default)]
pub struct MemoryAlarmStore {
    alarms: RwLock<HashMap<AlarmId, Alarm>>,
}

impl MemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.alarms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.alarms.read().await.is_empty()
    }
}

fn newest_first(alarms: &mut [Alarm]) {
    alarms.sort_by(|a, b| b.created_time.cmp(&a.created_time).then_with(|| b.id.cmp(&a.id)));
}

#[async_trait]
impl AlarmStore for MemoryAlarmStore {
    async fn find_latest_open(&self, device_id: &str, alarm_type: &str) -> StorageResult<Option<Alarm>> {
        let alarms = self.alarms.read().await;
        let latest = alarms
            .values()
            .filter(|a| a.originator_id == device_id && a.alarm_type == alarm_type && !a.is_cleared())
            .max_by_key(|a| a.created_time)
            .cloned();
        Ok(latest)
    }

    async fn save(&self, alarm: Alarm) -> StorageResult<Alarm> {
        self.alarms.write().await.insert(alarm.id.clone(), alarm.clone());
        Ok(alarm)
    }

    async fn find_by_id(&self, id: &AlarmId) -> StorageResult<Option<Alarm>> {
        Ok(self.alarms.read().await.get(id).cloned())
    }

    async fn find_by_originator(&self, device_id: &str) -> StorageResult<Vec<Alarm>> {
        let mut result: Vec<Alarm> = self
            .alarms
            .read()
            .await
            .values()
            .filter(|a| a.originator_id == device_id)
            .cloned()
            .collect();
        newest_first(&mut result);
        Ok(result)
    }

    async fn find_all_unacknowledged(&self) -> StorageResult<Vec<Alarm>> {
        let mut result: Vec<Alarm> = self
            .alarms
            .read()
            .await
            .values()
            .filter(|a| !a.is_acknowledged())
            .cloned()
            .collect();
        newest_first(&mut result);
        Ok(result)
    }

    async fn find_all_active(&self) -> StorageResult<Vec<Alarm>> {
        let mut result: Vec<Alarm> = self
            .alarms
            .read()
            .await
            .values()
            .filter(|a| !a.is_cleared())
            .cloned()
            .collect();
        newest_first(&mut result);
        Ok(result)
    }

    async fn delete_by_originator(&self, device_id: &str) -> StorageResult<usize> {
        let mut alarms = self.alarms.write().await;
        let before = alarms.len();
        alarms.retain(|_, a| a.originator_id != device_id);
        Ok(before - alarms.len())
    }
}
