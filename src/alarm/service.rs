//! AlarmService - alarm lifecycle on top of an [`AlarmStore`]
//!
//! Every state change is published as an [`AlarmEvent`] on a broadcast
//! channel. External notifiers subscribe with [`AlarmService::subscribe`];
//! slow subscribers may lag and miss events, the store stays authoritative.
//!
//! Every read-modify-write of an alarm runs under one service-wide lock, so
//! the evaluator, the repeat notifier and admin calls never overwrite each
//! other's changes with a stale copy.
//!
//! Clearing or acknowledging an alarm also drops the evaluation contexts of
//! that alarm type for the device, so partial DURATION/REPEATING progress
//! never outlives a resolved incident.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, instrument};

use super::evaluator::EvaluationContexts;
use super::{Alarm, AlarmId, AlarmSeverity};
use crate::error::{EngineError, EngineResult};
use crate::storage::AlarmStore;
use crate::util::Clock;

/// Capacity of the alarm event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmEventKind {
    Created,
    SeverityChanged { from: AlarmSeverity },
    Cleared,
    Acknowledged,
    Repeated,
}

/// Event published whenever an alarm changes
#[derive(Debug, Clone, Serialize)]
pub struct AlarmEvent {
    pub kind: AlarmEventKind,
    pub alarm: Alarm,
}

/// What `create_or_update` did
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmUpdate {
    Created(Alarm),
    SeverityChanged { alarm: Alarm, from: AlarmSeverity },
    Unchanged(Alarm),
}

impl AlarmUpdate {
    pub fn alarm(&self) -> &Alarm {
        match self {
            AlarmUpdate::Created(alarm)
            | AlarmUpdate::SeverityChanged { alarm, .. }
            | AlarmUpdate::Unchanged(alarm) => alarm,
        }
    }
}

pub struct AlarmService {
    store: Arc<dyn AlarmStore>,
    contexts: Arc<EvaluationContexts>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<AlarmEvent>,

    /// Held for every load, change and save of an alarm
    writes: Mutex<()>,
}

impl AlarmService {
    pub fn new(store: Arc<dyn AlarmStore>, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            contexts: Arc::new(EvaluationContexts::default()),
            clock,
            events,
            writes: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.events.subscribe()
    }

    /// Evaluation contexts owned by this service
    pub fn contexts(&self) -> Arc<EvaluationContexts> {
        Arc::clone(&self.contexts)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn publish(&self, kind: AlarmEventKind, alarm: &Alarm) {
        // no subscribers is fine
        let _ = self.events.send(AlarmEvent {
            kind,
            alarm: alarm.clone(),
        });
    }

    /// Raise an alarm of `alarm_type` for a device.
    ///
    /// Creates a new alarm if the device has no open one of that type,
    /// otherwise moves the open alarm to `severity` in place.
    #[instrument(skip(self, device_name))]
    pub async fn create_or_update(
        &self,
        device_id: &str,
        device_name: &str,
        alarm_type: &str,
        severity: AlarmSeverity,
    ) -> EngineResult<AlarmUpdate> {
        let _writes = self.writes.lock().await;
        let now = self.clock.now_millis();

        match self.store.find_latest_open(device_id, alarm_type).await? {
            Some(mut alarm) => {
                let from = alarm.severity;
                if !alarm.update_severity(severity, now) {
                    return Ok(AlarmUpdate::Unchanged(alarm));
                }
                let alarm = self.store.save(alarm).await?;
                info!("alarm severity updated: {alarm_type} {from} -> {severity} ({device_name})");
                self.publish(AlarmEventKind::SeverityChanged { from }, &alarm);
                Ok(AlarmUpdate::SeverityChanged { alarm, from })
            }
            None => {
                let alarm = Alarm::new(device_id, device_name, alarm_type, severity, now);
                let alarm = self.store.save(alarm).await?;
                info!("alarm created: {alarm_type} [{severity}] ({device_name})");
                self.publish(AlarmEventKind::Created, &alarm);
                Ok(AlarmUpdate::Created(alarm))
            }
        }
    }

    /// Clear an alarm; clearing a cleared alarm is a no-op
    #[instrument(skip(self))]
    pub async fn clear(&self, id: &AlarmId) -> EngineResult<Alarm> {
        let _writes = self.writes.lock().await;
        let alarm = self.get(id).await?;
        self.clear_loaded(alarm).await
    }

    /// Clear the open alarm of a type, if there is one
    pub async fn clear_by_type(&self, device_id: &str, alarm_type: &str) -> EngineResult<Option<Alarm>> {
        let _writes = self.writes.lock().await;
        match self.store.find_latest_open(device_id, alarm_type).await? {
            Some(alarm) => self.clear_loaded(alarm).await.map(Some),
            None => Ok(None),
        }
    }

    /// Caller holds `writes`
    async fn clear_loaded(&self, mut alarm: Alarm) -> EngineResult<Alarm> {
        if !alarm.clear(self.clock.now_millis()) {
            debug!("alarm {} already cleared", alarm.id);
            return Ok(alarm);
        }

        let alarm = self.store.save(alarm).await?;
        info!("alarm cleared: {} ({})", alarm.alarm_type, alarm.originator_name);
        self.contexts
            .clear_alarm_type(&alarm.originator_id, &alarm.alarm_type)
            .await;
        self.publish(AlarmEventKind::Cleared, &alarm);
        Ok(alarm)
    }

    /// Acknowledge an alarm, open or cleared; repeated calls are no-ops
    #[instrument(skip(self))]
    pub async fn acknowledge(&self, id: &AlarmId) -> EngineResult<Alarm> {
        let _writes = self.writes.lock().await;
        let mut alarm = self.get(id).await?;

        if !alarm.acknowledge(self.clock.now_millis()) {
            debug!("alarm {id} already acknowledged");
            return Ok(alarm);
        }

        let alarm = self.store.save(alarm).await?;
        info!("alarm acknowledged: {} ({})", alarm.alarm_type, alarm.originator_name);
        self.contexts
            .clear_alarm_type(&alarm.originator_id, &alarm.alarm_type)
            .await;
        self.publish(AlarmEventKind::Acknowledged, &alarm);
        Ok(alarm)
    }

    /// Bookkeeping for a repeat notification.
    ///
    /// The alarm is reloaded first; `None` if it is gone or no longer due,
    /// e.g. because it was cleared or acknowledged in the meantime.
    pub async fn record_repeat(&self, id: &AlarmId) -> EngineResult<Option<Alarm>> {
        let _writes = self.writes.lock().await;
        let now = self.clock.now_millis();

        let Some(mut alarm) = self.store.find_by_id(id).await? else {
            return Ok(None);
        };
        if !alarm.needs_repeat_notification(now) {
            debug!("alarm {id} no longer due for a repeat");
            return Ok(None);
        }

        alarm.record_notification(now);
        let alarm = self.store.save(alarm).await?;
        self.publish(AlarmEventKind::Repeated, &alarm);
        Ok(Some(alarm))
    }

    async fn get(&self, id: &AlarmId) -> EngineResult<Alarm> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::AlarmNotFound(id.to_string()))
    }

    pub async fn find_by_id(&self, id: &AlarmId) -> EngineResult<Option<Alarm>> {
        Ok(self.store.find_by_id(id).await?)
    }

    pub async fn find_latest_open(&self, device_id: &str, alarm_type: &str) -> EngineResult<Option<Alarm>> {
        Ok(self.store.find_latest_open(device_id, alarm_type).await?)
    }

    pub async fn find_by_originator(&self, device_id: &str) -> EngineResult<Vec<Alarm>> {
        Ok(self.store.find_by_originator(device_id).await?)
    }

    pub async fn find_all_active(&self) -> EngineResult<Vec<Alarm>> {
        Ok(self.store.find_all_active().await?)
    }

    pub async fn find_all_unacknowledged(&self) -> EngineResult<Vec<Alarm>> {
        Ok(self.store.find_all_unacknowledged().await?)
    }

    /// Forget a device: its alarms and its evaluation contexts
    pub async fn delete_by_originator(&self, device_id: &str) -> EngineResult<usize> {
        let _writes = self.writes.lock().await;
        self.contexts.clear_device(device_id).await;
        let removed = self.store.delete_by_originator(device_id).await?;
        info!("deleted {removed} alarms of {device_id}");
        Ok(removed)
    }
}
