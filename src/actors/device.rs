//! DeviceActor - one per device
//!
//! Turns raw transport payloads into typed telemetry messages for the rule
//! engine and keeps track of the device's transport sessions.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, instrument, trace, warn};

use super::messages::{ActorMsg, DeviceState, RULE_ENGINE_ACTOR_ID};
use super::system::{Actor, ActorContext, ActorMessage};
use crate::device::DeviceRegistry;
use crate::error::EngineError;
use crate::message::{META_DEVICE_NAME, META_DEVICE_TYPE, META_TS, Message};
use crate::telemetry::parse_telemetry_payload;

/// Queue stamped on messages when the profile names none
pub const DEFAULT_QUEUE_NAME: &str = "Main";

#[derive(Debug, Clone, Copy)]
struct SessionInfo {
    created: i64,
    last_activity: i64,
}

pub struct DeviceActor {
    device_id: String,
    registry: DeviceRegistry,
    connected: bool,
    last_activity: Option<i64>,
    sessions: HashMap<String, SessionInfo>,
}

impl DeviceActor {
    pub fn new(device_id: impl Into<String>, registry: DeviceRegistry) -> Self {
        Self {
            device_id: device_id.into(),
            registry,
            connected: false,
            last_activity: None,
            sessions: HashMap::new(),
        }
    }

    fn state(&self) -> DeviceState {
        DeviceState {
            device_id: self.device_id.clone(),
            connected: self.connected,
            last_activity: self.last_activity,
            session_count: self.sessions.len(),
        }
    }

    #[instrument(skip(self, payload, ctx), fields(device_id = %self.device_id))]
    async fn handle_transport(
        &mut self,
        session_id: Option<String>,
        payload: String,
        arrival_ts: i64,
        ctx: &ActorContext<ActorMsg>,
    ) -> anyhow::Result<()> {
        self.last_activity = Some(arrival_ts);
        if let Some(session) = session_id.as_ref().and_then(|id| self.sessions.get_mut(id)) {
            session.last_activity = arrival_ts;
        }

        let entries = match parse_telemetry_payload(&payload, arrival_ts) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("dropping malformed telemetry from {}: {e}", self.device_id);
                return Ok(());
            }
        };

        let device = self
            .registry
            .device(&self.device_id)
            .await
            .ok_or_else(|| EngineError::DeviceNotFound(self.device_id.clone()))?;
        let profile = self.registry.profile_for_device(&self.device_id).await;

        let entries = match &profile {
            Some(profile) => profile.filter_strict(&self.device_id, entries),
            None => entries,
        };
        if entries.is_empty() {
            debug!("no telemetry left in payload, nothing to forward");
            return Ok(());
        }

        let ts = entries.first().map(|e| e.ts()).unwrap_or(arrival_ts);
        let queue_name = profile
            .as_ref()
            .and_then(|p| p.default_queue_name.clone())
            .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());
        let device_type = device
            .device_type
            .clone()
            .or_else(|| profile.as_ref().map(|p| p.name.clone()))
            .unwrap_or_default();

        let msg = Message::telemetry(&device.id, payload, entries, ts)
            .with_queue(queue_name)
            .with_metadata(META_DEVICE_NAME, &device.name)
            .with_metadata(META_DEVICE_TYPE, device_type)
            .with_metadata(META_TS, ts.to_string());

        trace!("forwarding {} ({} entries) to the rule engine", msg.id(), msg.entries().len());
        ctx.tell(RULE_ENGINE_ACTOR_ID, ActorMsg::ToRuleEngine(msg)).await?;

        Ok(())
    }
}

#[async_trait]
impl Actor<ActorMsg> for DeviceActor {
    async fn init(&mut self, _ctx: &ActorContext<ActorMsg>) -> anyhow::Result<()> {
        debug!("device actor for {} started", self.device_id);
        Ok(())
    }

    async fn process(&mut self, msg: ActorMsg, ctx: &ActorContext<ActorMsg>) -> anyhow::Result<()> {
        match msg {
            ActorMsg::Transport {
                session_id,
                payload,
                arrival_ts,
            } => self.handle_transport(session_id, payload, arrival_ts, ctx).await?,

            ActorMsg::DeviceConnected { session_id } => {
                let now = crate::util::now_millis();
                debug!("device {} opened session {session_id}", self.device_id);
                self.sessions.insert(
                    session_id,
                    SessionInfo {
                        created: now,
                        last_activity: now,
                    },
                );
                self.connected = true;
                self.last_activity = Some(now);
            }

            ActorMsg::DeviceDisconnected { session_id } => {
                let now = crate::util::now_millis();
                if let Some(session) = self.sessions.get(&session_id) {
                    debug!(
                        "device {} closed session {session_id} (open for {} ms, idle for {} ms)",
                        self.device_id,
                        now - session.created,
                        now - session.last_activity
                    );
                }
                self.sessions.clear();
                self.connected = false;
                self.last_activity = Some(now);
            }

            ActorMsg::GetDeviceState { respond_to } => {
                let _ = respond_to.send(self.state());
            }

            other => warn!("device actor {} ignoring {} message", self.device_id, other.kind()),
        }

        Ok(())
    }

    async fn destroy(&mut self, _ctx: &ActorContext<ActorMsg>) {
        debug!("device actor for {} stopped", self.device_id);
    }
}
