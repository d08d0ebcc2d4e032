//! TransportService - where raw device traffic enters the hub
//!
//! Protocol adapters (MQTT, HTTP, ...) authenticate a device by its access
//! token and hand the raw payload over. Ingestion is fire-and-forget: once
//! the payload is in the device's mailbox the caller is done, and a
//! malformed payload is only visible in the logs.

use tracing::{debug, instrument};

use crate::actors::messages::{ActorMsg, device_actor_id};
use crate::actors::system::ActorSystem;
use crate::device::{Device, DeviceRegistry};
use crate::error::{EngineError, EngineResult};

#[derive(Clone)]
pub struct TransportService {
    registry: DeviceRegistry,
    system: ActorSystem<ActorMsg>,
}

impl TransportService {
    pub fn new(registry: DeviceRegistry, system: ActorSystem<ActorMsg>) -> Self {
        Self { registry, system }
    }

    async fn authenticate(&self, access_token: &str) -> EngineResult<Device> {
        self.registry
            .find_by_token(access_token)
            .await
            .ok_or(EngineError::UnknownAccessToken)
    }

    /// Queue a raw JSON payload for the device owning `access_token`
    #[instrument(skip(self, access_token, payload))]
    pub async fn ingest(&self, access_token: &str, payload: &str, arrival_ts: i64) -> EngineResult<()> {
        let device = self.authenticate(access_token).await?;
        self.ingest_for_device(&device.id, None, payload, arrival_ts).await
    }

    /// Queue a payload for an already authenticated device
    pub async fn ingest_for_device(
        &self,
        device_id: &str,
        session_id: Option<String>,
        payload: &str,
        arrival_ts: i64,
    ) -> EngineResult<()> {
        debug!("received {} bytes for device {device_id}", payload.len());
        self.system
            .tell(
                &device_actor_id(device_id),
                ActorMsg::Transport {
                    session_id,
                    payload: payload.to_string(),
                    arrival_ts,
                },
            )
            .await
    }

    /// Open a transport session; returns the device id
    pub async fn connect(&self, access_token: &str, session_id: &str) -> EngineResult<String> {
        let device = self.authenticate(access_token).await?;
        self.system
            .tell(
                &device_actor_id(&device.id),
                ActorMsg::DeviceConnected {
                    session_id: session_id.to_string(),
                },
            )
            .await?;
        Ok(device.id)
    }

    pub async fn disconnect(&self, access_token: &str, session_id: &str) -> EngineResult<()> {
        let device = self.authenticate(access_token).await?;
        self.system
            .tell(
                &device_actor_id(&device.id),
                ActorMsg::DeviceDisconnected {
                    session_id: session_id.to_string(),
                },
            )
            .await
    }
}
