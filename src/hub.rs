//! TelemetryHub - everything wired together
//!
//! ```text
//!  TransportService ──→ Device:<id> ──→ RuleEngine ──→ RuleChain:<id> ──→ nodes
//!                                                                      │
//!                                      AlarmService ◄── AlarmEvaluator ◄┘
//!                                           │
//!                                   broadcast AlarmEvent ◄── RepeatNotifier
//! ```
//!
//! The hub owns the actor system; call [`TelemetryHub::shutdown`] to stop
//! every actor and the repeat notifier.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::actors::device::DeviceActor;
use crate::actors::messages::{ActorMsg, DEVICE_ACTOR_PREFIX, DeviceState, RULE_ENGINE_ACTOR_ID, device_actor_id};
use crate::actors::system::ActorSystem;
use crate::alarm::{AlarmEvaluator, AlarmEvent, AlarmService, RepeatNotifierHandle};
use crate::config::{Config, RuleChainConfig};
use crate::device::{Device, DeviceProfile, DeviceRegistry};
use crate::error::{EngineError, EngineResult};
use crate::rule::RuleEngine;
use crate::rule::recipe::{NodeDeps, build_chain};
use crate::storage::{AlarmStore, MemoryAlarmStore, MemoryTelemetryStore, TelemetryStore};
use crate::transport::TransportService;
use crate::util::{Clock, SystemClock};

/// Backends and clock the hub runs on
pub struct HubParts {
    pub telemetry_store: Arc<dyn TelemetryStore>,
    pub alarm_store: Arc<dyn AlarmStore>,
    pub clock: Arc<dyn Clock>,
}

impl Default for HubParts {
    fn default() -> Self {
        Self {
            telemetry_store: Arc::new(MemoryTelemetryStore::new()),
            alarm_store: Arc::new(MemoryAlarmStore::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct TelemetryHub {
    system: ActorSystem<ActorMsg>,
    registry: DeviceRegistry,
    engine: RuleEngine,
    alarms: Arc<AlarmService>,
    deps: NodeDeps,
    transport: TransportService,
    notifier: Option<RepeatNotifierHandle>,
}

impl TelemetryHub {
    /// Start a hub on in-memory storage
    pub async fn start(config: Config) -> EngineResult<Self> {
        Self::start_with(config, HubParts::default()).await
    }

    #[instrument(skip_all)]
    pub async fn start_with(config: Config, parts: HubParts) -> EngineResult<Self> {
        let Config {
            actors,
            rule_chains,
            profiles,
            devices,
            notifications,
        } = config;

        let system = ActorSystem::new(actors);
        let registry = DeviceRegistry::new();
        let engine = RuleEngine::start(system.clone(), registry.clone()).await?;

        let alarms = Arc::new(AlarmService::new(parts.alarm_store, parts.clock));
        let deps = NodeDeps {
            telemetry_store: parts.telemetry_store,
            evaluator: Arc::new(AlarmEvaluator::new(Arc::clone(&alarms))),
            registry: registry.clone(),
        };

        let notifier = notifications.enabled.then(|| {
            RepeatNotifierHandle::spawn(
                Arc::clone(&alarms),
                Duration::from_secs(notifications.repeat_check_secs.max(1)),
            )
        });

        let hub = Self {
            transport: TransportService::new(registry.clone(), system.clone()),
            system,
            registry,
            engine,
            alarms,
            deps,
            notifier,
        };

        for profile in profiles {
            hub.register_profile(profile).await?;
        }
        for chain in &rule_chains {
            hub.register_rule_chain(chain).await?;
        }
        for device in devices {
            hub.register_device(device.into()).await?;
        }

        info!(
            "telemetry hub started with {} rule chains and {} devices",
            rule_chains.len(),
            hub.registry.devices().await.len()
        );
        Ok(hub)
    }

    pub async fn register_profile(&self, profile: DeviceProfile) -> EngineResult<()> {
        self.registry.register_profile(profile).await
    }

    /// Build a chain from its recipes and register it
    pub async fn register_rule_chain(&self, config: &RuleChainConfig) -> EngineResult<()> {
        self.engine.register_chain(build_chain(config, &self.deps)).await?;
        if config.root {
            self.engine.set_root_chain(&config.id).await?;
        }
        Ok(())
    }

    /// Register or update a device and make sure its actor runs
    pub async fn register_device(&self, device: Device) -> EngineResult<()> {
        if let Some(profile_id) = &device.profile_id {
            if self.registry.profile(profile_id).await.is_none() {
                warn!("device {} references unknown profile {profile_id}", device.id);
            }
        }

        let device_id = device.id.clone();
        self.registry.register_device(device).await;

        let actor_id = device_actor_id(&device_id);
        if !self.system.contains(&actor_id).await {
            self.system
                .create_actor(actor_id, DeviceActor::new(&device_id, self.registry.clone()))
                .await?;
        }
        Ok(())
    }

    /// Remove a device with its actor, alarms, evaluation state and telemetry
    #[instrument(skip(self))]
    pub async fn delete_device(&self, device_id: &str) -> EngineResult<()> {
        let device = self
            .registry
            .remove_device(device_id)
            .await
            .ok_or_else(|| EngineError::DeviceNotFound(device_id.to_string()))?;

        if let Err(e) = self.system.destroy(&device_actor_id(device_id)).await {
            debug!("device actor of {device_id} was not running: {e}");
        }

        let alarms = self.alarms.delete_by_originator(device_id).await?;
        let entries = self.deps.telemetry_store.delete_by_device(device_id).await?;
        info!(
            "deleted device {} ({}) with {alarms} alarms and {entries} telemetry entries",
            device.name, device_id
        );
        Ok(())
    }

    /// Connection bookkeeping of a device, after its queued messages
    pub async fn device_state(&self, device_id: &str) -> EngineResult<DeviceState> {
        let (tx, rx) = oneshot::channel();
        let actor_id = device_actor_id(device_id);
        self.system
            .tell(&actor_id, ActorMsg::GetDeviceState { respond_to: tx })
            .await
            .map_err(|e| match e {
                EngineError::ActorNotFound(_) => EngineError::DeviceNotFound(device_id.to_string()),
                other => other,
            })?;
        rx.await.map_err(|_| EngineError::ActorNotFound(actor_id))
    }

    pub fn subscribe_alarms(&self) -> broadcast::Receiver<AlarmEvent> {
        self.alarms.subscribe()
    }

    pub fn transport(&self) -> &TransportService {
        &self.transport
    }

    pub fn rule_engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn alarms(&self) -> &Arc<AlarmService> {
        &self.alarms
    }

    pub fn evaluator(&self) -> &Arc<AlarmEvaluator> {
        &self.deps.evaluator
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn telemetry_store(&self) -> &Arc<dyn TelemetryStore> {
        &self.deps.telemetry_store
    }

    pub fn system(&self) -> &ActorSystem<ActorMsg> {
        &self.system
    }

    pub fn repeat_notifier(&self) -> Option<&RepeatNotifierHandle> {
        self.notifier.as_ref()
    }

    /// Stop the repeat notifier and every actor.
    ///
    /// Actors stop upstream first (devices, then the rule engine, then the
    /// chains), so every payload accepted before this call runs through its
    /// chain. Pending save retries are cancelled.
    pub async fn shutdown(&self) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.shutdown().await {
                debug!("repeat notifier already stopped: {e:#}");
            }
        }

        let devices: Vec<String> = self
            .system
            .actor_ids()
            .await
            .into_iter()
            .filter(|id| id.starts_with(DEVICE_ACTOR_PREFIX))
            .collect();
        join_all(devices.iter().map(|id| self.system.destroy(id))).await;

        if let Err(e) = self.system.destroy(RULE_ENGINE_ACTOR_ID).await {
            debug!("rule engine already stopped: {e}");
        }

        self.system.shutdown().await;
        info!("telemetry hub stopped");
    }
}
