//! RuleEngine - the chain table and message routing
//!
//! Every registered chain runs inside its own [`RuleChainActor`], so chains
//! never share node state and a slow chain only delays its own messages.
//! The engine itself keeps the table of chain ids and decides where a
//! message goes:
//!
//! 1. the message's own `rule_chain_id`
//! 2. else the originator profile's `default_rule_chain_id`
//! 3. else the root chain
//!
//! An id resolved this way that is not registered is a
//! [`EngineError::ChainNotFound`]; there is no fallback to the root chain.
//!
//! The first instance of chain `x` runs as actor `RuleChain:x`; a
//! replacement gets a numbered suffix so both can briefly coexist. The
//! replacement takes new messages at once but only processes them after the
//! old instance has drained, so one originator's messages never run through
//! two instances at the same time.
//!
//! Routing holds the table's read lock until the message is queued, and
//! registration swaps the table entry under the write lock. A message is
//! therefore always queued before the instance it was routed to is stopped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock, oneshot};
use tracing::{debug, info, instrument, trace};

use super::{ChainStats, RuleChain, RuleNode};
use crate::actors::messages::{ActorMsg, RULE_ENGINE_ACTOR_ID, rule_chain_actor_id};
use crate::actors::rule_chain::RuleChainActor;
use crate::actors::rule_engine::RuleEngineActor;
use crate::actors::system::{ActorContext, ActorSystem};
use crate::device::DeviceRegistry;
use crate::error::{EngineError, EngineResult};
use crate::message::Message;

/// Placeholder reported when no root chain is configured
const ROOT_CHAIN_LABEL: &str = "<root>";

#[derive(Debug)]
struct ChainEntry {
    name: String,
    actor_id: String,
}

#[derive(Debug, Default)]
struct ChainTable {
    chains: BTreeMap<String, ChainEntry>,
    root: Option<String>,
    replacements: u64,
}

impl ChainTable {
    /// Chain id and actor id for a requested chain, or the root chain
    fn lookup(&self, requested: Option<String>) -> EngineResult<(String, String)> {
        let chain_id = requested
            .or_else(|| self.root.clone())
            .ok_or_else(|| EngineError::ChainNotFound(ROOT_CHAIN_LABEL.to_string()))?;

        match self.chains.get(&chain_id) {
            Some(entry) => {
                let actor_id = entry.actor_id.clone();
                Ok((chain_id, actor_id))
            }
            None => Err(EngineError::ChainNotFound(chain_id)),
        }
    }
}

#[derive(Clone)]
pub struct RuleEngine {
    system: ActorSystem<ActorMsg>,
    registry: DeviceRegistry,
    table: Arc<RwLock<ChainTable>>,

    /// One registration at a time, including the drain of a replaced chain
    registrations: Arc<Mutex<()>>,
}

impl RuleEngine {
    pub fn new(system: ActorSystem<ActorMsg>, registry: DeviceRegistry) -> Self {
        Self {
            system,
            registry,
            table: Arc::new(RwLock::new(ChainTable::default())),
            registrations: Arc::new(Mutex::new(())),
        }
    }

    /// Create the engine and its routing actor
    pub async fn start(system: ActorSystem<ActorMsg>, registry: DeviceRegistry) -> EngineResult<Self> {
        let engine = Self::new(system, registry);
        engine
            .system
            .create_actor(RULE_ENGINE_ACTOR_ID, RuleEngineActor::new(engine.clone()))
            .await?;
        Ok(engine)
    }

    /// Register an ordered node list under `id`
    pub async fn register_rule_chain(&self, id: impl Into<String>, nodes: Vec<Box<dyn RuleNode>>) -> EngineResult<()> {
        self.register_chain(RuleChain::new(id, nodes)).await
    }

    /// Register a chain, replacing any chain with the same id.
    ///
    /// New messages go to the new instance right away; the replaced one
    /// finishes what was already queued for it and is then stopped. Only
    /// then does the new instance start processing.
    #[instrument(skip(self, chain), fields(chain = %chain.id()))]
    pub async fn register_chain(&self, chain: RuleChain) -> EngineResult<()> {
        let _registering = self.registrations.lock().await;
        let id = chain.id().to_string();
        let name = chain.name().to_string();
        debug!("registering rule chain {id} ({name}) with nodes {:?}", chain.node_names());

        let (actor_id, replaced, gate) = {
            let mut table = self.table.write().await;
            let replacing = table.chains.contains_key(&id);
            let actor_id = if replacing {
                table.replacements += 1;
                format!("{}#{}", rule_chain_actor_id(&id), table.replacements)
            } else {
                rule_chain_actor_id(&id)
            };

            let mut actor = RuleChainActor::new(chain);
            let gate = replacing.then(|| Arc::new(AtomicBool::new(false)));
            if let Some(gate) = &gate {
                actor = actor.gated(Arc::clone(gate));
            }
            self.system.create_actor(actor_id.clone(), actor).await?;

            let replaced = table.chains.insert(
                id.clone(),
                ChainEntry {
                    name,
                    actor_id: actor_id.clone(),
                },
            );
            (actor_id, replaced, gate)
        };

        let Some(old) = replaced else {
            return Ok(());
        };

        info!("replaced rule chain {id}, draining {}", old.actor_id);
        let drained = self.system.destroy(&old.actor_id).await;

        if let Some(gate) = gate {
            gate.store(true, Ordering::SeqCst);
            // a full mailbox opens the gate with its next message instead
            if let Err(e) = self.system.tell(&actor_id, ActorMsg::ChainActivated).await {
                debug!("activation of {actor_id} not delivered: {e}");
            }
        }

        drained
    }

    pub async fn set_root_chain(&self, id: &str) -> EngineResult<()> {
        let mut table = self.table.write().await;
        if !table.chains.contains_key(id) {
            return Err(EngineError::ChainNotFound(id.to_string()));
        }
        info!("root rule chain is now {id}");
        table.root = Some(id.to_string());
        Ok(())
    }

    pub async fn root_chain(&self) -> Option<String> {
        self.table.read().await.root.clone()
    }

    /// Stop and forget a chain
    pub async fn unregister(&self, id: &str) -> EngineResult<()> {
        let _registering = self.registrations.lock().await;
        let entry = {
            let mut table = self.table.write().await;
            let entry = table
                .chains
                .remove(id)
                .ok_or_else(|| EngineError::ChainNotFound(id.to_string()))?;
            if table.root.as_deref() == Some(id) {
                table.root = None;
            }
            entry
        };

        debug!("unregistering rule chain {id} ({})", entry.name);
        self.system.destroy(&entry.actor_id).await
    }

    pub async fn chain_ids(&self) -> Vec<String> {
        self.table.read().await.chains.keys().cloned().collect()
    }

    /// Id of the chain `msg` belongs to
    pub async fn resolve_chain(&self, msg: &Message) -> EngineResult<String> {
        self.resolve(msg).await.map(|(chain_id, _)| chain_id)
    }

    /// Chain asked for by the message or its profile, if any
    async fn requested_chain(&self, msg: &Message) -> Option<String> {
        match msg.rule_chain_id() {
            Some(id) => Some(id.to_string()),
            None => self
                .registry
                .profile_for_device(msg.originator_id())
                .await
                .and_then(|profile| profile.default_rule_chain_id.clone()),
        }
    }

    async fn resolve(&self, msg: &Message) -> EngineResult<(String, String)> {
        let requested = self.requested_chain(msg).await;
        self.table.read().await.lookup(requested)
    }

    /// Hand `msg` to the actor of its chain
    pub async fn route(&self, msg: Message) -> EngineResult<()> {
        let requested = self.requested_chain(&msg).await;
        let table = self.table.read().await;
        let (_, actor_id) = table.lookup(requested)?;
        self.system
            .tell(&actor_id, ActorMsg::ToRuleChain { msg, start_at: 0 })
            .await
    }

    /// Like [`RuleEngine::route`], from inside an actor; returns the chain id
    pub(crate) async fn forward(&self, msg: Message, ctx: &ActorContext<ActorMsg>) -> EngineResult<String> {
        let requested = self.requested_chain(&msg).await;
        let table = self.table.read().await;
        let (chain_id, actor_id) = table.lookup(requested)?;
        trace!("routing {} from {} to chain {chain_id}", msg.id(), msg.originator_id());
        ctx.tell(&actor_id, ActorMsg::ToRuleChain { msg, start_at: 0 }).await?;
        Ok(chain_id)
    }

    /// Counters of a chain, after everything queued before this call
    pub async fn chain_stats(&self, id: &str) -> EngineResult<ChainStats> {
        let (tx, rx) = oneshot::channel();
        let actor_id = {
            let table = self.table.read().await;
            let actor_id = table
                .chains
                .get(id)
                .map(|entry| entry.actor_id.clone())
                .ok_or_else(|| EngineError::ChainNotFound(id.to_string()))?;
            self.system
                .tell(&actor_id, ActorMsg::GetChainStats { respond_to: tx })
                .await?;
            actor_id
        };
        rx.await.map_err(|_| EngineError::ActorNotFound(actor_id))
    }
}
