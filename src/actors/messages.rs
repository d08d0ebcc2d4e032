//! Message types for actor communication
//!
//! Device, rule-engine and rule-chain actors all share one mailbox message
//! type, [`ActorMsg`]. Each actor only handles the variants addressed to it
//! and logs anything else.
//!
//! 1. **Transport events**: raw payloads and session changes for a device actor
//! 2. **Routing**: telemetry messages on their way into and through a chain
//! 3. **Request/Response**: oneshot channels for state queries

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::warn;

use super::system::ActorMessage;
use crate::message::Message;
use crate::rule::ChainStats;

/// Id of the single actor that routes messages to chains
pub const RULE_ENGINE_ACTOR_ID: &str = "RuleEngine";

pub const DEVICE_ACTOR_PREFIX: &str = "Device:";

pub fn device_actor_id(device_id: &str) -> String {
    format!("{DEVICE_ACTOR_PREFIX}{device_id}")
}

pub fn rule_chain_actor_id(chain_id: &str) -> String {
    format!("RuleChain:{chain_id}")
}

#[derive(Debug)]
pub enum ActorMsg {
    /// Raw payload received from a transport for a device
    Transport {
        session_id: Option<String>,
        payload: String,
        arrival_ts: i64,
    },

    DeviceConnected {
        session_id: String,
    },

    /// Ends every session of the device
    DeviceDisconnected {
        session_id: String,
    },

    GetDeviceState {
        respond_to: oneshot::Sender<DeviceState>,
    },

    /// Message waiting to be routed to its chain
    ToRuleEngine(Message),

    /// Run `msg` through the chain, beginning at node `start_at`
    ToRuleChain {
        msg: Message,
        start_at: usize,
    },

    /// A deferred message coming back to its chain after its delay
    Redeliver {
        msg: Message,
        start_at: usize,
    },

    /// The chain instance this one replaced has drained
    ChainActivated,

    GetChainStats {
        respond_to: oneshot::Sender<ChainStats>,
    },
}

impl ActorMessage for ActorMsg {
    fn kind(&self) -> &'static str {
        match self {
            ActorMsg::Transport { .. } => "Transport",
            ActorMsg::DeviceConnected { .. } => "DeviceConnected",
            ActorMsg::DeviceDisconnected { .. } => "DeviceDisconnected",
            ActorMsg::GetDeviceState { .. } => "GetDeviceState",
            ActorMsg::ToRuleEngine(_) => "ToRuleEngine",
            ActorMsg::ToRuleChain { .. } => "ToRuleChain",
            ActorMsg::Redeliver { .. } => "Redeliver",
            ActorMsg::ChainActivated => "ChainActivated",
            ActorMsg::GetChainStats { .. } => "GetChainStats",
        }
    }

    fn message_id(&self) -> Option<String> {
        match self {
            ActorMsg::ToRuleEngine(msg) | ActorMsg::ToRuleChain { msg, .. } | ActorMsg::Redeliver { msg, .. } => {
                Some(msg.id().to_string())
            }
            ActorMsg::Transport { session_id, .. } => session_id.clone(),
            _ => None,
        }
    }

    fn on_actor_stopped(self, actor_id: &str) {
        match self {
            ActorMsg::ToRuleEngine(msg) | ActorMsg::ToRuleChain { msg, .. } | ActorMsg::Redeliver { msg, .. } => {
                warn!("actor {actor_id} stopped, message {} from {} lost", msg.id(), msg.originator_id());
            }
            other => warn!("actor {actor_id} stopped, discarding {} message", other.kind()),
        }
    }
}

/// Snapshot of a device actor's connection bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub device_id: String,
    pub connected: bool,

    /// Epoch millis of the last transport event, if any
    pub last_activity: Option<i64>,
    pub session_count: usize,
}
