//! RuleEngineActor - entry point for every telemetry message
//!
//! Resolves the chain of each message and forwards it to that chain's
//! actor. Routing failures surface as processing errors of this actor.

use async_trait::async_trait;
use tracing::warn;

use super::messages::ActorMsg;
use super::system::{Actor, ActorContext, ActorMessage};
use crate::rule::RuleEngine;

pub struct RuleEngineActor {
    engine: RuleEngine,
}

impl RuleEngineActor {
    pub fn new(engine: RuleEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Actor<ActorMsg> for RuleEngineActor {
    async fn process(&mut self, msg: ActorMsg, ctx: &ActorContext<ActorMsg>) -> anyhow::Result<()> {
        match msg {
            ActorMsg::ToRuleEngine(msg) => {
                self.engine.forward(msg, ctx).await?;
            }

            other => warn!("rule engine ignoring {} message", other.kind()),
        }

        Ok(())
    }
}
