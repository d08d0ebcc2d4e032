//! RuleChainActor - runs one chain instance
//!
//! Messages of one originator leave the chain in the order they arrived.
//! A node asking for redelivery does not hold up the mailbox: the message is
//! scheduled back into this actor and re-enters the chain at that node.
//! Until it is through, later messages of the same originator are held
//! back; other originators keep flowing.
//!
//! A replacement instance starts gated: it queues what it receives until
//! the instance it replaces has drained, then works through the queue.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::messages::ActorMsg;
use super::system::{Actor, ActorContext, ActorMessage};
use crate::message::Message;
use crate::rule::{ChainOutcome, RuleChain};

pub struct RuleChainActor {
    chain: RuleChain,

    /// Opened once the predecessor instance is gone; `None` when open
    gate: Option<Arc<AtomicBool>>,

    /// Received while gated
    waiting: VecDeque<(Message, usize)>,

    /// Originators with a deferred message in flight, and what arrived
    /// for them since
    held: HashMap<String, VecDeque<(Message, usize)>>,
}

impl RuleChainActor {
    pub fn new(chain: RuleChain) -> Self {
        Self {
            chain,
            gate: None,
            waiting: VecDeque::new(),
            held: HashMap::new(),
        }
    }

    /// Start gated; nothing is processed before `gate` is set
    pub fn gated(mut self, gate: Arc<AtomicBool>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Whether the gate is open, draining what waited behind it on opening
    async fn open(&mut self, ctx: &ActorContext<ActorMsg>) -> bool {
        match &self.gate {
            None => return true,
            Some(gate) if !gate.load(Ordering::SeqCst) => return false,
            Some(_) => {}
        }

        self.gate = None;
        debug!(
            "rule chain {} activated with {} waiting messages",
            self.chain.id(),
            self.waiting.len()
        );
        for (msg, start_at) in mem::take(&mut self.waiting) {
            self.accept(msg, start_at, ctx).await;
        }
        true
    }

    async fn accept(&mut self, msg: Message, start_at: usize, ctx: &ActorContext<ActorMsg>) {
        match self.held.get_mut(msg.originator_id()) {
            Some(queue) => {
                debug!(
                    "holding {} from {} behind a pending redelivery",
                    msg.id(),
                    msg.originator_id()
                );
                queue.push_back((msg, start_at));
            }
            None => {
                let originator = msg.originator_id().to_string();
                if !self.run(msg, start_at, ctx).await {
                    self.held.insert(originator, VecDeque::new());
                }
            }
        }
    }

    /// Returns `false` if the message was deferred
    async fn run(&mut self, msg: Message, start_at: usize, ctx: &ActorContext<ActorMsg>) -> bool {
        match self.chain.process(msg, start_at).await {
            ChainOutcome::Deferred { index, msg, delay } => {
                ctx.schedule_self(ActorMsg::Redeliver { msg, start_at: index }, delay);
                false
            }
            _ => true,
        }
    }

    async fn redeliver(&mut self, msg: Message, start_at: usize, ctx: &ActorContext<ActorMsg>) {
        let originator = msg.originator_id().to_string();
        if !self.run(msg, start_at, ctx).await {
            return;
        }

        let Some(mut queue) = self.held.remove(&originator) else {
            return;
        };
        while let Some((msg, start_at)) = queue.pop_front() {
            if !self.run(msg, start_at, ctx).await {
                self.held.insert(originator, queue);
                return;
            }
        }
    }
}

#[async_trait]
impl Actor<ActorMsg> for RuleChainActor {
    async fn init(&mut self, _ctx: &ActorContext<ActorMsg>) -> anyhow::Result<()> {
        debug!("rule chain {} started with {} nodes", self.chain.id(), self.chain.len());
        Ok(())
    }

    async fn process(&mut self, msg: ActorMsg, ctx: &ActorContext<ActorMsg>) -> anyhow::Result<()> {
        match msg {
            ActorMsg::ToRuleChain { msg, start_at } => {
                if self.open(ctx).await {
                    self.accept(msg, start_at, ctx).await;
                } else {
                    self.waiting.push_back((msg, start_at));
                }
            }

            ActorMsg::Redeliver { msg, start_at } => self.redeliver(msg, start_at, ctx).await,

            ActorMsg::ChainActivated => {
                self.open(ctx).await;
            }

            ActorMsg::GetChainStats { respond_to } => {
                let _ = respond_to.send(self.chain.stats().clone());
            }

            other => warn!("rule chain {} ignoring {} message", self.chain.id(), other.kind()),
        }

        Ok(())
    }

    async fn destroy(&mut self, _ctx: &ActorContext<ActorMsg>) {
        // redeliveries are cancelled on stop; what was held behind them still runs
        let pending = mem::take(&mut self.waiting)
            .into_iter()
            .chain(mem::take(&mut self.held).into_values().flatten());
        for (msg, start_at) in pending {
            if let ChainOutcome::Deferred { msg, .. } = self.chain.process(msg, start_at).await {
                warn!(
                    "rule chain {} stopped, retry of {} from {} abandoned",
                    self.chain.id(),
                    msg.id(),
                    msg.originator_id()
                );
            }
        }

        let stats = self.chain.stats();
        debug!(
            "rule chain {} stopped after {} messages ({} succeeded, {} failed)",
            self.chain.id(),
            stats.processed,
            stats.succeeded,
            stats.failed
        );
    }
}
