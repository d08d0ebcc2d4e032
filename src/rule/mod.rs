//! Rule chains
//!
//! A chain is an ordered list of [`RuleNode`]s. A message enters at a node
//! index and each node decides, through its [`RuleNodeContext`], where the
//! message goes next:
//!
//! ```text
//!  msg ──→ [0 log] ──SUCCESS──→ [1 filter] ──TRUE──→ [2 save] ──SUCCESS──→ [3 alarm] ──→ done
//!                                   │                    │
//!                                 FALSE               tell_self(delay)
//!                                   ↓                    ↓
//!                               filtered          redelivered to node 2
//! ```
//!
//! The cursor is a plain index carried by the caller, so a chain can never
//! loop back on itself.

pub mod engine;
pub mod nodes;
pub mod recipe;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

use crate::message::Message;
use crate::util::now_millis;

pub use engine::RuleEngine;

/// Named edge between a node and what follows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Success,
    Failure,
    True,
    False,
    Other(String),
}

impl Relation {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "SUCCESS" => Relation::Success,
            "FAILURE" => Relation::Failure,
            "TRUE" => Relation::True,
            "FALSE" => Relation::False,
            _ => Relation::Other(name.to_string()),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Success => f.write_str("SUCCESS"),
            Relation::Failure => f.write_str("FAILURE"),
            Relation::True => f.write_str("TRUE"),
            Relation::False => f.write_str("FALSE"),
            Relation::Other(name) => f.write_str(name),
        }
    }
}

/// Where a node sent its message
#[derive(Debug)]
enum Route {
    Next(Message, Relation),
    Failure(Message, String),
    Redeliver(Message, Duration),
}

/// Handed to a node for the duration of one `on_msg` call
#[derive(Debug)]
pub struct RuleNodeContext {
    chain_id: String,
    node_name: String,
    route: Option<Route>,
}

impl RuleNodeContext {
    fn new(chain_id: &str, node_name: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            node_name: node_name.to_string(),
            route: None,
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Continue with the next node
    pub fn tell_success(&mut self, msg: Message) {
        self.set_route(Route::Next(msg, Relation::Success));
    }

    /// Stop the chain for this message; the failure is logged
    pub fn tell_failure(&mut self, msg: Message, cause: impl Into<String>) {
        self.set_route(Route::Failure(msg, cause.into()));
    }

    pub fn tell_next(&mut self, msg: Message, relation: &str) {
        self.set_route(Route::Next(msg, Relation::parse(relation)));
    }

    /// Hand the message back to this node after `delay_ms`
    pub fn tell_self(&mut self, msg: Message, delay_ms: u64) {
        self.set_route(Route::Redeliver(msg, Duration::from_millis(delay_ms)));
    }

    fn set_route(&mut self, route: Route) {
        if self.route.is_some() {
            warn!(
                "node '{}' in chain {} routed a message twice, ignoring the second route",
                self.node_name, self.chain_id
            );
            return;
        }
        self.route = Some(route);
    }
}

/// One processing step of a chain.
///
/// `on_msg` must route the message through exactly one of the context's
/// `tell_*` calls. Returning an error counts as a failure of the message.
#[async_trait]
pub trait RuleNode: Send {
    fn name(&self) -> &str;

    async fn on_msg(&mut self, msg: Message, ctx: &mut RuleNodeContext) -> anyhow::Result<()>;
}

/// How a message left the chain
#[derive(Debug)]
pub enum ChainOutcome {
    /// Passed every node
    Completed(Message),

    /// A node answered `FALSE`
    Filtered { node: String, msg: Message },

    Failed { node: String, cause: String },

    /// Must be fed back into the chain at `index` after `delay`
    Deferred {
        index: usize,
        msg: Message,
        delay: Duration,
    },

    /// A node returned without routing the message
    Dropped { node: String },
}

/// Counters for one chain instance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChainStats {
    pub processed: u64,
    pub succeeded: u64,
    pub filtered: u64,
    pub failed: u64,
    pub deferred: u64,
    pub dropped: u64,

    /// `(node name, on_msg calls)` in chain order
    pub node_invocations: Vec<(String, u64)>,

    /// Epoch millis of the last time a message left the chain
    pub last_processed_ts: Option<i64>,
}

pub struct RuleChain {
    id: String,
    name: String,
    nodes: Vec<Box<dyn RuleNode>>,
    stats: ChainStats,
}

impl fmt::Debug for RuleChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleChain")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.node_names())
            .finish()
    }
}

impl RuleChain {
    pub fn new(id: impl Into<String>, nodes: Vec<Box<dyn RuleNode>>) -> Self {
        let id = id.into();
        let node_invocations = nodes.iter().map(|n| (n.name().to_string(), 0)).collect();

        Self {
            name: id.clone(),
            id,
            nodes,
            stats: ChainStats {
                node_invocations,
                ..Default::default()
            },
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    pub fn stats(&self) -> &ChainStats {
        &self.stats
    }

    /// Run `msg` through the chain starting at node `start_at`
    #[instrument(skip(self, msg), fields(chain = %self.id, msg_id = %msg.id()))]
    pub async fn process(&mut self, msg: Message, start_at: usize) -> ChainOutcome {
        if start_at == 0 {
            self.stats.processed += 1;
        }

        let outcome = self.walk(msg, start_at).await;

        match &outcome {
            ChainOutcome::Completed(_) => self.stats.succeeded += 1,
            ChainOutcome::Filtered { node, .. } => {
                debug!("message filtered out by '{node}'");
                self.stats.filtered += 1;
            }
            ChainOutcome::Failed { node, cause } => {
                warn!("message failed in node '{node}' of chain {}: {cause}", self.id);
                self.stats.failed += 1;
            }
            ChainOutcome::Deferred { index, delay, .. } => {
                debug!("message deferred to node {index} for {delay:?}");
                self.stats.deferred += 1;
            }
            ChainOutcome::Dropped { node } => {
                warn!("node '{node}' of chain {} did not route its message", self.id);
                self.stats.dropped += 1;
            }
        }
        self.stats.last_processed_ts = Some(now_millis());

        outcome
    }

    async fn walk(&mut self, mut msg: Message, start_at: usize) -> ChainOutcome {
        let mut index = start_at;

        while let Some(node) = self.nodes.get_mut(index) {
            let node_name = node.name().to_string();
            if let Some((_, calls)) = self.stats.node_invocations.get_mut(index) {
                *calls += 1;
            }

            let mut ctx = RuleNodeContext::new(&self.id, &node_name);
            trace!("node {index} ('{node_name}') <- {}", msg.id());

            if let Err(e) = node.on_msg(msg, &mut ctx).await {
                return ChainOutcome::Failed {
                    node: node_name,
                    cause: format!("{e:#}"),
                };
            }

            match ctx.route {
                None => return ChainOutcome::Dropped { node: node_name },

                Some(Route::Failure(_, cause)) => {
                    return ChainOutcome::Failed {
                        node: node_name,
                        cause,
                    };
                }

                Some(Route::Redeliver(next, delay)) => {
                    return ChainOutcome::Deferred {
                        index,
                        msg: next,
                        delay,
                    };
                }

                Some(Route::Next(next, relation)) => match relation {
                    Relation::Success | Relation::True => msg = next,
                    Relation::False => {
                        return ChainOutcome::Filtered {
                            node: node_name,
                            msg: next,
                        };
                    }
                    Relation::Failure => {
                        return ChainOutcome::Failed {
                            node: node_name,
                            cause: "routed to FAILURE".to_string(),
                        };
                    }
                    Relation::Other(name) => {
                        warn!("unknown relation '{name}' from node '{node_name}', treating it as SUCCESS");
                        msg = next;
                    }
                },
            }

            index += 1;
        }

        ChainOutcome::Completed(msg)
    }
}
