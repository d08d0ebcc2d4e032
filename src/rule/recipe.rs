//! Building chains from configuration
//!
//! A [`NodeRecipe`] describes a node; [`build_chain`] turns a list of recipes
//! into a fresh [`RuleChain`]. Building the same recipes twice yields two
//! chains that share no node state.

use std::sync::Arc;

use serde::Deserialize;

use super::nodes::{AlarmNode, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, FilterNode, LogNode, SaveTelemetryNode};
use super::{RuleChain, RuleNode};
use crate::alarm::AlarmEvaluator;
use crate::config::RuleChainConfig;
use crate::device::DeviceRegistry;
use crate::storage::TelemetryStore;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeRecipe {
    Log,

    /// Pass messages whose `key` is above `threshold`
    Filter { key: String, threshold: f64 },

    SaveTelemetry {
        #[serde(default = "default_max_retries")]
        max_retries: u32,
        #[serde(default = "default_retry_delay_ms")]
        retry_delay_ms: u64,
    },

    Alarm,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

/// Shared services nodes are built with
#[derive(Clone)]
pub struct NodeDeps {
    pub telemetry_store: Arc<dyn TelemetryStore>,
    pub evaluator: Arc<AlarmEvaluator>,
    pub registry: DeviceRegistry,
}

impl NodeRecipe {
    pub fn build(&self, deps: &NodeDeps) -> Box<dyn RuleNode> {
        match self {
            NodeRecipe::Log => Box::new(LogNode::new()),
            NodeRecipe::Filter { key, threshold } => Box::new(FilterNode::new(key, *threshold)),
            NodeRecipe::SaveTelemetry {
                max_retries,
                retry_delay_ms,
            } => Box::new(
                SaveTelemetryNode::new(Arc::clone(&deps.telemetry_store)).with_retries(*max_retries, *retry_delay_ms),
            ),
            NodeRecipe::Alarm => Box::new(AlarmNode::new(Arc::clone(&deps.evaluator), deps.registry.clone())),
        }
    }
}

pub fn build_chain(config: &RuleChainConfig, deps: &NodeDeps) -> RuleChain {
    let nodes = config.nodes.iter().map(|recipe| recipe.build(deps)).collect();
    let chain = RuleChain::new(&config.id, nodes);

    match &config.name {
        Some(name) => chain.with_name(name),
        None => chain,
    }
}
