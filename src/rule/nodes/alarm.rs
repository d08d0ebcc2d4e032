use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::alarm::AlarmEvaluator;
use crate::alarm::evaluator::snapshot_of;
use crate::device::DeviceRegistry;
use crate::message::{META_DEVICE_NAME, Message};
use crate::rule::{RuleNode, RuleNodeContext};

/// Runs the alarm rules of the originator's profile against the message.
///
/// Broken rules are reported by the evaluator and do not fail the message.
pub struct AlarmNode {
    evaluator: Arc<AlarmEvaluator>,
    registry: DeviceRegistry,
}

impl AlarmNode {
    pub fn new(evaluator: Arc<AlarmEvaluator>, registry: DeviceRegistry) -> Self {
        Self { evaluator, registry }
    }
}

#[async_trait]
impl RuleNode for AlarmNode {
    fn name(&self) -> &str {
        "alarm"
    }

    async fn on_msg(&mut self, msg: Message, ctx: &mut RuleNodeContext) -> anyhow::Result<()> {
        let device_id = msg.originator_id();

        let Some(profile) = self.registry.profile_for_device(device_id).await else {
            trace!("device {device_id} has no profile, nothing to evaluate");
            ctx.tell_success(msg);
            return Ok(());
        };

        let device_name = msg.metadata_value(META_DEVICE_NAME).unwrap_or(device_id);
        let snapshot = snapshot_of(msg.entries());

        let report = self
            .evaluator
            .evaluate(device_id, device_name, &profile, &snapshot)
            .await;

        debug!(
            "{device_name}: {} alarms raised, {} cleared, {} rules failed",
            report.raised().count(),
            report.cleared().count(),
            report.errors.len()
        );

        ctx.tell_success(msg);
        Ok(())
    }
}
