use async_trait::async_trait;
use tracing::info;

use crate::message::{META_DEVICE_NAME, Message};
use crate::rule::{RuleNode, RuleNodeContext};

/// Writes a one-line summary of every message and passes it on
#[derive(Debug, Default)]
pub struct LogNode {
    logged: u64,
}

impl LogNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages logged by this instance
    pub fn logged(&self) -> u64 {
        self.logged
    }
}

#[async_trait]
impl RuleNode for LogNode {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_msg(&mut self, msg: Message, ctx: &mut RuleNodeContext) -> anyhow::Result<()> {
        self.logged += 1;

        let keys: Vec<&str> = msg.entries().iter().map(|e| e.key()).collect();
        info!(
            "[{}] {} from {} ({}) at {}: [{}]",
            ctx.chain_id(),
            msg.msg_type(),
            msg.metadata_value(META_DEVICE_NAME).unwrap_or("?"),
            msg.originator_id(),
            msg.ts(),
            keys.join(", ")
        );

        ctx.tell_success(msg);
        Ok(())
    }
}
