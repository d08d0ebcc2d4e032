use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::message::{META_RETRY_ATTEMPT, Message};
use crate::rule::{RuleNode, RuleNodeContext};
use crate::storage::TelemetryStore;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Persists every entry of a message.
///
/// A failed write is retried by redelivering the message to this node, up
/// to `max_retries` times; the attempt count travels in the message
/// metadata under `retryAttempt`.
pub struct SaveTelemetryNode {
    store: Arc<dyn TelemetryStore>,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl SaveTelemetryNode {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self {
            store,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }
}

#[async_trait]
impl RuleNode for SaveTelemetryNode {
    fn name(&self) -> &str {
        "save_telemetry"
    }

    async fn on_msg(&mut self, mut msg: Message, ctx: &mut RuleNodeContext) -> anyhow::Result<()> {
        if msg.entries().is_empty() {
            ctx.tell_success(msg);
            return Ok(());
        }

        match self.store.save(msg.originator_id(), msg.entries()).await {
            Ok(()) => {
                debug!("saved {} entries for {}", msg.entries().len(), msg.originator_id());
                msg.remove_metadata(META_RETRY_ATTEMPT);
                ctx.tell_success(msg);
            }
            Err(e) => {
                let attempt: u32 = msg
                    .metadata_value(META_RETRY_ATTEMPT)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);

                if attempt < self.max_retries {
                    warn!(
                        "failed to save telemetry of {} (attempt {}/{}): {e}",
                        msg.originator_id(),
                        attempt + 1,
                        self.max_retries + 1
                    );
                    msg.put_metadata(META_RETRY_ATTEMPT, (attempt + 1).to_string());
                    ctx.tell_self(msg, self.retry_delay_ms);
                } else {
                    ctx.tell_failure(msg, format!("telemetry not saved after {} retries: {e}", attempt));
                }
            }
        }

        Ok(())
    }
}
