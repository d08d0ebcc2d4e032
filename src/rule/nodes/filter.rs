use async_trait::async_trait;
use tracing::trace;

use crate::message::Message;
use crate::rule::{RuleNode, RuleNodeContext};

/// Lets a message through when `key > threshold`.
///
/// A message without a numeric `key` is passed through as well; only a
/// present value at or below the threshold answers `FALSE`.
#[derive(Debug, Clone)]
pub struct FilterNode {
    name: String,
    key: String,
    threshold: f64,
}

impl FilterNode {
    pub fn new(key: impl Into<String>, threshold: f64) -> Self {
        let key = key.into();
        Self {
            name: format!("filter({key} > {threshold})"),
            key,
            threshold,
        }
    }
}

#[async_trait]
impl RuleNode for FilterNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_msg(&mut self, msg: Message, ctx: &mut RuleNodeContext) -> anyhow::Result<()> {
        let value = msg.entry(&self.key).and_then(|e| e.value().as_f64());

        match value {
            Some(value) if value > self.threshold => ctx.tell_next(msg, "TRUE"),
            Some(value) => {
                trace!("{} = {value} is not above {}", self.key, self.threshold);
                ctx.tell_next(msg, "FALSE");
            }
            None => {
                trace!("no numeric '{}' in message, letting it through", self.key);
                ctx.tell_success(msg);
            }
        }

        Ok(())
    }
}
