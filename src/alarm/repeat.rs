//! RepeatNotifier - re-publishes alarms nobody has acknowledged
//!
//! Every check interval, open unacknowledged alarms whose last notification
//! is older than their severity's repeat interval get a
//! [`AlarmEventKind::Repeated`](super::AlarmEventKind::Repeated) event and
//! their `notification_count` bumped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use super::AlarmService;
use crate::error::EngineResult;

/// Default time between two checks
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum RepeatCommand {
    /// Run a check right away
    CheckNow {
        respond_to: oneshot::Sender<EngineResult<usize>>,
    },

    Shutdown,
}

pub struct RepeatNotifier {
    service: Arc<AlarmService>,
    check_interval: Duration,
    command_rx: mpsc::Receiver<RepeatCommand>,
}

impl RepeatNotifier {
    /// Re-publish every alarm that is due; returns how many were repeated
    pub async fn check(service: &AlarmService) -> EngineResult<usize> {
        let now = service.clock().now_millis();
        let mut repeated = 0;

        for alarm in service.find_all_unacknowledged().await? {
            if !alarm.needs_repeat_notification(now) {
                continue;
            }
            let Some(alarm) = service.record_repeat(&alarm.id).await? else {
                continue;
            };
            info!(
                "repeating alarm (#{}): {} [{}] ({})",
                alarm.notification_count, alarm.alarm_type, alarm.severity, alarm.originator_name
            );
            repeated += 1;
        }

        if repeated > 0 {
            debug!("repeated {repeated} alarms this round");
        }
        Ok(repeated)
    }

    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting repeat notifier (every {:?})", self.check_interval);

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = Self::check(&self.service).await {
                        error!("repeat notification check failed: {e}");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        RepeatCommand::CheckNow { respond_to } => {
                            let _ = respond_to.send(Self::check(&self.service).await);
                        }
                        RepeatCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("repeat notifier stopped");
    }
}

/// Handle for controlling a running [`RepeatNotifier`]
#[derive(Clone)]
pub struct RepeatNotifierHandle {
    sender: mpsc::Sender<RepeatCommand>,
}

impl RepeatNotifierHandle {
    pub fn spawn(service: Arc<AlarmService>, check_interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let notifier = RepeatNotifier {
            service,
            check_interval,
            command_rx: cmd_rx,
        };

        tokio::spawn(notifier.run());

        Self { sender: cmd_tx }
    }

    pub async fn check_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RepeatCommand::CheckNow { respond_to: tx })
            .await
            .context("failed to send CheckNow command")?;

        Ok(rx.await.context("failed to receive CheckNow response")??)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(RepeatCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
