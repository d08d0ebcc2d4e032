use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

const HUB_WORKERS: &str = "HUB_WORKERS";

const HUB_MAILBOX_CAPACITY: &str = "HUB_MAILBOX_CAPACITY";

/// Worker count from the environment, if set and valid.
pub fn get_workers() -> Option<usize> {
    let workers_from_env = std::env::var(HUB_WORKERS);
    workers_from_env
        .ok()
        .and_then(|res| res.parse().ok())
        .filter(|workers| *workers > 0)
}

/// Mailbox capacity from the environment, if set and valid.
pub fn get_mailbox_capacity() -> Option<usize> {
    let capacity_from_env = std::env::var(HUB_MAILBOX_CAPACITY);
    capacity_from_env
        .ok()
        .and_then(|res| res.parse().ok())
        .filter(|capacity| *capacity > 0)
}

/// Source of wall-clock time in epoch milliseconds.
///
/// Alarm timestamps and DURATION conditions read time through this trait so
/// tests can drive time by hand.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_millis)),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub fn now_millis() -> i64 {
    SystemClock.now_millis()
}
