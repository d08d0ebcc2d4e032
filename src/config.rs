use crate::actors::mailbox::OverflowPolicy;
use crate::device::{Device, DeviceProfile};
use crate::rule::recipe::NodeRecipe;
use tracing::{debug, trace};

/// Actor runtime tuning
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ActorSystemConfig {
    /// How many actors may process messages at the same time
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Messages each mailbox holds before the overflow policy applies
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Messages an actor handles per worker permit
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ActorSystemConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            mailbox_capacity: default_mailbox_capacity(),
            overflow: OverflowPolicy::default(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_mailbox_capacity() -> usize {
    1024
}

fn default_batch_size() -> usize {
    10
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RuleChainConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,

    /// Fallback chain for messages without a chain of their own
    #[serde(default)]
    pub root: bool,
    pub nodes: Vec<NodeRecipe>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    pub access_token: String,
    pub profile_id: Option<String>,
    pub device_type: Option<String>,
}

impl From<DeviceConfig> for Device {
    fn from(config: DeviceConfig) -> Self {
        let DeviceConfig {
            id,
            name,
            access_token,
            profile_id,
            device_type,
        } = config;

        Device {
            profile_id,
            device_type,
            ..Device::new(id, name, access_token)
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NotificationConfig {
    /// Seconds between two repeat-notification checks
    #[serde(default = "default_repeat_check_secs")]
    pub repeat_check_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            repeat_check_secs: default_repeat_check_secs(),
            enabled: default_enabled(),
        }
    }
}

fn default_repeat_check_secs() -> u64 {
    60
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub actors: ActorSystemConfig,
    #[serde(default)]
    pub rule_chains: Vec<RuleChainConfig>,
    #[serde(default)]
    pub profiles: Vec<DeviceProfile>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Config {
    /// Let `HUB_WORKERS` and `HUB_MAILBOX_CAPACITY` override the file
    pub fn apply_env_overrides(&mut self) {
        if let Some(workers) = crate::util::get_workers() {
            debug!("worker count overridden from environment: {workers}");
            self.actors.workers = workers;
        }
        if let Some(capacity) = crate::util::get_mailbox_capacity() {
            debug!("mailbox capacity overridden from environment: {capacity}");
            self.actors.mailbox_capacity = capacity;
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
