//! Helper functions for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use telemetry_hub::{
    HubParts, TelemetryHub,
    alarm::{AlarmCondition, AlarmConditionFilter, AlarmRule, AlarmSeverity},
    config::{ActorSystemConfig, Config, DeviceConfig, NotificationConfig, RuleChainConfig},
    device::DeviceProfile,
    rule::recipe::NodeRecipe,
    storage::{MemoryAlarmStore, MemoryTelemetryStore, TelemetryStore},
    util::ManualClock,
};

pub const THERMO_PROFILE: &str = "thermo";
pub const MAIN_CHAIN: &str = "main";

/// `CRITICAL: temperature > 85`, cleared by `temperature < 75`
pub fn high_temperature_rule() -> AlarmRule {
    AlarmRule::new("high-temp", "High Temperature")
        .with_create(
            AlarmSeverity::Critical,
            AlarmCondition::simple(vec![AlarmConditionFilter::greater_than("temperature", 85i64)]),
        )
        .with_clear(AlarmCondition::simple(vec![AlarmConditionFilter::less_than(
            "temperature",
            75i64,
        )]))
}

/// WARNING > 75, MAJOR > 80, CRITICAL > 85
pub fn escalating_rule() -> AlarmRule {
    AlarmRule::new("escalating", "High Temperature")
        .with_create(
            AlarmSeverity::Warning,
            AlarmCondition::simple(vec![AlarmConditionFilter::greater_than("temperature", 75i64)]),
        )
        .with_create(
            AlarmSeverity::Major,
            AlarmCondition::simple(vec![AlarmConditionFilter::greater_than("temperature", 80i64)]),
        )
        .with_create(
            AlarmSeverity::Critical,
            AlarmCondition::simple(vec![AlarmConditionFilter::greater_than("temperature", 85i64)]),
        )
}

pub fn thermo_profile(rules: Vec<AlarmRule>) -> DeviceProfile {
    DeviceProfile {
        alarm_rules: rules,
        default_rule_chain_id: Some(MAIN_CHAIN.to_string()),
        ..DeviceProfile::new(THERMO_PROFILE, "Thermometer")
    }
}

pub fn device(id: &str, profile: Option<&str>) -> DeviceConfig {
    DeviceConfig {
        id: id.to_string(),
        name: format!("Sensor {id}"),
        access_token: token(id),
        profile_id: profile.map(str::to_string),
        device_type: None,
    }
}

pub fn token(device_id: &str) -> String {
    format!("token-{device_id}")
}

pub fn chain(id: &str, root: bool, nodes: Vec<NodeRecipe>) -> RuleChainConfig {
    RuleChainConfig {
        id: id.to_string(),
        name: None,
        root,
        nodes,
    }
}

/// log -> save -> alarm
pub fn standard_nodes() -> Vec<NodeRecipe> {
    vec![
        NodeRecipe::Log,
        NodeRecipe::SaveTelemetry {
            max_retries: 3,
            retry_delay_ms: 10,
        },
        NodeRecipe::Alarm,
    ]
}

pub fn single_device_config(rules: Vec<AlarmRule>) -> Config {
    Config {
        actors: ActorSystemConfig::default(),
        rule_chains: vec![chain(MAIN_CHAIN, true, standard_nodes())],
        profiles: vec![thermo_profile(rules)],
        devices: vec![device("d1", Some(THERMO_PROFILE))],
        notifications: NotificationConfig {
            enabled: false,
            ..Default::default()
        },
    }
}

pub struct TestHub {
    pub hub: TelemetryHub,
    pub clock: ManualClock,
    pub telemetry: Arc<dyn TelemetryStore>,
}

pub async fn start_hub(config: Config) -> TestHub {
    start_hub_with_store(config, Arc::new(MemoryTelemetryStore::new())).await
}

pub async fn start_hub_with_store(config: Config, telemetry: Arc<dyn TelemetryStore>) -> TestHub {
    let clock = ManualClock::new(1_000_000);
    let hub = TelemetryHub::start_with(
        config,
        HubParts {
            telemetry_store: Arc::clone(&telemetry),
            alarm_store: Arc::new(MemoryAlarmStore::new()),
            clock: Arc::new(clock.clone()),
        },
    )
    .await
    .unwrap();

    TestHub { hub, clock, telemetry }
}

/// Send one payload as device `device_id`
pub async fn send(hub: &TelemetryHub, device_id: &str, payload: &str) {
    hub.transport()
        .ingest(&token(device_id), payload, 1_000)
        .await
        .unwrap();
}

/// Wait until `chain` has seen `count` messages leave it
pub async fn wait_for_chain(hub: &TelemetryHub, chain: &str, count: u64) {
    eventually(|| async move {
        let stats = hub.rule_engine().chain_stats(chain).await.unwrap();
        stats.succeeded + stats.filtered + stats.failed + stats.dropped >= count
    })
    .await;
}

/// Poll `check` until it holds, failing the test after five seconds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(polled.is_ok(), "condition not reached in time");
}
