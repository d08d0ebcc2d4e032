//! Integration tests for chain routing and node behaviour

use pretty_assertions::assert_eq;
use telemetry_hub::{
    device::{DeviceProfile, TelemetryDefinition},
    message::Message,
    rule::recipe::NodeRecipe,
    telemetry::{DataType, TelemetryEntry, TelemetryValue},
};

use crate::helpers::*;

fn filter_nodes() -> Vec<NodeRecipe> {
    vec![
        NodeRecipe::Filter {
            key: "temperature".to_string(),
            threshold: 20.0,
        },
        NodeRecipe::SaveTelemetry {
            max_retries: 0,
            retry_delay_ms: 10,
        },
    ]
}

#[tokio::test]
async fn test_filter_node_gates_saving() {
    let mut config = single_device_config(vec![]);
    config.rule_chains = vec![chain(MAIN_CHAIN, true, filter_nodes())];
    let TestHub { hub, telemetry, .. } = start_hub(config).await;

    send(&hub, "d1", r#"{"timestamp": 1, "temperature": 15}"#).await;
    send(&hub, "d1", r#"{"timestamp": 2, "temperature": 25}"#).await;
    send(&hub, "d1", r#"{"timestamp": 3, "humidity": 50}"#).await;
    wait_for_chain(&hub, MAIN_CHAIN, 3).await;

    let stats = hub.rule_engine().chain_stats(MAIN_CHAIN).await.unwrap();
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.succeeded, 2);

    let mut latest = telemetry.latest("d1").await.unwrap();
    latest.sort_by(|a, b| a.key().cmp(b.key()));
    assert_eq!(
        latest,
        vec![
            TelemetryEntry::long("humidity", 3, 50),
            TelemetryEntry::long("temperature", 2, 25),
        ]
    );

    hub.shutdown().await;
}

#[tokio::test]
async fn test_profiles_route_to_their_own_chains() {
    let mut config = single_device_config(vec![]);
    config.rule_chains.push(chain("alpha", false, vec![NodeRecipe::Log]));
    config.rule_chains.push(chain("beta", false, vec![NodeRecipe::Log]));
    for id in ["alpha", "beta"] {
        config.profiles.push(DeviceProfile {
            default_rule_chain_id: Some(id.to_string()),
            ..DeviceProfile::new(id, id)
        });
    }
    config.devices.push(device("a1", Some("alpha")));
    config.devices.push(device("b1", Some("beta")));
    config.devices.push(device("b2", Some("beta")));
    config.devices.push(device("plain", None));
    let TestHub { hub, .. } = start_hub(config).await;

    for device_id in ["a1", "b1", "b2", "plain"] {
        send(&hub, device_id, r#"{"x": 1}"#).await;
    }
    wait_for_chain(&hub, "alpha", 1).await;
    wait_for_chain(&hub, "beta", 2).await;

    // devices without a profile chain fall back to the root chain
    wait_for_chain(&hub, MAIN_CHAIN, 1).await;

    let alpha = hub.rule_engine().chain_stats("alpha").await.unwrap();
    let beta = hub.rule_engine().chain_stats("beta").await.unwrap();
    let root = hub.rule_engine().chain_stats(MAIN_CHAIN).await.unwrap();
    assert_eq!((alpha.processed, beta.processed, root.processed), (1, 2, 1));
    assert_eq!(beta.node_invocations, vec![("log".to_string(), 2)]);

    // an explicit chain on the message wins over the profile
    let msg = Message::telemetry("a1", "{}", vec![], 1).with_rule_chain("beta");
    assert_eq!(hub.rule_engine().resolve_chain(&msg).await.unwrap(), "beta");

    hub.shutdown().await;
}

#[tokio::test]
async fn test_replacing_a_chain_resets_its_state() {
    let TestHub { hub, telemetry, .. } = start_hub(single_device_config(vec![])).await;

    send(&hub, "d1", r#"{"timestamp": 1, "temperature": 10}"#).await;
    wait_for_chain(&hub, MAIN_CHAIN, 1).await;

    hub.register_rule_chain(&chain(MAIN_CHAIN, true, filter_nodes()))
        .await
        .unwrap();
    assert_eq!(hub.rule_engine().chain_stats(MAIN_CHAIN).await.unwrap().processed, 0);

    send(&hub, "d1", r#"{"timestamp": 2, "temperature": 12}"#).await;
    wait_for_chain(&hub, MAIN_CHAIN, 1).await;

    let stats = hub.rule_engine().chain_stats(MAIN_CHAIN).await.unwrap();
    assert_eq!(stats.filtered, 1);

    // the second reading never reached the save node
    let latest = telemetry.latest("d1").await.unwrap();
    assert_eq!(latest[0].ts(), 1);
    assert_eq!(hub.rule_engine().chain_ids().await, vec![MAIN_CHAIN.to_string()]);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_strict_profile_drops_undeclared_keys() {
    let mut config = single_device_config(vec![]);
    config.profiles[0].strict_mode = true;
    config.profiles[0].telemetry_definitions = vec![TelemetryDefinition::new("temperature", DataType::Double)];
    let TestHub { hub, telemetry, .. } = start_hub(config).await;

    send(&hub, "d1", r#"{"temperature": 21, "firmware": "1.2.0"}"#).await;
    send(&hub, "d1", r#"{"firmware": "1.2.1"}"#).await;
    send(&hub, "d1", r#"{"temperature": 22.5}"#).await;
    wait_for_chain(&hub, MAIN_CHAIN, 2).await;

    let latest = telemetry.latest("d1").await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].key(), "temperature");
    assert_eq!(latest[0].value(), &TelemetryValue::Double(22.5));

    // the firmware-only payload had nothing left to route
    let stats = hub.rule_engine().chain_stats(MAIN_CHAIN).await.unwrap();
    assert_eq!(stats.processed, 2);

    hub.shutdown().await;
}
