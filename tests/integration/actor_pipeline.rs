//! Integration tests for the full pipeline
//!
//! transport -> device actor -> rule engine -> chain actor -> nodes

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use telemetry_hub::{
    EngineError,
    alarm::{AlarmEventKind, AlarmSeverity, AlarmStatus},
    telemetry::TelemetryValue,
};

use crate::helpers::*;

#[tokio::test]
async fn test_simple_alarm_raised_from_ingested_telemetry() {
    let TestHub { hub, telemetry, .. } = start_hub(single_device_config(vec![high_temperature_rule()])).await;

    send(&hub, "d1", r#"{"temperature": 70}"#).await;
    wait_for_chain(&hub, MAIN_CHAIN, 1).await;
    assert!(hub.alarms().find_all_active().await.unwrap().is_empty());

    send(&hub, "d1", r#"{"temperature": 90}"#).await;
    wait_for_chain(&hub, MAIN_CHAIN, 2).await;

    let active = hub.alarms().find_all_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].alarm_type, "High Temperature");
    assert_eq!(active[0].severity, AlarmSeverity::Critical);
    assert_eq!(active[0].status(), AlarmStatus::ActiveUnack);
    assert_eq!(active[0].originator_name, "Sensor d1");

    let latest = telemetry.latest("d1").await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].value(), &TelemetryValue::Long(90));

    hub.shutdown().await;
}

#[tokio::test]
async fn test_escalation_keeps_one_alarm() {
    let TestHub { hub, .. } = start_hub(single_device_config(vec![escalating_rule()])).await;

    let mut ids = vec![];
    for (n, (value, severity)) in [
        (76, AlarmSeverity::Warning),
        (82, AlarmSeverity::Major),
        (88, AlarmSeverity::Critical),
    ]
    .into_iter()
    .enumerate()
    {
        send(&hub, "d1", &format!(r#"{{"temperature": {value}}}"#)).await;
        wait_for_chain(&hub, MAIN_CHAIN, n as u64 + 1).await;

        let alarms = hub.alarms().find_by_originator("d1").await.unwrap();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].severity, severity);
        ids.push(alarms[0].id.clone());
    }

    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    hub.shutdown().await;
}

#[tokio::test]
async fn test_clear_publishes_events_and_keeps_alarm() {
    let TestHub { hub, .. } = start_hub(single_device_config(vec![high_temperature_rule()])).await;
    let mut events = hub.subscribe_alarms();

    send(&hub, "d1", r#"{"temperature": 90}"#).await;
    send(&hub, "d1", r#"{"temperature": 70}"#).await;
    wait_for_chain(&hub, MAIN_CHAIN, 2).await;

    let created = events.recv().await.unwrap();
    assert_eq!(created.kind, AlarmEventKind::Created);
    let cleared = events.recv().await.unwrap();
    assert_eq!(cleared.kind, AlarmEventKind::Cleared);
    assert_eq!(cleared.alarm.id, created.alarm.id);

    let stored = hub.alarms().find_by_id(&created.alarm.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), AlarmStatus::ClearedUnack);
    assert!(stored.clear_ts.is_some());

    hub.shutdown().await;
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let TestHub { hub, telemetry, .. } = start_hub(single_device_config(vec![])).await;

    send(&hub, "d1", "{not json").await;
    send(&hub, "d1", "[1, 2, 3]").await;
    send(&hub, "d1", r#"{"humidity": 40.5}"#).await;
    wait_for_chain(&hub, MAIN_CHAIN, 1).await;

    let stats = hub.rule_engine().chain_stats(MAIN_CHAIN).await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(telemetry.latest("d1").await.unwrap().len(), 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_unknown_token_is_rejected() {
    let TestHub { hub, .. } = start_hub(single_device_config(vec![])).await;

    assert_matches!(
        hub.transport().ingest("nobody", "{}", 0).await,
        Err(EngineError::UnknownAccessToken)
    );
    assert_matches!(
        hub.transport().connect("nobody", "s1").await,
        Err(EngineError::UnknownAccessToken)
    );

    hub.shutdown().await;
}

#[tokio::test]
async fn test_sessions_tracked_through_transport() {
    let TestHub { hub, .. } = start_hub(single_device_config(vec![])).await;
    let device_token = token("d1");

    assert_eq!(hub.transport().connect(&device_token, "mqtt-1").await.unwrap(), "d1");
    hub.transport().connect(&device_token, "mqtt-2").await.unwrap();

    let state = hub.device_state("d1").await.unwrap();
    assert!(state.connected);
    assert_eq!(state.session_count, 2);

    hub.transport().disconnect(&device_token, "mqtt-2").await.unwrap();
    let state = hub.device_state("d1").await.unwrap();
    assert!(!state.connected);
    assert_eq!(state.session_count, 0);

    assert_matches!(hub.device_state("ghost").await, Err(EngineError::DeviceNotFound(_)));
    hub.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_finishes_accepted_payloads() {
    let TestHub { hub, telemetry, .. } = start_hub(single_device_config(vec![])).await;

    for n in 0..25 {
        send(&hub, "d1", &format!(r#"{{"timestamp": {n}, "counter": {n}}}"#)).await;
    }
    hub.shutdown().await;

    let history = telemetry
        .query(telemetry_hub::storage::TelemetryQuery {
            device_id: "d1".to_string(),
            key: "counter".to_string(),
            start: 0,
            end: 100,
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(history.len(), 25);
    assert!(hub.system().is_empty().await);
}
