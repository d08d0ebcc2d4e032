//! Integration tests for alarm lifecycles driven through the hub
//!
//! Acknowledge/clear orderings, time-based conditions on a manual clock,
//! repeat notifications and device deletion.

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use telemetry_hub::{
    EngineError, TelemetryHub,
    alarm::{
        AlarmCondition, AlarmConditionFilter, AlarmEventKind, AlarmRule, AlarmSeverity, AlarmStatus,
        evaluator::ConditionSlot,
    },
    config::NotificationConfig,
    util::Clock,
};

use crate::helpers::*;

fn sustained_rule() -> AlarmRule {
    AlarmRule::new("sustained", "Overheating").with_create(
        AlarmSeverity::Critical,
        AlarmCondition::duration(60, vec![AlarmConditionFilter::greater_than("temperature", 85i64)]),
    )
}

fn repeated_rule() -> AlarmRule {
    AlarmRule::new("spiky", "Spikes").with_create(
        AlarmSeverity::Minor,
        AlarmCondition::repeating(3, vec![AlarmConditionFilter::greater_than("temperature", 85i64)]),
    )
}

/// Send a reading and wait until the chain has handled it
async fn reading(hub: &TelemetryHub, sent: &mut u64, temperature: i64) {
    send(hub, "d1", &format!(r#"{{"temperature": {temperature}}}"#)).await;
    *sent += 1;
    wait_for_chain(hub, MAIN_CHAIN, *sent).await;
}

#[tokio::test]
async fn test_acknowledge_then_clear() {
    let TestHub { hub, .. } = start_hub(single_device_config(vec![high_temperature_rule()])).await;
    let mut events = hub.subscribe_alarms();
    let mut sent = 0;

    reading(&hub, &mut sent, 90).await;
    let alarm = hub.alarms().find_all_active().await.unwrap().remove(0);

    let acked = hub.alarms().acknowledge(&alarm.id).await.unwrap();
    assert_eq!(acked.status(), AlarmStatus::ActiveAck);
    assert!(acked.ack_ts.is_some());

    reading(&hub, &mut sent, 70).await;
    let stored = hub.alarms().find_by_id(&alarm.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), AlarmStatus::ClearedAck);

    let kinds: Vec<AlarmEventKind> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| event.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![AlarmEventKind::Created, AlarmEventKind::Acknowledged, AlarmEventKind::Cleared]
    );

    hub.shutdown().await;
}

#[tokio::test]
async fn test_clear_then_acknowledge_and_raise_again() {
    let TestHub { hub, .. } = start_hub(single_device_config(vec![high_temperature_rule()])).await;
    let mut sent = 0;

    reading(&hub, &mut sent, 90).await;
    let first = hub.alarms().find_all_active().await.unwrap().remove(0);

    hub.alarms().clear(&first.id).await.unwrap();
    let acked = hub.alarms().acknowledge(&first.id).await.unwrap();
    assert_eq!(acked.status(), AlarmStatus::ClearedAck);

    // acknowledging twice changes nothing
    let again = hub.alarms().acknowledge(&first.id).await.unwrap();
    assert_eq!(again.ack_ts, acked.ack_ts);

    reading(&hub, &mut sent, 92).await;
    let active = hub.alarms().find_all_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_ne!(active[0].id, first.id);
    assert_eq!(hub.alarms().find_by_originator("d1").await.unwrap().len(), 2);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_duration_condition_on_manual_clock() {
    let TestHub { hub, clock, .. } = start_hub(single_device_config(vec![sustained_rule()])).await;
    let mut sent = 0;

    reading(&hub, &mut sent, 90).await;
    let context = hub.evaluator().contexts().get("d1", "sustained").await.unwrap();
    assert_eq!(
        context.progress(ConditionSlot::Create(AlarmSeverity::Critical)).first_match_ts,
        Some(1_000_000)
    );

    clock.advance(30_000);
    reading(&hub, &mut sent, 90).await;
    assert!(hub.alarms().find_all_active().await.unwrap().is_empty());

    // a cool reading breaks the run
    reading(&hub, &mut sent, 70).await;
    clock.advance(40_000);
    reading(&hub, &mut sent, 90).await;
    assert!(hub.alarms().find_all_active().await.unwrap().is_empty());

    clock.advance(59_999);
    reading(&hub, &mut sent, 90).await;
    assert!(hub.alarms().find_all_active().await.unwrap().is_empty());

    clock.advance(1);
    reading(&hub, &mut sent, 90).await;
    let active = hub.alarms().find_all_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].alarm_type, "Overheating");
    assert_eq!(active[0].start_ts, clock.now_millis());

    hub.shutdown().await;
}

#[tokio::test]
async fn test_repeating_condition_counts_consecutive_matches() {
    let TestHub { hub, .. } = start_hub(single_device_config(vec![repeated_rule()])).await;
    let mut sent = 0;

    reading(&hub, &mut sent, 90).await;
    reading(&hub, &mut sent, 90).await;
    reading(&hub, &mut sent, 60).await;
    reading(&hub, &mut sent, 90).await;
    reading(&hub, &mut sent, 90).await;
    assert!(hub.alarms().find_all_active().await.unwrap().is_empty());

    reading(&hub, &mut sent, 90).await;
    let active = hub.alarms().find_all_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].severity, AlarmSeverity::Minor);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_repeat_notifications_for_unacknowledged_alarms() {
    let mut config = single_device_config(vec![high_temperature_rule()]);
    config.notifications = NotificationConfig {
        repeat_check_secs: 3600,
        enabled: true,
    };
    let TestHub { hub, clock, .. } = start_hub(config).await;
    let notifier = hub.repeat_notifier().unwrap();
    let mut sent = 0;

    reading(&hub, &mut sent, 90).await;
    assert_eq!(notifier.check_now().await.unwrap(), 0);

    // CRITICAL repeats every five minutes
    clock.advance(5 * 60 * 1000);
    let mut events = hub.subscribe_alarms();
    assert_eq!(notifier.check_now().await.unwrap(), 1);
    assert_eq!(notifier.check_now().await.unwrap(), 0);

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, AlarmEventKind::Repeated);
    assert_eq!(event.alarm.notification_count, 1);

    hub.alarms().acknowledge(&event.alarm.id).await.unwrap();
    clock.advance(60 * 60 * 1000);
    assert_eq!(notifier.check_now().await.unwrap(), 0);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_delete_device_removes_alarms_and_state() {
    let TestHub { hub, telemetry, .. } =
        start_hub(single_device_config(vec![high_temperature_rule(), sustained_rule()])).await;
    let mut sent = 0;

    reading(&hub, &mut sent, 90).await;
    assert_eq!(hub.alarms().find_by_originator("d1").await.unwrap().len(), 1);
    assert!(hub.evaluator().contexts().get("d1", "sustained").await.is_some());

    hub.delete_device("d1").await.unwrap();

    assert!(hub.alarms().find_by_originator("d1").await.unwrap().is_empty());
    assert!(hub.evaluator().contexts().is_empty().await);
    assert!(telemetry.latest("d1").await.unwrap().is_empty());
    assert!(!hub.system().contains("Device:d1").await);

    assert_matches!(
        hub.transport().ingest(&token("d1"), r#"{"temperature": 99}"#, 1).await,
        Err(EngineError::UnknownAccessToken)
    );
    assert_matches!(hub.delete_device("d1").await, Err(EngineError::DeviceNotFound(_)));

    hub.shutdown().await;
}
