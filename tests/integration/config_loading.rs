//! Integration tests for starting a hub from a configuration file

use std::io::Write;

use pretty_assertions::assert_eq;
use telemetry_hub::{
    alarm::{AlarmSeverity, AlarmStatus},
    config::read_config_file,
};

use crate::helpers::*;

const HUB_CONFIG: &str = r#"{
    "actors": {"workers": 2, "mailbox_capacity": 16},
    "rule_chains": [
        {"id": "main", "name": "Root chain", "root": true, "nodes": [
            {"type": "log"},
            {"type": "save_telemetry", "retry_delay_ms": 10},
            {"type": "alarm"}
        ]}
    ],
    "profiles": [
        {
            "id": "boiler",
            "name": "Boiler",
            "default_rule_chain_id": "main",
            "alarm_rules": [
                {
                    "id": "pressure",
                    "alarm_type": "High Pressure",
                    "create_conditions": {
                        "MAJOR": {"filters": [{"key": "pressure", "operator": "GREATER_THAN", "value": 2.5}]},
                        "CRITICAL": {"filters": [{"key": "pressure", "operator": "GT", "value": 4}]}
                    },
                    "clear_condition": {
                        "filters": [{"key": "pressure", "operator": "LTE", "value": 2}]
                    }
                }
            ]
        }
    ],
    "devices": [
        {"id": "boiler-1", "name": "Boiler 1", "access_token": "secret-1", "profile_id": "boiler"}
    ],
    "notifications": {"enabled": false}
}"#;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_hub_runs_from_config_file() {
    let file = write_config(HUB_CONFIG);
    let config = read_config_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.actors.workers, 2);
    assert_eq!(config.rule_chains[0].name.as_deref(), Some("Root chain"));

    let TestHub { hub, .. } = start_hub(config).await;
    assert_eq!(hub.rule_engine().root_chain().await.as_deref(), Some("main"));
    assert!(hub.repeat_notifier().is_none());

    let transport = hub.transport();
    transport.ingest("secret-1", r#"{"pressure": 3.1}"#, 1).await.unwrap();
    wait_for_chain(&hub, "main", 1).await;

    let active = hub.alarms().find_all_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].severity, AlarmSeverity::Major);
    assert_eq!(active[0].originator_name, "Boiler 1");

    transport.ingest("secret-1", r#"{"pressure": 4.5}"#, 2).await.unwrap();
    transport.ingest("secret-1", r#"{"pressure": 1.5}"#, 3).await.unwrap();
    wait_for_chain(&hub, "main", 3).await;

    let alarms = hub.alarms().find_by_originator("boiler-1").await.unwrap();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].severity, AlarmSeverity::Critical);
    assert_eq!(alarms[0].status(), AlarmStatus::ClearedUnack);

    hub.shutdown().await;
}

#[test]
fn test_invalid_config_is_rejected() {
    let file = write_config(r#"{"rule_chains": [{"id": "main", "nodes": [{"type": "teleport"}]}]}"#);
    let err = read_config_file(file.path().to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("Invalid configuration file"));
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert!(read_config_file(path.to_str().unwrap()).is_err());
}
