//! The unit of work flowing through rule chains
//!
//! A [`Message`] is created once per ingestion event. Everything except its
//! metadata is fixed at construction; nodes may annotate metadata while the
//! message travels along a chain.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::telemetry::TelemetryEntry;

/// Metadata key carrying the device name
pub const META_DEVICE_NAME: &str = "deviceName";

/// Metadata key carrying the device type (profile name)
pub const META_DEVICE_TYPE: &str = "deviceType";

/// Metadata key carrying the sample timestamp
pub const META_TS: &str = "ts";

/// Metadata key carrying the save-node retry attempt
pub const META_RETRY_ATTEMPT: &str = "retryAttempt";

/// Unique message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    PostTelemetryRequest,
    PostAttributesRequest,
    ToServerRpcRequest,
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::PostTelemetryRequest => "POST_TELEMETRY_REQUEST",
            MessageType::PostAttributesRequest => "POST_ATTRIBUTES_REQUEST",
            MessageType::ToServerRpcRequest => "TO_SERVER_RPC_REQUEST",
            MessageType::EntityCreated => "ENTITY_CREATED",
            MessageType::EntityUpdated => "ENTITY_UPDATED",
            MessageType::EntityDeleted => "ENTITY_DELETED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    msg_type: MessageType,
    originator_id: String,
    rule_chain_id: Option<String>,
    queue_name: Option<String>,
    raw_payload: String,
    entries: Vec<TelemetryEntry>,
    metadata: BTreeMap<String, String>,
    ts: i64,
}

impl Message {
    pub fn new(
        msg_type: MessageType,
        originator_id: impl Into<String>,
        raw_payload: impl Into<String>,
        entries: Vec<TelemetryEntry>,
        ts: i64,
    ) -> Self {
        Self {
            id: MessageId::new(),
            msg_type,
            originator_id: originator_id.into(),
            rule_chain_id: None,
            queue_name: None,
            raw_payload: raw_payload.into(),
            entries,
            metadata: BTreeMap::new(),
            ts,
        }
    }

    /// Shorthand for a `POST_TELEMETRY_REQUEST`
    pub fn telemetry(
        originator_id: impl Into<String>,
        raw_payload: impl Into<String>,
        entries: Vec<TelemetryEntry>,
        ts: i64,
    ) -> Self {
        Self::new(
            MessageType::PostTelemetryRequest,
            originator_id,
            raw_payload,
            entries,
            ts,
        )
    }

    pub fn with_rule_chain(mut self, rule_chain_id: impl Into<String>) -> Self {
        self.rule_chain_id = Some(rule_chain_id.into());
        self
    }

    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn originator_id(&self) -> &str {
        &self.originator_id
    }

    pub fn rule_chain_id(&self) -> Option<&str> {
        self.rule_chain_id.as_deref()
    }

    pub fn queue_name(&self) -> Option<&str> {
        self.queue_name.as_deref()
    }

    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    pub fn entries(&self) -> &[TelemetryEntry] {
        &self.entries
    }

    /// Entry for `key`; the last one wins if a key repeats
    pub fn entry(&self, key: &str) -> Option<&TelemetryEntry> {
        self.entries.iter().rev().find(|e| e.key() == key)
    }

    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn put_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn remove_metadata(&mut self, key: &str) -> Option<String> {
        self.metadata.remove(key)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} from {} ({} entries)",
            self.msg_type,
            self.id,
            self.originator_id,
            self.entries.len()
        )
    }
}
