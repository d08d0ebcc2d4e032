//! Alarm model, rules and lifecycle
//!
//! ## Lifecycle
//!
//! ```text
//!                 acknowledge
//!   ACTIVE_UNACK ─────────────→ ACTIVE_ACK
//!        │                          │
//!        │ clear                    │ clear
//!        ▼                          ▼
//!   CLEARED_UNACK ────────────→ CLEARED_ACK
//!                 acknowledge
//! ```
//!
//! Status is never stored. It is derived from `ack_ts` and `clear_ts`, so both
//! transitions are idempotent. Severity changes are not transitions; they only
//! touch `severity` while the alarm is open.

pub mod evaluator;
pub mod repeat;
pub mod service;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use evaluator::AlarmEvaluator;
pub use repeat::{RepeatNotifier, RepeatNotifierHandle};
pub use service::{AlarmEvent, AlarmEventKind, AlarmService, AlarmUpdate};

/// Alarm priority. Declaration order is severity order, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmSeverity {
    Critical,
    Major,
    Minor,
    Warning,
    Indeterminate,
}

impl AlarmSeverity {
    pub fn is_more_severe_than(self, other: AlarmSeverity) -> bool {
        self < other
    }

    /// How long an unacknowledged alarm waits between repeat notifications
    pub fn repeat_interval(self) -> Duration {
        let minutes = match self {
            AlarmSeverity::Critical => 5,
            AlarmSeverity::Major => 10,
            AlarmSeverity::Minor => 15,
            AlarmSeverity::Warning => 30,
            AlarmSeverity::Indeterminate => 15,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl fmt::Display for AlarmSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlarmSeverity::Critical => "CRITICAL",
            AlarmSeverity::Major => "MAJOR",
            AlarmSeverity::Minor => "MINOR",
            AlarmSeverity::Warning => "WARNING",
            AlarmSeverity::Indeterminate => "INDETERMINATE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmStatus {
    ActiveUnack,
    ActiveAck,
    ClearedUnack,
    ClearedAck,
}

impl AlarmStatus {
    pub fn from_flags(cleared: bool, acknowledged: bool) -> Self {
        match (cleared, acknowledged) {
            (false, false) => AlarmStatus::ActiveUnack,
            (false, true) => AlarmStatus::ActiveAck,
            (true, false) => AlarmStatus::ClearedUnack,
            (true, true) => AlarmStatus::ClearedAck,
        }
    }
}

impl fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlarmStatus::ActiveUnack => "ACTIVE_UNACK",
            AlarmStatus::ActiveAck => "ACTIVE_ACK",
            AlarmStatus::ClearedUnack => "CLEARED_UNACK",
            AlarmStatus::ClearedAck => "CLEARED_ACK",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlarmId(String);

impl AlarmId {
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AlarmId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub originator_id: String,
    pub originator_name: String,
    pub alarm_type: String,
    pub severity: AlarmSeverity,
    pub start_ts: i64,
    pub end_ts: i64,
    pub ack_ts: Option<i64>,
    pub clear_ts: Option<i64>,
    pub created_time: i64,
    pub notification_count: u32,
    pub last_notify_ts: Option<i64>,
}

impl Alarm {
    pub fn new(
        originator_id: impl Into<String>,
        originator_name: impl Into<String>,
        alarm_type: impl Into<String>,
        severity: AlarmSeverity,
        now: i64,
    ) -> Self {
        Self {
            id: AlarmId::random(),
            originator_id: originator_id.into(),
            originator_name: originator_name.into(),
            alarm_type: alarm_type.into(),
            severity,
            start_ts: now,
            end_ts: now,
            ack_ts: None,
            clear_ts: None,
            created_time: now,
            notification_count: 0,
            last_notify_ts: None,
        }
    }

    pub fn status(&self) -> AlarmStatus {
        AlarmStatus::from_flags(self.is_cleared(), self.is_acknowledged())
    }

    pub fn is_cleared(&self) -> bool {
        self.clear_ts.is_some()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.ack_ts.is_some()
    }

    /// Returns `false` if the alarm was already acknowledged.
    pub fn acknowledge(&mut self, now: i64) -> bool {
        if self.is_acknowledged() {
            return false;
        }
        self.ack_ts = Some(now);
        true
    }

    /// Returns `false` if the alarm was already cleared.
    pub fn clear(&mut self, now: i64) -> bool {
        if self.is_cleared() {
            return false;
        }
        self.clear_ts = Some(now);
        self.end_ts = now;
        true
    }

    /// Returns `false` for a cleared alarm or an unchanged severity.
    pub fn update_severity(&mut self, severity: AlarmSeverity, now: i64) -> bool {
        if self.is_cleared() || self.severity == severity {
            return false;
        }
        self.severity = severity;
        self.end_ts = now;
        true
    }

    /// Open, unacknowledged and quiet for at least the severity's interval
    pub fn needs_repeat_notification(&self, now: i64) -> bool {
        if self.is_cleared() || self.is_acknowledged() {
            return false;
        }
        let since = self.last_notify_ts.unwrap_or(self.start_ts);
        let interval = self.severity.repeat_interval().as_millis() as i64;
        now - since >= interval
    }

    pub fn record_notification(&mut self, now: i64) {
        self.notification_count += 1;
        self.last_notify_ts = Some(now);
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Alarm[id={}, type={}, severity={}, status={}, device={}]",
            self.id,
            self.alarm_type,
            self.severity,
            self.status(),
            self.originator_name
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionKind {
    #[default]
    Simple,
    Duration,
    Repeating,
}

/// Comparison applied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    #[serde(alias = "EQUAL")]
    Eq,
    #[serde(alias = "NOT_EQUAL")]
    Neq,
    #[serde(alias = "GREATER_THAN")]
    Gt,
    #[serde(alias = "GREATER_OR_EQUAL")]
    Gte,
    #[serde(alias = "LESS_THAN")]
    Lt,
    #[serde(alias = "LESS_OR_EQUAL")]
    Lte,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    /// Anything we don't know; never matches
    #[serde(other)]
    Unknown,
}

/// Threshold on the right-hand side of a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
}

impl FilterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Long(v) => Some(*v as f64),
            FilterValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Bool(v) => write!(f, "{v}"),
            FilterValue::Long(v) => write!(f, "{v}"),
            FilterValue::Double(v) => write!(f, "{v}"),
            FilterValue::String(v) => f.write_str(v),
        }
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Long(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Double(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmConditionFilter {
    pub key: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl AlarmConditionFilter {
    pub fn new(key: impl Into<String>, operator: FilterOperator, value: impl Into<FilterValue>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn greater_than(key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(key, FilterOperator::Gt, value)
    }

    pub fn less_than(key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(key, FilterOperator::Lt, value)
    }

    pub fn equal(key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(key, FilterOperator::Eq, value)
    }
}

impl fmt::Display for AlarmConditionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.key, self.operator, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConditionSpec {
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub repeating_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmCondition {
    #[serde(default)]
    pub kind: ConditionKind,
    #[serde(default)]
    pub filters: Vec<AlarmConditionFilter>,
    #[serde(default)]
    pub spec: ConditionSpec,
}

impl AlarmCondition {
    pub fn simple(filters: Vec<AlarmConditionFilter>) -> Self {
        Self {
            kind: ConditionKind::Simple,
            filters,
            spec: ConditionSpec::default(),
        }
    }

    pub fn duration(seconds: u64, filters: Vec<AlarmConditionFilter>) -> Self {
        Self {
            kind: ConditionKind::Duration,
            filters,
            spec: ConditionSpec {
                duration_seconds: Some(seconds),
                repeating_count: None,
            },
        }
    }

    pub fn repeating(count: u32, filters: Vec<AlarmConditionFilter>) -> Self {
        Self {
            kind: ConditionKind::Repeating,
            filters,
            spec: ConditionSpec {
                duration_seconds: None,
                repeating_count: Some(count),
            },
        }
    }
}

/// One alarm type with per-severity create conditions and an optional clear
/// condition.
///
/// `create_conditions` is keyed by severity, so there is at most one
/// condition per level and iteration runs from CRITICAL down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRule {
    pub id: String,
    pub alarm_type: String,
    #[serde(default)]
    pub create_conditions: BTreeMap<AlarmSeverity, AlarmCondition>,
    #[serde(default)]
    pub clear_condition: Option<AlarmCondition>,
}

impl AlarmRule {
    pub fn new(id: impl Into<String>, alarm_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alarm_type: alarm_type.into(),
            create_conditions: BTreeMap::new(),
            clear_condition: None,
        }
    }

    pub fn with_create(mut self, severity: AlarmSeverity, condition: AlarmCondition) -> Self {
        self.create_conditions.insert(severity, condition);
        self
    }

    pub fn with_clear(mut self, condition: AlarmCondition) -> Self {
        self.clear_condition = Some(condition);
        self
    }
}

/// A rule that could not be evaluated
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("rule '{rule_id}': DURATION condition without duration_seconds")]
    MissingDuration { rule_id: String },

    #[error("rule '{rule_id}': REPEATING condition without repeating_count")]
    MissingRepeatingCount { rule_id: String },

    #[error("filter on '{key}': threshold {value} is not numeric")]
    NonNumericThreshold { key: String, value: String },
}
