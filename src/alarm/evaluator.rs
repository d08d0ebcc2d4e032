//! AlarmEvaluator - stateful evaluation of alarm rules
//!
//! For every telemetry batch of a device, each rule of its profile is
//! evaluated on its own:
//!
//! ```text
//! create conditions, CRITICAL first ──match──→ create / change severity
//!         │ no match
//!         ▼
//! open alarm of this type? ──yes──→ clear condition ──match──→ clear
//! ```
//!
//! ## Temporal state
//!
//! DURATION and REPEATING conditions keep progress in an
//! [`AlarmEvaluationContext`] keyed by `(device_id, rule_id)`. Each condition
//! of a rule has its own slot inside the context, so a MAJOR duration run
//! and a CRITICAL repeat counter never reset each other.
//!
//! A device's messages are processed by exactly one actor at a time, so a
//! given key is never touched concurrently; the mutex only guards the map.
//!
//! ## Missing keys
//!
//! A filter whose key is absent from the snapshot fails its whole condition.
//! The filter rule node does the opposite and lets such messages through.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, instrument, trace};

use super::service::{AlarmService, AlarmUpdate};
use super::{
    Alarm, AlarmCondition, AlarmConditionFilter, AlarmRule, AlarmSeverity, ConditionKind, EvaluationError,
    FilterOperator, FilterValue,
};
use crate::device::DeviceProfile;
use crate::error::{EngineError, EngineResult};
use crate::telemetry::{TelemetryEntry, TelemetryValue};
use crate::util::Clock;

/// Tolerance for equality on doubles
pub const DOUBLE_EPSILON: f64 = 1e-4;

/// Latest entry per key
pub type TelemetrySnapshot = HashMap<String, TelemetryEntry>;

/// Build a snapshot from entries; later entries win
pub fn snapshot_of(entries: &[TelemetryEntry]) -> TelemetrySnapshot {
    entries
        .iter()
        .map(|entry| (entry.key().to_string(), entry.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub device_id: String,
    pub rule_id: String,
}

impl ContextKey {
    pub fn new(device_id: impl Into<String>, rule_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            rule_id: rule_id.into(),
        }
    }
}

/// Which condition of a rule a piece of progress belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionSlot {
    Create(AlarmSeverity),
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConditionProgress {
    pub first_match_ts: Option<i64>,
    pub match_count: u32,
}

/// Temporal state of one rule for one device
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmEvaluationContext {
    pub rule_id: String,
    pub alarm_type: String,
    progress: HashMap<ConditionSlot, ConditionProgress>,
}

impl AlarmEvaluationContext {
    fn new(rule_id: &str, alarm_type: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            alarm_type: alarm_type.to_string(),
            progress: HashMap::new(),
        }
    }

    pub fn progress(&self, slot: ConditionSlot) -> ConditionProgress {
        self.progress.get(&slot).copied().unwrap_or_default()
    }
}

/// Process-wide map of evaluation contexts
#[derive(Debug, Default)]
pub struct EvaluationContexts {
    contexts: Mutex<HashMap<ContextKey, AlarmEvaluationContext>>,
}

impl EvaluationContexts {
    pub async fn get(&self, device_id: &str, rule_id: &str) -> Option<AlarmEvaluationContext> {
        self.contexts
            .lock()
            .await
            .get(&ContextKey::new(device_id, rule_id))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.contexts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.lock().await.is_empty()
    }

    /// Drop every context of a device
    pub async fn clear_device(&self, device_id: &str) -> usize {
        let mut contexts = self.contexts.lock().await;
        let before = contexts.len();
        contexts.retain(|key, _| key.device_id != device_id);
        before - contexts.len()
    }

    /// Drop the contexts of a device's rules that raise `alarm_type`
    pub async fn clear_alarm_type(&self, device_id: &str, alarm_type: &str) -> usize {
        let mut contexts = self.contexts.lock().await;
        let before = contexts.len();
        contexts.retain(|key, context| key.device_id != device_id || context.alarm_type != alarm_type);
        let removed = before - contexts.len();
        if removed > 0 {
            debug!("cleared {removed} evaluation contexts of {device_id} for '{alarm_type}'");
        }
        removed
    }

    /// Run `step` on the progress of one slot, creating the context lazily.
    ///
    /// When `create` is false and no context exists, `step` sees empty
    /// progress and nothing is stored.
    async fn update<F>(&self, key: &ContextKey, alarm_type: &str, slot: ConditionSlot, create: bool, step: F) -> bool
    where
        F: FnOnce(&mut ConditionProgress) -> bool,
    {
        let mut contexts = self.contexts.lock().await;

        if !create && !contexts.contains_key(key) {
            return step(&mut ConditionProgress::default());
        }

        let context = contexts
            .entry(key.clone())
            .or_insert_with(|| AlarmEvaluationContext::new(&key.rule_id, alarm_type));
        let progress = context.progress.entry(slot).or_default();
        step(progress)
    }
}

/// Result of evaluating one rule
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// Nothing changed
    NoMatch,
    /// A create condition matched
    Raised(AlarmUpdate),
    Cleared(Alarm),
}

/// Results of one evaluation pass over a profile
#[derive(Debug, Default)]
pub struct EvaluationReport {
    pub outcomes: Vec<(String, RuleOutcome)>,
    pub errors: Vec<(String, EngineError)>,
}

impl EvaluationReport {
    pub fn raised(&self) -> impl Iterator<Item = &AlarmUpdate> {
        self.outcomes.iter().filter_map(|(_, outcome)| match outcome {
            RuleOutcome::Raised(update) => Some(update),
            _ => None,
        })
    }

    pub fn cleared(&self) -> impl Iterator<Item = &Alarm> {
        self.outcomes.iter().filter_map(|(_, outcome)| match outcome {
            RuleOutcome::Cleared(alarm) => Some(alarm),
            _ => None,
        })
    }
}

pub struct AlarmEvaluator {
    service: Arc<AlarmService>,
    contexts: Arc<EvaluationContexts>,
    clock: Arc<dyn Clock>,
}

impl AlarmEvaluator {
    pub fn new(service: Arc<AlarmService>) -> Self {
        let contexts = service.contexts();
        let clock = service.clock();
        Self {
            service,
            contexts,
            clock,
        }
    }

    pub fn service(&self) -> &Arc<AlarmService> {
        &self.service
    }

    pub fn contexts(&self) -> &Arc<EvaluationContexts> {
        &self.contexts
    }

    /// Evaluate every rule of `profile` against a snapshot.
    ///
    /// A failing rule is logged and recorded in the report; the remaining
    /// rules are still evaluated.
    #[instrument(skip(self, profile, snapshot), fields(profile = %profile.id))]
    pub async fn evaluate(
        &self,
        device_id: &str,
        device_name: &str,
        profile: &DeviceProfile,
        snapshot: &TelemetrySnapshot,
    ) -> EvaluationReport {
        let mut report = EvaluationReport::default();

        if profile.alarm_rules.is_empty() {
            trace!("device {device_name} has no alarm rules");
            return report;
        }

        for rule in &profile.alarm_rules {
            match self.evaluate_rule(device_id, device_name, rule, snapshot).await {
                Ok(outcome) => report.outcomes.push((rule.id.clone(), outcome)),
                Err(e) => {
                    error!("failed to evaluate alarm rule '{}' ({}): {e}", rule.id, rule.alarm_type);
                    report.errors.push((rule.id.clone(), e));
                }
            }
        }

        report
    }

    async fn evaluate_rule(
        &self,
        device_id: &str,
        device_name: &str,
        rule: &AlarmRule,
        snapshot: &TelemetrySnapshot,
    ) -> EngineResult<RuleOutcome> {
        let key = ContextKey::new(device_id, &rule.id);

        let mut matched = None;
        for (severity, condition) in &rule.create_conditions {
            let slot = ConditionSlot::Create(*severity);
            if self.condition_matches(&key, rule, slot, condition, snapshot).await? {
                matched = Some(*severity);
                break;
            }
        }

        if let Some(severity) = matched {
            debug!("rule '{}' matched at {severity}", rule.id);
            let update = self
                .service
                .create_or_update(device_id, device_name, &rule.alarm_type, severity)
                .await?;
            return Ok(RuleOutcome::Raised(update));
        }

        let Some(clear_condition) = &rule.clear_condition else {
            return Ok(RuleOutcome::NoMatch);
        };

        let Some(open) = self.service.find_latest_open(device_id, &rule.alarm_type).await? else {
            return Ok(RuleOutcome::NoMatch);
        };

        if self
            .condition_matches(&key, rule, ConditionSlot::Clear, clear_condition, snapshot)
            .await?
        {
            let cleared = self.service.clear(&open.id).await?;
            return Ok(RuleOutcome::Cleared(cleared));
        }

        Ok(RuleOutcome::NoMatch)
    }

    async fn condition_matches(
        &self,
        key: &ContextKey,
        rule: &AlarmRule,
        slot: ConditionSlot,
        condition: &AlarmCondition,
        snapshot: &TelemetrySnapshot,
    ) -> Result<bool, EvaluationError> {
        match condition.kind {
            ConditionKind::Simple => simple_matches(&condition.filters, snapshot),

            ConditionKind::Duration => {
                let seconds = condition
                    .spec
                    .duration_seconds
                    .ok_or_else(|| EvaluationError::MissingDuration {
                        rule_id: rule.id.clone(),
                    })?;
                let required = i64::try_from(seconds).unwrap_or(i64::MAX).saturating_mul(1000);
                let current = simple_matches(&condition.filters, snapshot)?;
                let now = self.clock.now_millis();

                let matched = self
                    .contexts
                    .update(key, &rule.alarm_type, slot, current, |progress| {
                        if !current {
                            if progress.first_match_ts.take().is_some() {
                                trace!("sustained run of '{}' broken", key.rule_id);
                            }
                            return false;
                        }
                        match progress.first_match_ts {
                            None => {
                                progress.first_match_ts = Some(now);
                                false
                            }
                            Some(first) if now - first >= required => {
                                *progress = ConditionProgress::default();
                                true
                            }
                            Some(_) => false,
                        }
                    })
                    .await;
                Ok(matched)
            }

            ConditionKind::Repeating => {
                let count = condition
                    .spec
                    .repeating_count
                    .ok_or_else(|| EvaluationError::MissingRepeatingCount {
                        rule_id: rule.id.clone(),
                    })?;
                let current = simple_matches(&condition.filters, snapshot)?;

                let matched = self
                    .contexts
                    .update(key, &rule.alarm_type, slot, current, |progress| {
                        if !current {
                            progress.match_count = 0;
                            return false;
                        }
                        progress.match_count += 1;
                        if progress.match_count >= count {
                            progress.match_count = 0;
                            true
                        } else {
                            trace!("'{}' repeat {}/{count}", key.rule_id, progress.match_count);
                            false
                        }
                    })
                    .await;
                Ok(matched)
            }
        }
    }
}

/// All filters pass against the snapshot.
///
/// An empty filter list never matches, and a missing key fails the
/// condition.
pub fn simple_matches(filters: &[AlarmConditionFilter], snapshot: &TelemetrySnapshot) -> Result<bool, EvaluationError> {
    if filters.is_empty() {
        return Ok(false);
    }

    for filter in filters {
        let Some(entry) = snapshot.get(&filter.key) else {
            trace!("key '{}' missing from snapshot", filter.key);
            return Ok(false);
        };
        if !filter_matches(entry.value(), filter)? {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Apply one filter to a value
pub fn filter_matches(value: &TelemetryValue, filter: &AlarmConditionFilter) -> Result<bool, EvaluationError> {
    let threshold = &filter.value;

    let matched = match filter.operator {
        FilterOperator::Eq => equals(value, threshold),
        FilterOperator::Neq => !equals(value, threshold),
        FilterOperator::Gt => greater_than(value, filter)?,
        FilterOperator::Gte => greater_than(value, filter)? || equals(value, threshold),
        FilterOperator::Lt => less_than(value, filter)?,
        FilterOperator::Lte => less_than(value, filter)? || equals(value, threshold),
        FilterOperator::Contains => on_string(value, |s| s.contains(&threshold.to_string())),
        FilterOperator::NotContains => !on_string(value, |s| s.contains(&threshold.to_string())),
        FilterOperator::StartsWith => on_string(value, |s| s.starts_with(&threshold.to_string())),
        FilterOperator::EndsWith => on_string(value, |s| s.ends_with(&threshold.to_string())),
        FilterOperator::Unknown => false,
    };

    Ok(matched)
}

fn equals(value: &TelemetryValue, threshold: &FilterValue) -> bool {
    match (value, threshold) {
        (TelemetryValue::Long(v), FilterValue::Long(t)) => v == t,
        (TelemetryValue::Long(v), FilterValue::Double(t)) => t.fract() == 0.0 && *v as f64 == *t,
        (TelemetryValue::Double(v), t) => t.as_f64().is_some_and(|t| (v - t).abs() < DOUBLE_EPSILON),
        (TelemetryValue::String(v), t) => *v == t.to_string(),
        (TelemetryValue::Bool(v), FilterValue::Bool(t)) => v == t,
        _ => false,
    }
}

fn numeric_threshold(filter: &AlarmConditionFilter) -> Result<f64, EvaluationError> {
    filter
        .value
        .as_f64()
        .ok_or_else(|| EvaluationError::NonNumericThreshold {
            key: filter.key.clone(),
            value: filter.value.to_string(),
        })
}

fn greater_than(value: &TelemetryValue, filter: &AlarmConditionFilter) -> Result<bool, EvaluationError> {
    let threshold = numeric_threshold(filter)?;
    Ok(value.as_f64().is_some_and(|v| v > threshold))
}

fn less_than(value: &TelemetryValue, filter: &AlarmConditionFilter) -> Result<bool, EvaluationError> {
    let threshold = numeric_threshold(filter)?;
    Ok(value.as_f64().is_some_and(|v| v < threshold))
}

fn on_string(value: &TelemetryValue, check: impl Fn(&str) -> bool) -> bool {
    value.as_str().is_some_and(check)
}
