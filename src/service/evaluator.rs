//! Alarm rule evaluation with hysteresis.
//!
//! An [`AlarmEvaluator`] belongs to exactly one device worker and owns the
//! [`AlarmState`] of every rule bound to that device. It emits an
//! [`AlarmTransition`] only when a rule's status actually changes; a rule
//! that keeps re-triggering while already active stays silent.
//!
//! Release uses the threshold shifted by the rule's hysteresis margin, so
//! that a noisy value hovering at the threshold cannot make the rule flap:
//!
//! | Condition     | Activate when    | Release when (while active)      |
//! |---------------|------------------|----------------------------------|
//! | `> t`         | `v > t`          | `v <= t - m`                     |
//! | `>= t`        | `v >= t`         | `v < t - m`                      |
//! | `< t`         | `v < t`          | `v >= t + m`                     |
//! | `<= t`        | `v <= t`         | `v > t + m`                      |
//! | `== t`        | `|v - t| <= ε`   | `|v - t| > max(m, ε)`            |
//! | within lo..hi | `lo <= v <= hi`  | `v < lo - m` or `v > hi + m`     |
//! | outside lo..hi| `v < lo or v > hi` | `lo + m <= v <= hi - m`        |

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::domain::{
    AlarmRule, AlarmState, AlarmStatus, AlarmTransition, Condition, Datastream, DatastreamKey,
    DeviceId, Reading, RuleId,
};

/// Tolerance used by `==` rules.
const EQ_EPSILON: f64 = 1e-9;

/// Whether `value` meets the rule's condition.
#[must_use]
pub fn raw_trigger(condition: &Condition, value: f64) -> bool {
    match *condition {
        Condition::Above { threshold } => value > threshold,
        Condition::Below { threshold } => value < threshold,
        Condition::AtLeast { threshold } => value >= threshold,
        Condition::AtMost { threshold } => value <= threshold,
        Condition::Equal { threshold } => (value - threshold).abs() <= EQ_EPSILON,
        Condition::Within { low, high } => low <= value && value <= high,
        Condition::Outside { low, high } => value < low || value > high,
    }
}

/// Whether an active rule should return to inactive for `value`.
#[must_use]
pub fn released(condition: &Condition, margin: f64, value: f64) -> bool {
    match *condition {
        Condition::Above { threshold } => value <= threshold - margin,
        Condition::AtLeast { threshold } => value < threshold - margin,
        Condition::Below { threshold } => value >= threshold + margin,
        Condition::AtMost { threshold } => value > threshold + margin,
        Condition::Equal { threshold } => (value - threshold).abs() > margin.max(EQ_EPSILON),
        Condition::Within { low, high } => value < low - margin || value > high + margin,
        Condition::Outside { low, high } => low + margin <= value && value <= high - margin,
    }
}

/// Checks that a rule can be evaluated.
///
/// # Errors
///
/// Returns a description of the problem for non-finite thresholds, a
/// negative margin, an inverted range, or an `outside` rule whose margin
/// leaves no release band.
pub fn validate_rule(rule: &AlarmRule) -> Result<(), String> {
    let margin = rule.hysteresis;
    if !margin.is_finite() || margin < 0.0 {
        return Err(format!("invalid hysteresis margin {margin}"));
    }
    match rule.condition {
        Condition::Above { threshold }
        | Condition::Below { threshold }
        | Condition::AtLeast { threshold }
        | Condition::AtMost { threshold }
        | Condition::Equal { threshold } => {
            if !threshold.is_finite() {
                return Err(format!("invalid threshold {threshold}"));
            }
        }
        Condition::Within { low, high } | Condition::Outside { low, high } => {
            if !low.is_finite() || !high.is_finite() || low > high {
                return Err(format!("invalid range [{low}, {high}]"));
            }
            if matches!(rule.condition, Condition::Outside { .. }) && 2.0 * margin > high - low {
                return Err(format!(
                    "margin {margin} leaves no release band inside [{low}, {high}]"
                ));
            }
        }
    }
    Ok(())
}

/// Per-device alarm state machine.
#[derive(Debug)]
pub struct AlarmEvaluator {
    device_id: DeviceId,
    rules: HashMap<DatastreamKey, Vec<AlarmRule>>,
    states: BTreeMap<RuleId, AlarmState>,
}

impl AlarmEvaluator {
    /// Builds an evaluator for `device_id`, resuming from `previous` states
    /// where the rule still exists.
    #[must_use]
    pub fn new(
        device_id: DeviceId,
        rules: Vec<AlarmRule>,
        streams: &HashMap<DatastreamKey, Datastream>,
        previous: BTreeMap<RuleId, AlarmState>,
    ) -> Self {
        let mut evaluator = Self {
            device_id,
            rules: HashMap::new(),
            states: previous,
        };
        evaluator.reconfigure(rules, streams);
        evaluator
    }

    /// Replaces the rule set. State of rules that survive is kept; state of
    /// removed rules is dropped; new rules start inactive.
    pub fn reconfigure(&mut self, rules: Vec<AlarmRule>, streams: &HashMap<DatastreamKey, Datastream>) {
        let mut by_stream: HashMap<DatastreamKey, Vec<AlarmRule>> = HashMap::new();
        for rule in rules {
            if rule.device_id != self.device_id {
                continue;
            }
            if !streams.contains_key(&rule.datastream) {
                tracing::warn!(
                    device_id = %self.device_id,
                    rule_id = %rule.id,
                    datastream = %rule.datastream,
                    "skipping alarm rule bound to a missing datastream"
                );
                continue;
            }
            if let Err(reason) = validate_rule(&rule) {
                tracing::warn!(device_id = %self.device_id, rule_id = %rule.id, reason, "skipping invalid alarm rule");
                continue;
            }
            by_stream.entry(rule.datastream.clone()).or_default().push(rule);
        }

        let mut states = BTreeMap::new();
        for rule in by_stream.values().flatten() {
            let state = self
                .states
                .remove(&rule.id)
                .filter(|s| s.datastream == rule.datastream)
                .unwrap_or_else(|| AlarmState::inactive(rule));
            states.insert(rule.id.clone(), state);
        }
        self.rules = by_stream;
        self.states = states;
    }

    /// Applies one accepted reading to every rule bound to its datastream,
    /// returning the transitions it caused.
    pub fn evaluate(&mut self, reading: &Reading) -> Vec<AlarmTransition> {
        let Some(rules) = self.rules.get(&reading.datastream) else {
            return Vec::new();
        };
        let mut transitions = Vec::new();
        for rule in rules {
            let Some(state) = self.states.get_mut(&rule.id) else {
                continue;
            };
            let next = match state.status {
                AlarmStatus::Inactive if raw_trigger(&rule.condition, reading.value) => {
                    AlarmStatus::Active
                }
                AlarmStatus::Active if released(&rule.condition, rule.hysteresis, reading.value) => {
                    AlarmStatus::Inactive
                }
                unchanged => unchanged,
            };
            if next == state.status {
                continue;
            }

            let from = state.status;
            state.status = next;
            state.value = Some(reading.value);
            state.triggered_at = Some(reading.timestamp);
            state.changed_at = Some(Utc::now());
            transitions.push(AlarmTransition {
                rule_id: rule.id.clone(),
                device_id: self.device_id,
                datastream: rule.datastream.clone(),
                from,
                to: next,
                value: reading.value,
                timestamp: reading.timestamp,
            });
        }
        transitions
    }

    /// Returns the state of one rule.
    #[must_use]
    pub fn state(&self, rule_id: &RuleId) -> Option<&AlarmState> {
        self.states.get(rule_id)
    }

    /// Iterates over the states of all evaluated rules.
    pub fn states(&self) -> impl Iterator<Item = &AlarmState> {
        self.states.values()
    }

    /// Returns `true` if `rule_id` is currently evaluated.
    #[must_use]
    pub fn has_rule(&self, rule_id: &RuleId) -> bool {
        self.states.contains_key(rule_id)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn streams(keys: &[&str]) -> HashMap<DatastreamKey, Datastream> {
        keys.iter()
            .map(|k| {
                (
                    DatastreamKey::new(*k),
                    Datastream {
                        device_id: DeviceId::new(1),
                        key: DatastreamKey::new(*k),
                        value_type: crate::domain::ValueType::Float,
                        unit: None,
                        min: None,
                        max: None,
                    },
                )
            })
            .collect()
    }

    fn rule(id: &str, stream: &str, condition: Condition, hysteresis: f64) -> AlarmRule {
        AlarmRule {
            id: RuleId::new(id),
            device_id: DeviceId::new(1),
            datastream: DatastreamKey::new(stream),
            condition,
            hysteresis,
        }
    }

    fn readings(stream: &str, values: &[f64]) -> Vec<Reading> {
        let start = Utc
            .with_ymd_and_hms(2026, 3, 1, 0, 0, 0)
            .single()
            .unwrap_or_default();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Reading {
                device_id: DeviceId::new(1),
                datastream: DatastreamKey::new(stream),
                value: *v,
                timestamp: start + Duration::seconds(i64::try_from(i).unwrap_or(0)),
                sequence: u64::try_from(i).unwrap_or(0),
            })
            .collect()
    }

    fn run(evaluator: &mut AlarmEvaluator, stream: &str, values: &[f64]) -> Vec<AlarmTransition> {
        readings(stream, values)
            .iter()
            .flat_map(|r| evaluator.evaluate(r))
            .collect()
    }

    #[test]
    fn hysteresis_band_suppresses_flapping() {
        let rules = vec![rule("cod-high", "cod", Condition::Above { threshold: 25.0 }, 2.0)];
        let mut eval = AlarmEvaluator::new(DeviceId::new(1), rules, &streams(&["cod"]), BTreeMap::new());

        let events = run(&mut eval, "cod", &[20.0, 26.0, 24.0, 23.0, 10.0]);

        let summary: Vec<(AlarmStatus, f64)> = events.iter().map(|t| (t.to, t.value)).collect();
        assert_eq!(
            summary,
            vec![(AlarmStatus::Active, 26.0), (AlarmStatus::Inactive, 23.0)]
        );
    }

    #[test]
    fn retrigger_while_active_is_silent() {
        let rules = vec![rule("ph-high", "ph", Condition::Above { threshold: 9.0 }, 0.0)];
        let mut eval = AlarmEvaluator::new(DeviceId::new(1), rules, &streams(&["ph"]), BTreeMap::new());
        let events = run(&mut eval, "ph", &[9.5, 9.7, 10.0, 9.1]);
        assert_eq!(events.len(), 1);
        let Some(state) = eval.state(&RuleId::new("ph-high")) else {
            panic!("rule state missing");
        };
        assert_eq!(state.status, AlarmStatus::Active);
        assert_eq!(state.value, Some(9.5));
    }

    #[test]
    fn zero_margin_releases_on_raw_condition() {
        let rules = vec![rule("low-flow", "flow", Condition::Below { threshold: 5.0 }, 0.0)];
        let mut eval = AlarmEvaluator::new(DeviceId::new(1), rules, &streams(&["flow"]), BTreeMap::new());
        let events = run(&mut eval, "flow", &[4.0, 5.0]);
        let statuses: Vec<AlarmStatus> = events.iter().map(|t| t.to).collect();
        assert_eq!(statuses, vec![AlarmStatus::Active, AlarmStatus::Inactive]);
    }

    #[test]
    fn at_least_and_at_most_boundaries() {
        let ge = Condition::AtLeast { threshold: 10.0 };
        assert!(raw_trigger(&ge, 10.0));
        assert!(!released(&ge, 1.0, 9.0));
        assert!(released(&ge, 1.0, 8.9));

        let le = Condition::AtMost { threshold: 3.0 };
        assert!(raw_trigger(&le, 3.0));
        assert!(!released(&le, 0.5, 3.5));
        assert!(released(&le, 0.5, 3.6));
    }

    #[test]
    fn equality_uses_margin_for_release() {
        let eq = Condition::Equal { threshold: 0.0 };
        assert!(raw_trigger(&eq, 0.0));
        assert!(!raw_trigger(&eq, 0.1));
        assert!(released(&eq, 0.0, 0.1));
        assert!(!released(&eq, 0.5, 0.1));
    }

    #[test]
    fn within_range_with_margin() {
        let rules = vec![rule(
            "ph-band",
            "ph",
            Condition::Within { low: 6.0, high: 8.0 },
            0.5,
        )];
        let mut eval = AlarmEvaluator::new(DeviceId::new(1), rules, &streams(&["ph"]), BTreeMap::new());
        let events = run(&mut eval, "ph", &[5.0, 6.5, 8.4, 8.6]);
        let summary: Vec<(AlarmStatus, f64)> = events.iter().map(|t| (t.to, t.value)).collect();
        assert_eq!(
            summary,
            vec![(AlarmStatus::Active, 6.5), (AlarmStatus::Inactive, 8.6)]
        );
    }

    #[test]
    fn outside_range_with_margin() {
        let rules = vec![rule(
            "ph-out",
            "ph",
            Condition::Outside { low: 6.5, high: 8.5 },
            0.2,
        )];
        let mut eval = AlarmEvaluator::new(DeviceId::new(1), rules, &streams(&["ph"]), BTreeMap::new());
        let events = run(&mut eval, "ph", &[7.0, 8.6, 8.4, 8.0, 6.0]);
        let summary: Vec<(AlarmStatus, f64)> = events.iter().map(|t| (t.to, t.value)).collect();
        assert_eq!(
            summary,
            vec![
                (AlarmStatus::Active, 8.6),
                (AlarmStatus::Inactive, 8.0),
                (AlarmStatus::Active, 6.0)
            ]
        );
    }

    #[test]
    fn rule_on_missing_datastream_is_skipped() {
        let rules = vec![
            rule("gone", "tss", Condition::Above { threshold: 1.0 }, 0.0),
            rule("kept", "cod", Condition::Above { threshold: 1.0 }, 0.0),
        ];
        let eval = AlarmEvaluator::new(DeviceId::new(1), rules, &streams(&["cod"]), BTreeMap::new());
        assert!(!eval.has_rule(&RuleId::new("gone")));
        assert!(eval.has_rule(&RuleId::new("kept")));
    }

    #[test]
    fn invalid_rules_are_rejected() {
        assert!(validate_rule(&rule("a", "ph", Condition::Above { threshold: f64::NAN }, 0.0)).is_err());
        assert!(validate_rule(&rule("b", "ph", Condition::Above { threshold: 1.0 }, -1.0)).is_err());
        assert!(validate_rule(&rule("c", "ph", Condition::Within { low: 9.0, high: 1.0 }, 0.0)).is_err());
        assert!(validate_rule(&rule("d", "ph", Condition::Outside { low: 6.0, high: 8.0 }, 1.5)).is_err());
        assert!(validate_rule(&rule("e", "ph", Condition::Outside { low: 6.0, high: 8.0 }, 1.0)).is_ok());
    }

    #[test]
    fn reconfigure_keeps_surviving_state() {
        let cod = streams(&["cod"]);
        let high = rule("high", "cod", Condition::Above { threshold: 10.0 }, 0.0);
        let other = rule("other", "cod", Condition::Below { threshold: 1.0 }, 0.0);
        let mut eval = AlarmEvaluator::new(DeviceId::new(1), vec![high.clone(), other], &cod, BTreeMap::new());
        let _ = run(&mut eval, "cod", &[20.0]);

        eval.reconfigure(vec![high], &cod);
        assert!(!eval.has_rule(&RuleId::new("other")));
        let status = eval.state(&RuleId::new("high")).map(|s| s.status);
        assert_eq!(status, Some(AlarmStatus::Active));
    }

    #[test]
    fn resumes_from_previous_state() {
        let cod = streams(&["cod"]);
        let high = rule("high", "cod", Condition::Above { threshold: 10.0 }, 0.0);
        let mut previous = BTreeMap::new();
        let mut active = AlarmState::inactive(&high);
        active.status = AlarmStatus::Active;
        previous.insert(high.id.clone(), active);

        let mut eval = AlarmEvaluator::new(DeviceId::new(1), vec![high], &cod, previous);
        // Still above threshold: no duplicate activation.
        assert!(run(&mut eval, "cod", &[15.0]).is_empty());
        assert_eq!(run(&mut eval, "cod", &[5.0]).len(), 1);
    }
}
