//! Alarm rules, per-rule alarm state, and state transitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{DatastreamKey, DeviceId};

/// Identifier of an alarm rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Wraps a rule identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Comparison applied to a reading's value.
///
/// Serialized with an `op` tag, e.g. `{"op": ">", "threshold": 25.0}` or
/// `{"op": "outside", "low": 6.5, "high": 8.5}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Condition {
    /// `value > threshold`
    #[serde(rename = ">")]
    Above {
        /// Threshold value.
        threshold: f64,
    },
    /// `value < threshold`
    #[serde(rename = "<")]
    Below {
        /// Threshold value.
        threshold: f64,
    },
    /// `value >= threshold`
    #[serde(rename = ">=")]
    AtLeast {
        /// Threshold value.
        threshold: f64,
    },
    /// `value <= threshold`
    #[serde(rename = "<=")]
    AtMost {
        /// Threshold value.
        threshold: f64,
    },
    /// `value == threshold`
    #[serde(rename = "==")]
    Equal {
        /// Threshold value.
        threshold: f64,
    },
    /// `low <= value <= high`
    #[serde(rename = "within")]
    Within {
        /// Lower bound (inclusive).
        low: f64,
        /// Upper bound (inclusive).
        high: f64,
    },
    /// `value < low || value > high`
    #[serde(rename = "outside")]
    Outside {
        /// Lower bound (inclusive, in-band).
        low: f64,
        /// Upper bound (inclusive, in-band).
        high: f64,
    },
}

/// Threshold condition bound to one device + datastream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRule {
    /// Rule identifier.
    pub id: RuleId,
    /// Device the rule watches.
    pub device_id: DeviceId,
    /// Datastream the rule watches.
    pub datastream: DatastreamKey,
    /// Operator and threshold(s).
    pub condition: Condition,
    /// Hysteresis margin; `0` disables hysteresis.
    #[serde(default)]
    pub hysteresis: f64,
}

/// Alarm status of a single rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlarmStatus {
    /// Condition not met (or released past the hysteresis band).
    #[default]
    Inactive,
    /// Condition met.
    Active,
}

impl AlarmStatus {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
        }
    }
}

/// Current state of one alarm rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlarmState {
    /// Rule this state belongs to.
    #[schema(value_type = String)]
    pub rule_id: RuleId,
    /// Device the rule watches.
    #[schema(value_type = i64)]
    pub device_id: DeviceId,
    /// Datastream the rule watches.
    #[schema(value_type = String)]
    pub datastream: DatastreamKey,
    /// Current status.
    pub status: AlarmStatus,
    /// Value of the reading that caused the last status change.
    pub value: Option<f64>,
    /// Timestamp of the reading that caused the last status change.
    pub triggered_at: Option<DateTime<Utc>>,
    /// Wall-clock time of the last status change.
    pub changed_at: Option<DateTime<Utc>>,
}

impl AlarmState {
    /// Initial (inactive, never triggered) state for a rule.
    #[must_use]
    pub fn inactive(rule: &AlarmRule) -> Self {
        Self {
            rule_id: rule.id.clone(),
            device_id: rule.device_id,
            datastream: rule.datastream.clone(),
            status: AlarmStatus::Inactive,
            value: None,
            triggered_at: None,
            changed_at: None,
        }
    }
}

/// A status change of one alarm rule. Only transitions are ever emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmTransition {
    /// Rule that changed.
    pub rule_id: RuleId,
    /// Device the rule watches.
    pub device_id: DeviceId,
    /// Datastream the rule watches.
    pub datastream: DatastreamKey,
    /// Status before the change.
    pub from: AlarmStatus,
    /// Status after the change.
    pub to: AlarmStatus,
    /// Value of the reading that caused the change.
    pub value: f64,
    /// Timestamp of the reading that caused the change.
    pub timestamp: DateTime<Utc>,
}
