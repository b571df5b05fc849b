//! Frames pushed to dashboard sessions over the live-update channel.
//!
//! The set of frame kinds is closed: every outbound message is one of the
//! [`LiveEvent`] variants, serialized with a `type` discriminator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    AlarmSnapshot, AlarmStatus, AlarmTransition, DatastreamKey, DeviceId, Liveness, Reading,
    RuleId,
};

/// Outbound live-update frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    /// A newly accepted reading. Best-effort, newest-wins.
    SensorUpdate {
        /// Producing device.
        device_id: DeviceId,
        /// Canonical datastream key.
        datastream: DatastreamKey,
        /// Measured value.
        value: f64,
        /// Reading timestamp.
        timestamp: DateTime<Utc>,
    },
    /// An alarm rule changed status. Delivered at-least-once.
    StatusUpdate {
        /// Device the rule watches.
        device_id: DeviceId,
        /// Rule that changed.
        rule_id: RuleId,
        /// New status.
        status: AlarmStatus,
        /// Value that caused the change.
        value: f64,
        /// Timestamp of the reading that caused the change.
        timestamp: DateTime<Utc>,
    },
    /// A device went online or offline. Delivered at-least-once.
    DeviceStatus {
        /// Device whose liveness changed.
        device_id: DeviceId,
        /// New liveness.
        status: Liveness,
        /// Last time traffic was seen from the device.
        last_seen: DateTime<Utc>,
    },
    /// Full alarm state for the session's user, sent on connect and after
    /// the session's replay buffer overflowed.
    Snapshot(AlarmSnapshot),
}

impl LiveEvent {
    /// Builds a `sensor_update` frame for an accepted reading.
    #[must_use]
    pub fn sensor(reading: &Reading) -> Self {
        Self::SensorUpdate {
            device_id: reading.device_id,
            datastream: reading.datastream.clone(),
            value: reading.value,
            timestamp: reading.timestamp,
        }
    }

    /// Builds a `status_update` frame for an alarm transition.
    #[must_use]
    pub fn status(transition: &AlarmTransition) -> Self {
        Self::StatusUpdate {
            device_id: transition.device_id,
            rule_id: transition.rule_id.clone(),
            status: transition.to,
            value: transition.value,
            timestamp: transition.timestamp,
        }
    }

    /// Returns the device the frame concerns, if it concerns exactly one.
    #[must_use]
    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            Self::SensorUpdate { device_id, .. }
            | Self::StatusUpdate { device_id, .. }
            | Self::DeviceStatus { device_id, .. } => Some(*device_id),
            Self::Snapshot(_) => None,
        }
    }

    /// Returns the frame type as a static string slice.
    #[must_use]
    pub const fn type_str(&self) -> &'static str {
        match self {
            Self::SensorUpdate { .. } => "sensor_update",
            Self::StatusUpdate { .. } => "status_update",
            Self::DeviceStatus { .. } => "device_status",
            Self::Snapshot(_) => "snapshot",
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn sensor_update_wire_shape() {
        let reading = Reading {
            device_id: DeviceId::new(1),
            datastream: DatastreamKey::new("ph"),
            value: 6.8,
            timestamp: Utc::now(),
            sequence: 3,
        };
        let Ok(json) = serde_json::to_value(LiveEvent::sensor(&reading)) else {
            panic!("serialization failed");
        };
        assert_eq!(json["type"], "sensor_update");
        assert_eq!(json["device_id"], 1);
        assert_eq!(json["datastream"], "ph");
        assert_eq!(json["value"], 6.8);
        assert!(json.get("sequence").is_none());
    }

    #[test]
    fn status_update_wire_shape() {
        let transition = AlarmTransition {
            rule_id: RuleId::new("cod-high"),
            device_id: DeviceId::new(2),
            datastream: DatastreamKey::new("cod"),
            from: AlarmStatus::Inactive,
            to: AlarmStatus::Active,
            value: 130.0,
            timestamp: Utc::now(),
        };
        let event = LiveEvent::status(&transition);
        assert_eq!(event.type_str(), "status_update");
        let Ok(json) = serde_json::to_value(&event) else {
            panic!("serialization failed");
        };
        assert_eq!(json["rule_id"], "cod-high");
        assert_eq!(json["status"], "active");
        assert_eq!(event.device_id(), Some(DeviceId::new(2)));
    }

    #[test]
    fn snapshot_is_tagged_inline() {
        let event = LiveEvent::Snapshot(AlarmSnapshot {
            timestamp: Utc::now(),
            alarms: Vec::new(),
            devices: Vec::new(),
        });
        let Ok(json) = serde_json::to_value(&event) else {
            panic!("serialization failed");
        };
        assert_eq!(json["type"], "snapshot");
        assert!(json["alarms"].is_array());
    }
}
