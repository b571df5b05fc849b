//! Point-in-time copies of per-device pipeline state.
//!
//! Alarm state is owned by the device worker that mutates it. After every
//! transition the worker publishes a copy here, so that readers (REST
//! snapshot endpoints, reconnecting sessions) never touch the worker's own
//! state. The board also remembers staleness watermarks of torn-down
//! workers so a recreated worker picks up where the previous one stopped.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AlarmState, DatastreamKey, DeviceId, Liveness, RuleId, UserId};

/// Liveness of one device as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceLivenessView {
    /// Device identifier.
    #[schema(value_type = i64)]
    pub device_id: DeviceId,
    /// Current liveness.
    pub status: Liveness,
    /// Last time traffic was seen.
    pub last_seen: DateTime<Utc>,
}

/// Full alarm state visible to one user (or for one device).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlarmSnapshot {
    /// When the copy was taken.
    pub timestamp: DateTime<Utc>,
    /// State of every known rule, ordered by device then rule.
    pub alarms: Vec<AlarmState>,
    /// Liveness of every device in the snapshot.
    pub devices: Vec<DeviceLivenessView>,
}

impl AlarmSnapshot {
    /// Iterates over the rules currently `active`.
    pub fn active(&self) -> impl Iterator<Item = &AlarmState> {
        self.alarms
            .iter()
            .filter(|s| s.status == super::AlarmStatus::Active)
    }
}

/// State a recreated device worker resumes from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceMemory {
    /// Last published alarm state per rule.
    pub alarms: BTreeMap<RuleId, AlarmState>,
    /// Last accepted timestamp per datastream.
    pub watermarks: HashMap<DatastreamKey, DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct DeviceRecord {
    audience: Vec<UserId>,
    liveness: Liveness,
    last_seen: DateTime<Utc>,
    alarms: BTreeMap<RuleId, AlarmState>,
    watermarks: HashMap<DatastreamKey, DateTime<Utc>>,
}

/// Shared board of per-device copies.
#[derive(Debug, Default)]
pub struct StateBoard {
    devices: RwLock<HashMap<DeviceId, DeviceRecord>>,
}

impl StateBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns what a previous worker left behind for `device_id`.
    #[must_use]
    pub fn restore(&self, device_id: DeviceId) -> Option<DeviceMemory> {
        self.devices.read().get(&device_id).map(|rec| DeviceMemory {
            alarms: rec.alarms.clone(),
            watermarks: rec.watermarks.clone(),
        })
    }

    /// Records that `device_id` is live, together with the users entitled to
    /// see it. Creates the entry on first sight.
    pub fn mark_online(&self, device_id: DeviceId, audience: Vec<UserId>, seen: DateTime<Utc>) {
        let mut map = self.devices.write();
        let rec = map.entry(device_id).or_insert_with(|| DeviceRecord {
            audience: Vec::new(),
            liveness: Liveness::Online,
            last_seen: seen,
            alarms: BTreeMap::new(),
            watermarks: HashMap::new(),
        });
        rec.audience = audience;
        rec.liveness = Liveness::Online;
        rec.last_seen = seen;
    }

    /// Records that `device_id` went quiet, saving its staleness
    /// watermarks for the next worker.
    pub fn mark_offline(
        &self,
        device_id: DeviceId,
        last_seen: DateTime<Utc>,
        watermarks: HashMap<DatastreamKey, DateTime<Utc>>,
    ) {
        if let Some(rec) = self.devices.write().get_mut(&device_id) {
            rec.liveness = Liveness::Offline;
            rec.last_seen = last_seen;
            rec.watermarks = watermarks;
        }
    }

    /// Replaces the audience of a device (after a configuration reload).
    pub fn set_audience(&self, device_id: DeviceId, audience: Vec<UserId>) {
        if let Some(rec) = self.devices.write().get_mut(&device_id) {
            rec.audience = audience;
        }
    }

    /// Publishes a copy of one rule's state.
    pub fn publish_alarm(&self, state: AlarmState) {
        if let Some(rec) = self.devices.write().get_mut(&state.device_id) {
            rec.alarms.insert(state.rule_id.clone(), state);
        }
    }

    /// Drops published state of rules no longer configured for the device.
    pub fn retain_rules(&self, device_id: DeviceId, keep: impl Fn(&RuleId) -> bool) {
        if let Some(rec) = self.devices.write().get_mut(&device_id) {
            rec.alarms.retain(|id, _| keep(id));
        }
    }

    /// Point-in-time copy of one device's alarm state.
    #[must_use]
    pub fn device_snapshot(&self, device_id: DeviceId) -> Option<AlarmSnapshot> {
        let map = self.devices.read();
        let rec = map.get(&device_id)?;
        Some(AlarmSnapshot {
            timestamp: Utc::now(),
            alarms: rec.alarms.values().cloned().collect(),
            devices: vec![DeviceLivenessView {
                device_id,
                status: rec.liveness,
                last_seen: rec.last_seen,
            }],
        })
    }

    /// Point-in-time copy of the alarm state of every device `user` may see.
    #[must_use]
    pub fn user_snapshot(&self, user: UserId) -> AlarmSnapshot {
        let map = self.devices.read();
        let mut visible: Vec<(&DeviceId, &DeviceRecord)> = map
            .iter()
            .filter(|(_, rec)| rec.audience.contains(&user))
            .collect();
        visible.sort_by_key(|(id, _)| **id);

        let mut alarms = Vec::new();
        let mut devices = Vec::with_capacity(visible.len());
        for (id, rec) in visible {
            alarms.extend(rec.alarms.values().cloned());
            devices.push(DeviceLivenessView {
                device_id: *id,
                status: rec.liveness,
                last_seen: rec.last_seen,
            });
        }
        AlarmSnapshot {
            timestamp: Utc::now(),
            alarms,
            devices,
        }
    }
}
