//! In-process store backed by a [`Catalog`].
//!
//! Used when PostgreSQL persistence is disabled, and by tests. Appended
//! readings and alarm events are kept in memory; the time-series side can
//! be switched into a failing mode to exercise the writer's retry path.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::{Catalog, ConfigStore, NotificationStore, StoreError, TimeSeriesStore};
use crate::domain::{AlarmRule, AlarmTransition, Datastream, Device, DeviceId, Reading, UserId};

/// In-memory implementation of every collaborator store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: RwLock<Catalog>,
    readings: RwLock<Vec<Reading>>,
    alarm_events: RwLock<Vec<AlarmTransition>>,
    fail_appends: AtomicBool,
}

impl MemoryStore {
    /// Creates a store serving the given catalog.
    #[must_use]
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            ..Self::default()
        }
    }

    /// Replaces the served configuration.
    pub fn replace_catalog(&self, catalog: Catalog) {
        *self.catalog.write() = catalog;
    }

    /// Applies an in-place edit to the served configuration.
    pub fn edit_catalog(&self, edit: impl FnOnce(&mut Catalog)) {
        edit(&mut self.catalog.write());
    }

    /// Makes subsequent `append` calls fail (or succeed again).
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::Relaxed);
    }

    /// Returns a copy of all appended readings, in append order.
    #[must_use]
    pub fn readings(&self) -> Vec<Reading> {
        self.readings.read().clone()
    }

    /// Returns a copy of all recorded alarm events, in record order.
    #[must_use]
    pub fn alarm_events(&self) -> Vec<AlarmTransition> {
        self.alarm_events.read().clone()
    }
}

impl ConfigStore for MemoryStore {
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        Ok(self
            .catalog
            .read()
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn get_datastreams(&self, device_id: DeviceId) -> Result<Vec<Datastream>, StoreError> {
        Ok(self
            .catalog
            .read()
            .datastreams
            .iter()
            .filter(|d| d.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn get_alarm_rules(&self, device_id: DeviceId) -> Result<Vec<AlarmRule>, StoreError> {
        Ok(self
            .catalog
            .read()
            .rules
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn entitled_users(&self, device: &Device) -> Result<Vec<UserId>, StoreError> {
        let catalog = self.catalog.read();
        let mut users = vec![device.owner];
        if let Some(org_id) = device.organization_id
            && let Some(org) = catalog.organizations.iter().find(|o| o.id == org_id)
        {
            users.extend(org.members.iter().copied());
        }
        users.sort_unstable();
        users.dedup();
        Ok(users)
    }
}

impl TimeSeriesStore for MemoryStore {
    async fn append(&self, reading: &Reading) -> Result<(), StoreError> {
        if self.fail_appends.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable(
                "time-series store offline".to_string(),
            ));
        }
        self.readings.write().push(reading.clone());
        Ok(())
    }
}

impl NotificationStore for MemoryStore {
    async fn record_alarm_event(&self, event: &AlarmTransition) -> Result<(), StoreError> {
        self.alarm_events.write().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::catalog::Organization;
    use chrono::Utc;

    fn device(id: i64, owner: i64, org: Option<i64>) -> Device {
        Device {
            id: DeviceId::new(id),
            owner: UserId::new(owner),
            organization_id: org,
            name: String::new(),
            status: crate::domain::Liveness::Offline,
            last_seen: None,
        }
    }

    #[tokio::test]
    async fn entitled_users_include_organization_members() {
        let store = MemoryStore::new(Catalog {
            devices: vec![device(1, 10, Some(3))],
            organizations: vec![Organization {
                id: 3,
                members: vec![UserId::new(12), UserId::new(10), UserId::new(11)],
            }],
            ..Catalog::default()
        });
        let Ok(Some(dev)) = store.get_device(DeviceId::new(1)).await else {
            panic!("device should exist");
        };
        let Ok(users) = store.entitled_users(&dev).await else {
            panic!("lookup failed");
        };
        assert_eq!(
            users,
            vec![UserId::new(10), UserId::new(11), UserId::new(12)]
        );
    }

    #[tokio::test]
    async fn unknown_device_is_none() {
        let store = MemoryStore::default();
        let result = store.get_device(DeviceId::new(99)).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn failing_append_is_unavailable() {
        let store = MemoryStore::default();
        store.set_fail_appends(true);
        let reading = Reading {
            device_id: DeviceId::new(1),
            datastream: "ph".into(),
            value: 7.0,
            timestamp: Utc::now(),
            sequence: 1,
        };
        assert!(store.append(&reading).await.is_err());
        store.set_fail_appends(false);
        assert!(store.append(&reading).await.is_ok());
        assert_eq!(store.readings().len(), 1);
    }
}
