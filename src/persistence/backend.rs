//! Runtime-selected store backend.
//!
//! The pipeline is generic over its collaborators; the binary and the
//! HTTP layer use [`StoreBackend`] so that the choice between PostgreSQL
//! and the in-memory catalog is made once at startup.

use std::sync::Arc;

use super::{ConfigStore, MemoryStore, NotificationStore, PostgresStore, StoreError, TimeSeriesStore};
use crate::domain::{AlarmRule, AlarmTransition, Datastream, Device, DeviceId, Reading, UserId};

/// Either of the shipped store implementations.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// In-memory catalog (persistence disabled, tests).
    Memory(Arc<MemoryStore>),
    /// PostgreSQL.
    Postgres(PostgresStore),
}

impl ConfigStore for StoreBackend {
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        match self {
            Self::Memory(s) => s.get_device(id).await,
            Self::Postgres(s) => s.get_device(id).await,
        }
    }

    async fn get_datastreams(&self, device_id: DeviceId) -> Result<Vec<Datastream>, StoreError> {
        match self {
            Self::Memory(s) => s.get_datastreams(device_id).await,
            Self::Postgres(s) => s.get_datastreams(device_id).await,
        }
    }

    async fn get_alarm_rules(&self, device_id: DeviceId) -> Result<Vec<AlarmRule>, StoreError> {
        match self {
            Self::Memory(s) => s.get_alarm_rules(device_id).await,
            Self::Postgres(s) => s.get_alarm_rules(device_id).await,
        }
    }

    async fn entitled_users(&self, device: &Device) -> Result<Vec<UserId>, StoreError> {
        match self {
            Self::Memory(s) => s.entitled_users(device).await,
            Self::Postgres(s) => s.entitled_users(device).await,
        }
    }
}

impl TimeSeriesStore for StoreBackend {
    async fn append(&self, reading: &Reading) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.append(reading).await,
            Self::Postgres(s) => s.append(reading).await,
        }
    }
}

impl NotificationStore for StoreBackend {
    async fn record_alarm_event(&self, event: &AlarmTransition) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.record_alarm_event(event).await,
            Self::Postgres(s) => s.record_alarm_event(event).await,
        }
    }
}
