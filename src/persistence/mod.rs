//! Persistence layer: collaborator interfaces consumed by the pipeline.
//!
//! The pipeline reads device, datastream and rule configuration from a
//! [`ConfigStore`], appends accepted readings to a [`TimeSeriesStore`] and
//! records alarm transitions through a [`NotificationStore`]. Two
//! implementations are provided: [`postgres::PostgresStore`] backed by
//! `sqlx::PgPool`, and [`memory::MemoryStore`] loaded from a JSON catalog.

pub mod backend;
pub mod catalog;
pub mod memory;
pub mod postgres;
pub mod writer;

use std::future::Future;

use crate::domain::{AlarmRule, AlarmTransition, Datastream, Device, DeviceId, Reading, UserId};

pub use backend::StoreBackend;
pub use catalog::Catalog;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use writer::ReadingWriter;

/// Failure of a collaborator store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store returned data that could not be interpreted.
    #[error("corrupt store data: {0}")]
    Corrupt(String),
}

/// Read access to device, datastream and alarm-rule configuration.
pub trait ConfigStore: Send + Sync + 'static {
    /// Looks up a device by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    fn get_device(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Device>, StoreError>> + Send;

    /// Returns the datastream definitions of a device.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    fn get_datastreams(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<Datastream>, StoreError>> + Send;

    /// Returns the alarm rules bound to a device.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    fn get_alarm_rules(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<AlarmRule>, StoreError>> + Send;

    /// Resolves the users entitled to see a device's data: its owner plus
    /// the members of its organization.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    fn entitled_users(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<Vec<UserId>, StoreError>> + Send;
}

/// Append-only sink for accepted readings.
pub trait TimeSeriesStore: Send + Sync + 'static {
    /// Appends one reading.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on transient failure; the caller
    /// retries.
    fn append(&self, reading: &Reading) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Sink for alarm notification records.
pub trait NotificationStore: Send + Sync + 'static {
    /// Persists one alarm transition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be written.
    fn record_alarm_event(
        &self,
        event: &AlarmTransition,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Everything the pipeline needs from its collaborators.
pub trait Backend: ConfigStore + TimeSeriesStore + NotificationStore {}

impl<T> Backend for T where T: ConfigStore + TimeSeriesStore + NotificationStore {}
