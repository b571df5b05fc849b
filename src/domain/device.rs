//! Device identity, ownership and liveness.
//!
//! Devices are provisioned by the Configuration Store. The pipeline only
//! reads them to resolve ownership (who may see the data) and tracks
//! liveness from the traffic it observes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Numeric identifier of a field device, as sent in the `device_id`
/// member of telemetry payloads.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct DeviceId(i64);

impl DeviceId {
    /// Wraps a raw device identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DeviceId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier of an authenticated platform user.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wraps a raw user identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Whether a device is currently reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Traffic was seen within the idle window.
    Online,
    /// No traffic for longer than the idle window.
    #[default]
    Offline,
}

impl Liveness {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Device record as held by the Configuration Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Device identifier.
    pub id: DeviceId,
    /// Owning user.
    pub owner: UserId,
    /// Owning organization, if the device is shared with one.
    #[serde(default)]
    pub organization_id: Option<i64>,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Liveness as last recorded by the store.
    #[serde(default)]
    pub status: Liveness,
    /// Last time the store saw the device.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}
