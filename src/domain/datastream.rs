//! Datastreams: the named, typed telemetry channels of a device.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::DeviceId;

/// Canonical datastream key (`ph`, `cod`, `tss`, `nh3n`, `flow`, ...).
///
/// This is the single internal name of a channel regardless of how a
/// producer spells the field in its payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct DatastreamKey(String);

impl DatastreamKey {
    /// Creates a key from its canonical spelling.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatastreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatastreamKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Numeric representation expected for a datastream's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Any finite real number.
    #[default]
    Float,
    /// Integral values only (counters, discrete levels).
    Integer,
}

/// Datastream definition as held by the Configuration Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datastream {
    /// Device the datastream belongs to.
    pub device_id: DeviceId,
    /// Canonical key.
    pub key: DatastreamKey,
    /// Expected numeric type.
    #[serde(default)]
    pub value_type: ValueType,
    /// Engineering unit (e.g. `mg/L`).
    #[serde(default)]
    pub unit: Option<String>,
    /// Lowest physically plausible value.
    #[serde(default)]
    pub min: Option<f64>,
    /// Highest physically plausible value.
    #[serde(default)]
    pub max: Option<f64>,
}

impl Datastream {
    /// Returns the inclusive sanity range for values of this datastream.
    ///
    /// Explicit `min`/`max` bounds win; otherwise pH is limited to its
    /// 0–14 scale and every other water-quality measurement must be
    /// non-negative.
    #[must_use]
    pub fn sanity_range(&self) -> (f64, f64) {
        let (default_min, default_max) = match self.key.as_str() {
            "ph" => (0.0, 14.0),
            _ => (0.0, f64::MAX),
        };
        (
            self.min.unwrap_or(default_min),
            self.max.unwrap_or(default_max),
        )
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn stream(key: &str) -> Datastream {
        Datastream {
            device_id: DeviceId::new(1),
            key: DatastreamKey::new(key),
            value_type: ValueType::Float,
            unit: None,
            min: None,
            max: None,
        }
    }

    #[test]
    fn ph_has_fourteen_point_scale() {
        assert_eq!(stream("ph").sanity_range(), (0.0, 14.0));
    }

    #[test]
    fn other_streams_are_non_negative() {
        let (min, max) = stream("cod").sanity_range();
        assert_eq!(min, 0.0);
        assert_eq!(max, f64::MAX);
    }

    #[test]
    fn explicit_bounds_override_defaults() {
        let mut flow = stream("flow");
        flow.min = Some(-5.0);
        flow.max = Some(500.0);
        assert_eq!(flow.sanity_range(), (-5.0, 500.0));
    }
}
