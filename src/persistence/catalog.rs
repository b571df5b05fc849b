//! JSON device catalog used by [`super::MemoryStore`].
//!
//! ```json
//! {
//!   "devices": [{ "id": 1, "owner": 10, "organization_id": 3 }],
//!   "organizations": [{ "id": 3, "members": [11, 12] }],
//!   "datastreams": [{ "device_id": 1, "key": "ph", "unit": "pH" }],
//!   "rules": [{ "id": "ph-high", "device_id": 1, "datastream": "ph",
//!               "condition": { "op": ">", "threshold": 9 }, "hysteresis": 0.2 }]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::domain::{AlarmRule, Datastream, Device, UserId};

/// Organization membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    /// Organization identifier.
    pub id: i64,
    /// Users belonging to the organization.
    #[serde(default)]
    pub members: Vec<UserId>,
}

/// Complete configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Provisioned devices.
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Organizations and their members.
    #[serde(default)]
    pub organizations: Vec<Organization>,
    /// Datastream definitions of all devices.
    #[serde(default)]
    pub datastreams: Vec<Datastream>,
    /// Alarm rules of all devices.
    #[serde(default)]
    pub rules: Vec<AlarmRule>,
}

impl Catalog {
    /// Reads a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the file cannot be read and
    /// [`StoreError::Corrupt`] if it is not a valid catalog.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Parses a catalog from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the text is not a valid catalog.
    pub fn from_json(text: &str) -> Result<Self, StoreError> {
        serde_json::from_str(text).map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_empty_catalog() {
        let Ok(catalog) = Catalog::from_json("{}") else {
            panic!("empty catalog should parse");
        };
        assert_eq!(catalog, Catalog::default());
    }

    #[test]
    fn garbage_is_corrupt() {
        let result = Catalog::from_json("[1, 2");
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let result = Catalog::load("/nonexistent/catalog.json").await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
