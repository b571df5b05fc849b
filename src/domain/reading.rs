//! Raw transport records and accepted readings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DatastreamKey, DeviceId};

/// A decoded transport message, before any business validation.
///
/// Field values are kept as raw JSON so that coercion failures can be
/// reported per field by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Device that produced the message.
    pub device_id: DeviceId,
    /// Producer field name → raw value.
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Timestamp reported by the device, if any.
    pub reported_at: Option<DateTime<Utc>>,
    /// When the gateway received the message.
    pub received_at: DateTime<Utc>,
    /// Monotonic ingestion sequence number.
    pub sequence: u64,
}

impl RawRecord {
    /// Timestamp readings from this record should carry: the device time
    /// when present, otherwise the ingestion time.
    #[must_use]
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.reported_at.unwrap_or(self.received_at)
    }
}

/// An accepted, immutable measurement of one datastream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Producing device.
    pub device_id: DeviceId,
    /// Canonical datastream key.
    pub datastream: DatastreamKey,
    /// Measured value.
    pub value: f64,
    /// Device-reported (or ingestion) time.
    pub timestamp: DateTime<Utc>,
    /// Ingestion sequence number of the message that carried it.
    pub sequence: u64,
}
