//! Telemetry transport listener.
//!
//! [`decode_payload`] turns an opaque transport payload into a
//! [`RawRecord`]; it does no business validation. [`Ingestor`] counts every
//! message, drops (and counts) the ones that fail to decode, stamps the rest
//! with an ingestion sequence number and hands them to the sequencer.
//! [`spawn_mqtt_listener`] feeds an `Ingestor` from an MQTT topic.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::task::JoinHandle;

use crate::domain::{DeviceId, RawRecord};
use crate::error::PipelineError;
use crate::persistence::Backend;
use crate::service::{PipelineStats, Sequencer};

/// Back-off after a transport error before polling again.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Decodes one telemetry payload.
///
/// The payload must be a JSON object with an integer `device_id`. An
/// optional `timestamp` member (RFC 3339 string or integer Unix seconds)
/// is taken as the device-reported time. Every other member is kept as a
/// raw field.
///
/// # Errors
///
/// Returns [`PipelineError::Decode`] if the payload is not a JSON object,
/// lacks an integer `device_id`, or carries an unreadable `timestamp`.
pub fn decode_payload(
    payload: &[u8],
    received_at: DateTime<Utc>,
    sequence: u64,
) -> Result<RawRecord, PipelineError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| PipelineError::Decode(e.to_string()))?;
    let serde_json::Value::Object(mut members) = value else {
        return Err(PipelineError::Decode(
            "payload is not a JSON object".to_string(),
        ));
    };

    let device_id = members
        .remove("device_id")
        .and_then(|v| v.as_i64())
        .map(DeviceId::new)
        .ok_or_else(|| PipelineError::Decode("missing integer device_id".to_string()))?;

    let reported_at = match members.remove("timestamp") {
        None | Some(serde_json::Value::Null) => None,
        Some(ts) => Some(parse_timestamp(&ts)?),
    };

    Ok(RawRecord {
        device_id,
        fields: members.into_iter().collect::<BTreeMap<_, _>>(),
        reported_at,
        received_at,
        sequence,
    })
}

fn parse_timestamp(value: &serde_json::Value) -> Result<DateTime<Utc>, PipelineError> {
    let parsed = match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    };
    parsed.ok_or_else(|| PipelineError::Decode(format!("unreadable timestamp: {value}")))
}

/// Entry point of the pipeline for raw transport payloads.
#[derive(Debug)]
pub struct Ingestor<B: Backend> {
    sequencer: Arc<Sequencer<B>>,
    stats: Arc<PipelineStats>,
    next_sequence: AtomicU64,
}

impl<B: Backend> Ingestor<B> {
    /// Creates an ingestor feeding `sequencer`.
    #[must_use]
    pub fn new(sequencer: Arc<Sequencer<B>>, stats: Arc<PipelineStats>) -> Self {
        Self {
            sequencer,
            stats,
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Decodes and submits one payload, returning its ingestion sequence
    /// number.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Decode`] if the payload is malformed; the
    /// failure has already been counted.
    pub fn handle_payload(&self, payload: &[u8]) -> Result<u64, PipelineError> {
        self.stats.record_received();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        match decode_payload(payload, Utc::now(), sequence) {
            Ok(record) => {
                self.sequencer.submit(record);
                Ok(sequence)
            }
            Err(e) => {
                self.stats.record_decode_failure();
                tracing::debug!(error = %e, "dropping undecodable telemetry payload");
                Err(e)
            }
        }
    }
}

/// MQTT connection settings for the listener.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// Telemetry topic.
    pub topic: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
}

/// Spawns the MQTT listener task.
///
/// The subscription is (re)issued on every `ConnAck`, so it survives broker
/// reconnects. Transport errors are logged and retried after a short delay;
/// they never end the task.
pub fn spawn_mqtt_listener<B: Backend>(
    ingestor: Arc<Ingestor<B>>,
    settings: MqttSettings,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut opts = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        opts.set_keep_alive(settings.keep_alive);
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        tracing::info!(host = %settings.host, port = settings.port, topic = %settings.topic, "starting MQTT listener");

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    tracing::info!(topic = %settings.topic, "connected to broker, subscribing");
                    if let Err(e) = client.subscribe(&settings.topic, QoS::AtLeastOnce).await {
                        tracing::error!(error = %e, "MQTT subscribe request failed");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == settings.topic => {
                    let _ = ingestor.handle_payload(p.payload.as_ref());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "MQTT transport error, reconnecting");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn decodes_example_payload() {
        let payload =
            br#"{"device_id":1,"ph":6.8,"cod":120,"tss":45,"nh3_n":0.5,"flow":100}"#;
        let now = Utc::now();
        let Ok(record) = decode_payload(payload, now, 4) else {
            panic!("payload should decode");
        };
        assert_eq!(record.device_id, DeviceId::new(1));
        assert_eq!(record.fields.len(), 5);
        assert!(record.fields.contains_key("nh3_n"));
        assert!(record.reported_at.is_none());
        assert_eq!(record.effective_timestamp(), now);
        assert_eq!(record.sequence, 4);
    }

    #[test]
    fn device_timestamp_is_extracted() {
        let payload = br#"{"device_id":2,"timestamp":"2026-03-01T10:00:00Z","ph":7}"#;
        let Ok(record) = decode_payload(payload, Utc::now(), 1) else {
            panic!("payload should decode");
        };
        assert!(!record.fields.contains_key("timestamp"));
        assert_eq!(
            record.reported_at,
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single()
        );
    }

    #[test]
    fn unix_seconds_timestamp() {
        let payload = br#"{"device_id":2,"timestamp":1767225600,"ph":7}"#;
        let Ok(record) = decode_payload(payload, Utc::now(), 1) else {
            panic!("payload should decode");
        };
        assert_eq!(record.reported_at.map(|t| t.timestamp()), Some(1_767_225_600));
    }

    #[test]
    fn rejects_malformed_payloads() {
        let now = Utc::now();
        let payloads: [&[u8]; 5] = [
            b"not json",
            br#"[1, 2, 3]"#,
            br#"{"ph": 7}"#,
            br#"{"device_id": "abc", "ph": 7}"#,
            br#"{"device_id": 1, "timestamp": "yesterday"}"#,
        ];
        for payload in payloads {
            assert!(
                matches!(decode_payload(payload, now, 1), Err(PipelineError::Decode(_))),
                "expected decode failure for {}",
                String::from_utf8_lossy(payload)
            );
        }
    }
}
