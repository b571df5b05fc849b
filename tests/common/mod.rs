//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use telemetry_gateway::persistence::{Catalog, MemoryStore, StoreBackend};
use telemetry_gateway::service::{Pipeline, PipelineSettings};
use telemetry_gateway::ws::{Outgoing, Session};

/// 2026-01-01T00:00:00Z.
pub const T0: i64 = 1_767_225_600;

/// Device 1 is owned by user 10 and shared with organization 3 (user 11).
/// Device 2 belongs to user 20 alone. User 99 owns nothing.
pub const CATALOG: &str = r#"{
  "devices": [
    { "id": 1, "owner": 10, "organization_id": 3, "name": "outfall" },
    { "id": 2, "owner": 20, "name": "intake" }
  ],
  "organizations": [{ "id": 3, "members": [11] }],
  "datastreams": [
    { "device_id": 1, "key": "ph", "unit": "pH" },
    { "device_id": 1, "key": "cod", "unit": "mg/L" },
    { "device_id": 1, "key": "tss", "unit": "mg/L" },
    { "device_id": 1, "key": "nh3n", "unit": "mg/L" },
    { "device_id": 1, "key": "flow", "unit": "m3/h" },
    { "device_id": 2, "key": "ph", "unit": "pH" }
  ],
  "rules": [
    { "id": "flow-high", "device_id": 1, "datastream": "flow",
      "condition": { "op": ">", "threshold": 25 }, "hysteresis": 2 }
  ]
}"#;

/// Settings with short timers for tests.
pub fn settings() -> PipelineSettings {
    PipelineSettings {
        idle_timeout: Duration::from_secs(30),
        store_retry: Duration::from_millis(10),
        ..PipelineSettings::default()
    }
}

/// Starts a pipeline over the test catalog.
pub fn start(settings: PipelineSettings) -> (Pipeline<StoreBackend>, Arc<MemoryStore>) {
    let Ok(catalog) = Catalog::from_json(CATALOG) else {
        panic!("test catalog should parse");
    };
    let store = Arc::new(MemoryStore::new(catalog));
    let backend = Arc::new(StoreBackend::Memory(Arc::clone(&store)));
    (Pipeline::start(backend, settings), store)
}

/// Telemetry payload for device 1 at `T0 + offset` seconds.
pub fn payload(device: i64, offset: i64, fields: &str) -> Vec<u8> {
    format!(r#"{{"device_id":{device},"timestamp":{},{fields}}}"#, T0 + offset).into_bytes()
}

/// Polls `cond` until it holds or two seconds elapse.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Drains a session the way its socket task would, acking reliable frames.
pub fn drain(session: &Session) -> Vec<Outgoing> {
    let mut out = Vec::new();
    while let Some(next) = session.next_outgoing() {
        if let Outgoing::Reliable(event) = &next {
            session.ack(event);
        }
        out.push(next);
    }
    out
}
