//! # telemetry-gateway
//!
//! Ingests telemetry from field devices, evaluates per-device alarm rules
//! with hysteresis, and fans live updates out to dashboard sessions over
//! WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! MQTT broker / POST /api/v1/telemetry
//!     │
//!     ├── Ingestor (ingest/)            decode, sequence number
//!     ├── Sequencer (service/)          one ordered queue per device
//!     │
//!     ├── DeviceWorker (service/)
//!     │     ├── Normalizer (ingest/)    aliases, types, ranges
//!     │     ├── staleness watermark
//!     │     └── AlarmEvaluator          hysteresis state machine
//!     │
//!     ├── ReadingWriter (persistence/)  bounded, retrying
//!     ├── StateBoard (domain/)          snapshots for reconnects
//!     │
//!     └── Broadcaster (ws/)
//!           └── Session outboxes ──► WebSocket clients
//! ```
//!
//! Ordering holds per device, never across devices. Alarm status changes
//! and device liveness changes are delivered at least once; sensor
//! updates are best-effort and collapse to the newest value per
//! datastream when a session falls behind.

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod persistence;
pub mod service;
pub mod ws;
