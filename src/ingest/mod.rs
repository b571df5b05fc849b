//! Ingestion stage: transport decoding and field normalization.

pub mod listener;
pub mod normalizer;

pub use listener::{Ingestor, MqttSettings, decode_payload, spawn_mqtt_listener};
pub use normalizer::{AliasTable, Normalized, Normalizer};
