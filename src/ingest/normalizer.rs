//! Maps raw producer fields onto canonical, typed datastream readings.
//!
//! Producers do not agree on field spelling: NH3-N arrives both as `nh3n`
//! and as `nh3_n`. The [`AliasTable`] folds every known spelling onto one
//! canonical [`DatastreamKey`]. The `nh3_n` spelling is a producer defect
//! kept for compatibility only; it is logged when seen and no further
//! aliases of that kind are added.
//!
//! Validation is per field: a bad field is dropped and reported, the rest
//! of the message survives.

use std::collections::{HashMap, HashSet};

use crate::domain::{Datastream, DatastreamKey, RawRecord, Reading, ValueType};
use crate::error::PipelineError;

/// Spellings accepted for compatibility with misbehaving producers.
const LEGACY_ALIASES: &[(&str, &str)] = &[("nh3_n", "nh3n")];

/// Canonical keys of the water-quality datastreams.
const CANONICAL_KEYS: &[&str] = &["ph", "cod", "tss", "nh3n", "flow"];

/// Producer field name → canonical datastream key.
#[derive(Debug, Clone)]
pub struct AliasTable {
    map: HashMap<String, DatastreamKey>,
}

impl AliasTable {
    /// The standard table: every canonical key maps to itself, plus the
    /// legacy `nh3_n` spelling.
    #[must_use]
    pub fn standard() -> Self {
        let mut map = HashMap::new();
        for key in CANONICAL_KEYS {
            map.insert((*key).to_string(), DatastreamKey::new(*key));
        }
        for (alias, key) in LEGACY_ALIASES {
            map.insert((*alias).to_string(), DatastreamKey::new(*key));
        }
        Self { map }
    }

    /// Resolves a producer field name.
    #[must_use]
    pub fn resolve(&self, field: &str) -> Option<&DatastreamKey> {
        self.map.get(field)
    }

    fn is_legacy(field: &str) -> bool {
        LEGACY_ALIASES.iter().any(|(alias, _)| *alias == field)
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Result of normalizing one raw record.
#[derive(Debug, Default)]
pub struct Normalized {
    /// One candidate reading per field that survived validation.
    pub readings: Vec<Reading>,
    /// Fields dropped by alias/type/range validation.
    pub rejected: Vec<PipelineError>,
    /// Field names not present in the alias table.
    pub unknown: Vec<String>,
}

/// Stateless field normalizer.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    aliases: AliasTable,
}

impl Normalizer {
    /// Creates a normalizer over the given alias table.
    #[must_use]
    pub fn new(aliases: AliasTable) -> Self {
        Self { aliases }
    }

    /// Normalizes `raw` against the device's datastream definitions.
    #[must_use]
    pub fn normalize(
        &self,
        raw: &RawRecord,
        streams: &HashMap<DatastreamKey, Datastream>,
    ) -> Normalized {
        let mut out = Normalized::default();
        let mut claimed: HashSet<&DatastreamKey> = HashSet::new();
        let timestamp = raw.effective_timestamp();

        for (field, value) in &raw.fields {
            let Some(key) = self.aliases.resolve(field) else {
                tracing::warn!(device_id = %raw.device_id, field, "dropping unknown telemetry field");
                out.unknown.push(field.clone());
                continue;
            };
            if AliasTable::is_legacy(field) {
                tracing::debug!(device_id = %raw.device_id, field, canonical = %key, "legacy field alias in payload");
            }

            // The first spelling in field order claims the key, valid or not.
            if !claimed.insert(key) {
                out.rejected.push(PipelineError::validation(
                    field,
                    format!("duplicate value for datastream {key}"),
                ));
                continue;
            }

            let Some(stream) = streams.get(key) else {
                out.rejected.push(PipelineError::validation(
                    field,
                    format!("device has no datastream {key}"),
                ));
                continue;
            };

            match coerce(value, stream) {
                Ok(value) => out.readings.push(Reading {
                    device_id: raw.device_id,
                    datastream: key.clone(),
                    value,
                    timestamp,
                    sequence: raw.sequence,
                }),
                Err(reason) => out.rejected.push(PipelineError::validation(field, reason)),
            }
        }

        for err in &out.rejected {
            tracing::warn!(device_id = %raw.device_id, error = %err, "dropping telemetry field");
        }
        out
    }
}

/// Coerces a raw JSON value to the datastream's numeric type and checks it
/// against the datastream's sanity range.
fn coerce(value: &serde_json::Value, stream: &Datastream) -> Result<f64, String> {
    let number = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("not a number: {value}"))?;

    if !number.is_finite() {
        return Err(format!("not finite: {number}"));
    }
    if stream.value_type == ValueType::Integer && number.fract() != 0.0 {
        return Err(format!("expected an integer, got {number}"));
    }
    let (min, max) = stream.sanity_range();
    if number < min || number > max {
        return Err(format!("{number} outside plausible range [{min}, {max}]"));
    }
    Ok(number)
}
