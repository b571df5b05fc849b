//! PostgreSQL implementation of the collaborator stores.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{ConfigStore, NotificationStore, StoreError, TimeSeriesStore};
use crate::domain::{
    AlarmRule, AlarmTransition, Condition, Datastream, DatastreamKey, Device, DeviceId, Liveness,
    Reading, RuleId, UserId, ValueType,
};

/// PostgreSQL-backed store using `sqlx::PgPool`.
///
/// Schema lives in `migrations/` and is applied at startup.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn parse_liveness(raw: &str) -> Liveness {
    if raw == "online" {
        Liveness::Online
    } else {
        Liveness::Offline
    }
}

fn parse_value_type(raw: &str) -> ValueType {
    if raw == "integer" {
        ValueType::Integer
    } else {
        ValueType::Float
    }
}

fn saturating_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

type DeviceRow = (
    i64,
    i64,
    Option<i64>,
    String,
    String,
    Option<DateTime<Utc>>,
);

impl ConfigStore for PostgresStore {
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        let row = sqlx::query_as::<_, DeviceRow>(
            "SELECT id, owner_id, organization_id, name, status, last_seen \
             FROM devices WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(row.map(
            |(id, owner, organization_id, name, status, last_seen)| Device {
                id: DeviceId::new(id),
                owner: UserId::new(owner),
                organization_id,
                name,
                status: parse_liveness(&status),
                last_seen,
            },
        ))
    }

    async fn get_datastreams(&self, device_id: DeviceId) -> Result<Vec<Datastream>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, Option<f64>, Option<f64>)>(
            "SELECT key, value_type, unit, min_value, max_value \
             FROM datastreams WHERE device_id = $1 ORDER BY key",
        )
        .bind(device_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(rows
            .into_iter()
            .map(|(key, value_type, unit, min, max)| Datastream {
                device_id,
                key: DatastreamKey::new(key),
                value_type: parse_value_type(&value_type),
                unit,
                min,
                max,
            })
            .collect())
    }

    async fn get_alarm_rules(&self, device_id: DeviceId) -> Result<Vec<AlarmRule>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, serde_json::Value, f64)>(
            "SELECT id, datastream, condition, hysteresis \
             FROM alarm_rules WHERE device_id = $1 ORDER BY id",
        )
        .bind(device_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut rules = Vec::with_capacity(rows.len());
        for (id, datastream, condition, hysteresis) in rows {
            match serde_json::from_value::<Condition>(condition) {
                Ok(condition) => rules.push(AlarmRule {
                    id: RuleId::new(id),
                    device_id,
                    datastream: DatastreamKey::new(datastream),
                    condition,
                    hysteresis,
                }),
                Err(e) => {
                    tracing::warn!(%device_id, rule_id = %id, error = %e, "skipping rule with unreadable condition");
                }
            }
        }
        Ok(rules)
    }

    async fn entitled_users(&self, device: &Device) -> Result<Vec<UserId>, StoreError> {
        let mut users = vec![device.owner];
        if let Some(org_id) = device.organization_id {
            let members = sqlx::query_scalar::<_, i64>(
                "SELECT user_id FROM organization_members WHERE organization_id = $1",
            )
            .bind(org_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;
            users.extend(members.into_iter().map(UserId::new));
        }
        users.sort_unstable();
        users.dedup();
        Ok(users)
    }
}

impl TimeSeriesStore for PostgresStore {
    async fn append(&self, reading: &Reading) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO readings (device_id, datastream, value, ts, sequence) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(reading.device_id.get())
        .bind(reading.datastream.as_str())
        .bind(reading.value)
        .bind(reading.timestamp)
        .bind(saturating_i64(reading.sequence))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }
}

impl NotificationStore for PostgresStore {
    async fn record_alarm_event(&self, event: &AlarmTransition) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO alarm_events \
             (rule_id, device_id, datastream, from_status, to_status, value, ts) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.rule_id.as_str())
        .bind(event.device_id.get())
        .bind(event.datastream.as_str())
        .bind(event.from.as_str())
        .bind(event.to.as_str())
        .bind(event.value)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }
}
