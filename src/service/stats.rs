//! Pipeline counters.
//!
//! Every drop in the pipeline is counted here so that loss is observable
//! rather than silent. Counters are monotonic and use relaxed atomics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use utoipa::ToSchema;

/// Monotonic counters shared by every pipeline stage.
#[derive(Debug, Default)]
pub struct PipelineStats {
    messages_received: AtomicU64,
    decode_failures: AtomicU64,
    validation_failures: AtomicU64,
    unknown_fields: AtomicU64,
    unknown_devices: AtomicU64,
    config_errors: AtomicU64,
    queue_overflow: AtomicU64,
    stale_dropped: AtomicU64,
    readings_accepted: AtomicU64,
    alarm_transitions: AtomicU64,
    notification_failures: AtomicU64,
    delivery_failures: AtomicU64,
}

/// Serializable copy of the counters, enriched with gauges from the
/// writer, sequencer and session registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct StatsSnapshot {
    /// Transport messages seen by the listener.
    pub messages_received: u64,
    /// Messages dropped as undecodable.
    pub decode_failures: u64,
    /// Fields dropped by type/range/datastream validation.
    pub validation_failures: u64,
    /// Fields dropped because their name is not a known alias.
    pub unknown_fields: u64,
    /// Messages dropped because the device is not provisioned.
    pub unknown_devices: u64,
    /// Messages dropped because configuration could not be loaded.
    pub config_errors: u64,
    /// Messages evicted from a full device queue.
    pub queue_overflow: u64,
    /// Readings dropped as stale, duplicate or out of order.
    pub stale_dropped: u64,
    /// Readings accepted into the pipeline.
    pub readings_accepted: u64,
    /// Alarm status transitions emitted.
    pub alarm_transitions: u64,
    /// Alarm notification records that failed to persist.
    pub notification_failures: u64,
    /// Sessions dropped after a failed socket write.
    pub delivery_failures: u64,
    /// Readings written to the time-series store.
    pub store_written: u64,
    /// Readings lost to time-series buffer saturation.
    pub store_lost: u64,
    /// Readings waiting in the time-series buffer.
    pub store_pending: u64,
    /// Failed time-series append attempts, retries included.
    pub store_failures: u64,
    /// Device workers currently alive.
    pub active_devices: u64,
    /// Live sessions.
    pub sessions: u64,
}

macro_rules! counter {
    ($($field:ident => $method:ident),* $(,)?) => {
        impl PipelineStats {
            $(
                #[doc = concat!("Increments `", stringify!($field), "` by one.")]
                pub fn $method(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    messages_received => record_received,
    decode_failures => record_decode_failure,
    unknown_devices => record_unknown_device,
    config_errors => record_config_error,
    queue_overflow => record_queue_overflow,
    stale_dropped => record_stale,
    readings_accepted => record_accepted,
    alarm_transitions => record_transition,
    notification_failures => record_notification_failure,
    delivery_failures => record_delivery_failure,
}

impl PipelineStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds per-field drop counts from one normalized message.
    pub fn record_field_drops(&self, validation: usize, unknown: usize) {
        self.validation_failures
            .fetch_add(validation as u64, Ordering::Relaxed);
        self.unknown_fields
            .fetch_add(unknown as u64, Ordering::Relaxed);
    }

    /// Copies the counters. Gauges are left at zero for the caller to fill.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            messages_received: get(&self.messages_received),
            decode_failures: get(&self.decode_failures),
            validation_failures: get(&self.validation_failures),
            unknown_fields: get(&self.unknown_fields),
            unknown_devices: get(&self.unknown_devices),
            config_errors: get(&self.config_errors),
            queue_overflow: get(&self.queue_overflow),
            stale_dropped: get(&self.stale_dropped),
            readings_accepted: get(&self.readings_accepted),
            alarm_transitions: get(&self.alarm_transitions),
            notification_failures: get(&self.notification_failures),
            delivery_failures: get(&self.delivery_failures),
            ..StatsSnapshot::default()
        }
    }
}
