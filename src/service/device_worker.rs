//! The logical worker of one device.
//!
//! A worker drains its device's queue one message at a time: normalize,
//! reject stale readings, evaluate alarm rules, hand accepted readings to
//! the time-series writer and live events to the broadcaster. It is the
//! only writer of its device's alarm state.
//!
//! Device configuration is loaded when the worker starts and reloaded
//! when older than the refresh interval. A worker that sees no traffic for
//! the idle timeout marks the device offline and exits; the next message
//! for the device starts a fresh worker, which resumes from the state
//! board.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::evaluator::AlarmEvaluator;
use super::sequencer::{DeviceQueue, Sequencer};
use super::{PipelineSettings, PipelineStats};
use crate::domain::{
    AlarmRule, Datastream, DatastreamKey, Device, DeviceId, LiveEvent, Liveness, RawRecord, StateBoard, UserId,
};
use crate::error::PipelineError;
use crate::ingest::Normalizer;
use crate::persistence::{Backend, ReadingWriter};
use crate::ws::Broadcaster;

/// Collaborators shared by every device worker.
#[derive(Debug)]
pub struct WorkerContext<B: Backend> {
    /// Configuration, time-series and notification stores.
    pub backend: Arc<B>,
    /// Published copies of alarm state and liveness.
    pub board: Arc<StateBoard>,
    /// Fan-out to live sessions.
    pub broadcaster: Arc<Broadcaster>,
    /// Buffered time-series sink.
    pub writer: Arc<ReadingWriter>,
    /// Pipeline counters.
    pub stats: Arc<PipelineStats>,
    /// Field normalizer.
    pub normalizer: Normalizer,
    /// Queue, timeout and refresh settings.
    pub settings: PipelineSettings,
}

/// Configuration of one device as last loaded from the store.
#[derive(Debug)]
struct DeviceConfig {
    device: Device,
    streams: HashMap<DatastreamKey, Datastream>,
    audience: Vec<UserId>,
    loaded_at: Instant,
}

/// Worker state for one device.
#[derive(Debug)]
pub struct DeviceWorker<B: Backend> {
    device_id: DeviceId,
    queue: Arc<DeviceQueue>,
    sequencer: Arc<Sequencer<B>>,
    ctx: Arc<WorkerContext<B>>,
    config: Option<DeviceConfig>,
    evaluator: Option<AlarmEvaluator>,
    watermarks: HashMap<DatastreamKey, DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

impl<B: Backend> DeviceWorker<B> {
    /// Creates a worker for `device_id` draining `queue`.
    #[must_use]
    pub fn new(
        device_id: DeviceId,
        queue: Arc<DeviceQueue>,
        sequencer: Arc<Sequencer<B>>,
        ctx: Arc<WorkerContext<B>>,
    ) -> Self {
        Self {
            device_id,
            queue,
            sequencer,
            ctx,
            config: None,
            evaluator: None,
            watermarks: HashMap::new(),
            last_seen: Utc::now(),
        }
    }

    /// Runs until the device has been idle for the configured timeout.
    pub async fn run(mut self) {
        loop {
            let next =
                tokio::time::timeout(self.ctx.settings.idle_timeout, self.queue.pop()).await;
            let Ok(record) = next else {
                if self.try_retire() {
                    return;
                }
                continue;
            };

            self.last_seen = Utc::now();
            match self.ensure_config().await {
                Ok(()) => self.process(record).await,
                Err(PipelineError::UnknownDevice(device_id)) => {
                    self.ctx.stats.record_unknown_device();
                    tracing::warn!(%device_id, sequence = record.sequence, "dropping telemetry from unknown device");
                    if self.config.is_none() && self.try_retire() {
                        return;
                    }
                }
                Err(e) => {
                    self.ctx.stats.record_config_error();
                    tracing::error!(device_id = %self.device_id, error = %e, "device configuration unavailable, dropping message");
                }
            }
        }
    }

    /// Loads the device configuration on first use and reloads it once it
    /// is older than the refresh interval.
    async fn ensure_config(&mut self) -> Result<(), PipelineError> {
        let stale = self
            .config
            .as_ref()
            .is_none_or(|c| c.loaded_at.elapsed() >= self.ctx.settings.config_refresh);
        if !stale {
            return Ok(());
        }

        match self.load_config().await {
            Ok((config, rules)) => {
                self.apply_config(config, rules);
                Ok(())
            }
            Err(e) => match self.config.as_mut() {
                // Keep serving the previous configuration; try again later.
                Some(previous) if !matches!(e, PipelineError::UnknownDevice(_)) => {
                    tracing::warn!(device_id = %self.device_id, error = %e, "configuration refresh failed");
                    previous.loaded_at = Instant::now();
                    Ok(())
                }
                _ => Err(e),
            },
        }
    }

    async fn load_config(
        &self,
    ) -> Result<(DeviceConfig, Vec<AlarmRule>), PipelineError> {
        let backend = &self.ctx.backend;
        let device = backend
            .get_device(self.device_id)
            .await
            .map_err(PipelineError::ConfigUnavailable)?
            .ok_or(PipelineError::UnknownDevice(self.device_id))?;
        let streams = backend
            .get_datastreams(self.device_id)
            .await
            .map_err(PipelineError::ConfigUnavailable)?
            .into_iter()
            .map(|s| (s.key.clone(), s))
            .collect();
        let rules = backend
            .get_alarm_rules(self.device_id)
            .await
            .map_err(PipelineError::ConfigUnavailable)?;
        let audience = backend
            .entitled_users(&device)
            .await
            .map_err(PipelineError::ConfigUnavailable)?;
        Ok((
            DeviceConfig {
                device,
                streams,
                audience,
                loaded_at: Instant::now(),
            },
            rules,
        ))
    }

    fn apply_config(&mut self, config: DeviceConfig, rules: Vec<AlarmRule>) {
        let board = &self.ctx.board;
        if let Some(evaluator) = self.evaluator.as_mut() {
            evaluator.reconfigure(rules, &config.streams);
            board.set_audience(self.device_id, config.audience.clone());
            board.retain_rules(self.device_id, |id| evaluator.has_rule(id));
            tracing::debug!(device_id = %self.device_id, "device configuration reloaded");
        } else {
            let memory = board.restore(self.device_id).unwrap_or_default();
            for (key, ts) in memory.watermarks {
                let mark = self.watermarks.entry(key).or_insert(ts);
                *mark = (*mark).max(ts);
            }
            let evaluator =
                AlarmEvaluator::new(self.device_id, rules, &config.streams, memory.alarms);

            board.mark_online(self.device_id, config.audience.clone(), self.last_seen);
            board.retain_rules(self.device_id, |id| evaluator.has_rule(id));
            for state in evaluator.states() {
                board.publish_alarm(state.clone());
            }
            self.evaluator = Some(evaluator);

            tracing::info!(
                device_id = %self.device_id,
                owner = %config.device.owner,
                datastreams = config.streams.len(),
                "device online"
            );
            self.ctx.broadcaster.deliver(
                &config.audience,
                LiveEvent::DeviceStatus {
                    device_id: self.device_id,
                    status: Liveness::Online,
                    last_seen: self.last_seen,
                },
            );
        }
        self.config = Some(config);
    }

    async fn process(&mut self, record: RawRecord) {
        let (Some(config), Some(evaluator)) = (self.config.as_ref(), self.evaluator.as_mut())
        else {
            return;
        };
        let ctx = &self.ctx;

        let normalized = ctx.normalizer.normalize(&record, &config.streams);
        ctx.stats
            .record_field_drops(normalized.rejected.len(), normalized.unknown.len());

        for reading in normalized.readings {
            if let Some(last) = self.watermarks.get(&reading.datastream)
                && reading.timestamp <= *last
            {
                ctx.stats.record_stale();
                let err = PipelineError::StaleReading {
                    device_id: reading.device_id,
                    datastream: reading.datastream.clone(),
                };
                tracing::trace!(%err, timestamp = %reading.timestamp, last = %last, "ignoring reading");
                continue;
            }
            self.watermarks
                .insert(reading.datastream.clone(), reading.timestamp);
            ctx.stats.record_accepted();

            let transitions = evaluator.evaluate(&reading);
            ctx.broadcaster
                .deliver(&config.audience, LiveEvent::sensor(&reading));
            ctx.writer.enqueue(reading);

            for transition in transitions {
                ctx.stats.record_transition();
                if let Some(state) = evaluator.state(&transition.rule_id) {
                    ctx.board.publish_alarm(state.clone());
                }
                tracing::info!(
                    device_id = %transition.device_id,
                    rule_id = %transition.rule_id,
                    datastream = %transition.datastream,
                    value = transition.value,
                    status = transition.to.as_str(),
                    "alarm status changed"
                );
                if let Err(e) = ctx.backend.record_alarm_event(&transition).await {
                    ctx.stats.record_notification_failure();
                    tracing::warn!(
                        rule_id = %transition.rule_id,
                        error = %PipelineError::StoreWrite(e),
                        "failed to persist alarm notification"
                    );
                }
                ctx.broadcaster
                    .deliver(&config.audience, LiveEvent::status(&transition));
            }
        }
    }

    /// Attempts to tear the worker down after an idle period. The offline
    /// transition is published while routing is locked, so a worker
    /// started for the next message always observes it.
    fn try_retire(&self) -> bool {
        let board = &self.ctx.board;
        let broadcaster = &self.ctx.broadcaster;
        let config = self.config.as_ref();
        let device_id = self.device_id;
        let last_seen = self.last_seen;
        let watermarks = self.watermarks.clone();

        let retired = self.sequencer.retire(device_id, &self.queue, || {
            // Workers that never resolved their device never went online.
            if let Some(config) = config {
                board.mark_offline(device_id, last_seen, watermarks);
                broadcaster.deliver(
                    &config.audience,
                    LiveEvent::DeviceStatus {
                        device_id,
                        status: Liveness::Offline,
                        last_seen,
                    },
                );
            }
        });
        if retired && config.is_some() {
            tracing::info!(%device_id, %last_seen, "device idle, marked offline");
        } else if retired {
            tracing::debug!(%device_id, "worker for unresolved device retired");
        }
        retired
    }
}
