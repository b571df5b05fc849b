//! Pipeline assembly.
//!
//! [`Pipeline`] wires the ingestor, sequencer, device workers, time-series
//! writer, state board, session registry and broadcaster together, and is
//! the single handle the HTTP/WebSocket layer and the MQTT listener need.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::device_worker::WorkerContext;
use super::{PipelineStats, Sequencer, StatsSnapshot};
use crate::domain::StateBoard;
use crate::error::PipelineError;
use crate::ingest::{Ingestor, Normalizer};
use crate::persistence::{Backend, ReadingWriter};
use crate::ws::{Broadcaster, SessionRegistry};

/// Tunables of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Maximum queued messages per device before drop-oldest kicks in.
    pub queue_depth: usize,
    /// Idle period after which a device is marked offline and its worker
    /// torn down.
    pub idle_timeout: Duration,
    /// Age after which a worker reloads its device configuration.
    pub config_refresh: Duration,
    /// Capacity of the time-series retry buffer.
    pub store_buffer: usize,
    /// Delay between time-series retries after a failure.
    pub store_retry: Duration,
    /// Reliable frames buffered per session before it is resynchronized
    /// with a snapshot instead.
    pub replay_buffer: usize,
    /// Interval between WebSocket pings.
    pub ping_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            idle_timeout: Duration::from_secs(300),
            config_refresh: Duration::from_secs(60),
            store_buffer: 10_000,
            store_retry: Duration::from_secs(1),
            replay_buffer: 64,
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// The assembled ingestion → evaluation → fan-out pipeline.
#[derive(Debug)]
pub struct Pipeline<B: Backend> {
    ingestor: Arc<Ingestor<B>>,
    sequencer: Arc<Sequencer<B>>,
    board: Arc<StateBoard>,
    registry: Arc<SessionRegistry>,
    writer: Arc<ReadingWriter>,
    stats: Arc<PipelineStats>,
    settings: PipelineSettings,
    writer_task: JoinHandle<()>,
}

impl<B: Backend> Pipeline<B> {
    /// Builds the pipeline and starts its time-series writer task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(backend: Arc<B>, settings: PipelineSettings) -> Self {
        let stats = Arc::new(PipelineStats::new());
        let board = Arc::new(StateBoard::new());
        let registry = Arc::new(SessionRegistry::new(settings.replay_buffer));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let writer = Arc::new(ReadingWriter::new(settings.store_buffer));
        let writer_task = writer.spawn(Arc::clone(&backend), settings.store_retry);

        let ctx = Arc::new(WorkerContext {
            backend,
            board: Arc::clone(&board),
            broadcaster,
            writer: Arc::clone(&writer),
            stats: Arc::clone(&stats),
            normalizer: Normalizer::default(),
            settings: settings.clone(),
        });
        let sequencer = Arc::new(Sequencer::new(ctx));
        let ingestor = Arc::new(Ingestor::new(Arc::clone(&sequencer), Arc::clone(&stats)));

        Self {
            ingestor,
            sequencer,
            board,
            registry,
            writer,
            stats,
            settings,
            writer_task,
        }
    }

    /// Decodes and submits one transport payload.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Decode`] for malformed payloads.
    pub fn ingest(&self, payload: &[u8]) -> Result<u64, PipelineError> {
        self.ingestor.handle_payload(payload)
    }

    /// Returns the ingestor, for transport listeners.
    #[must_use]
    pub fn ingestor(&self) -> &Arc<Ingestor<B>> {
        &self.ingestor
    }

    /// Returns the state board.
    #[must_use]
    pub fn board(&self) -> &Arc<StateBoard> {
        &self.board
    }

    /// Returns the session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Returns the pipeline counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Returns the pipeline settings.
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Counters plus current gauges.
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            store_written: self.writer.written(),
            store_lost: self.writer.lost(),
            store_pending: self.writer.pending() as u64,
            store_failures: self.writer.failures(),
            active_devices: self.sequencer.active_workers() as u64,
            sessions: self.registry.session_count() as u64,
            ..self.stats.snapshot()
        }
    }

    /// Returns `true` if a worker is currently alive for `device_id`.
    #[must_use]
    pub fn is_device_active(&self, device_id: crate::domain::DeviceId) -> bool {
        self.sequencer.is_active(device_id)
    }
}

impl<B: Backend> Drop for Pipeline<B> {
    fn drop(&mut self) {
        self.writer_task.abort();
    }
}
