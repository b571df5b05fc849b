//! Service layer: per-device sequencing, alarm evaluation, and pipeline
//! assembly.

pub mod device_worker;
pub mod evaluator;
pub mod pipeline;
pub mod sequencer;
pub mod stats;

pub use evaluator::AlarmEvaluator;
pub use pipeline::{Pipeline, PipelineSettings};
pub use sequencer::Sequencer;
pub use stats::{PipelineStats, StatsSnapshot};
