//! Training module - the optimization loop and everything around it.
//!
//! A run is an explicit [`TrainState`] threaded through
//! [`Trainer::iterate`]; checkpoints serialize that state, metrics sinks
//! receive one [`StepMetrics`] per iteration.

mod checkpoint;
mod config;
mod metrics;
mod run;
mod trainer;

pub use checkpoint::Checkpointer;
pub use config::{AnsatzConfig, RunConfig, SystemConfig, TrainingConfig};
pub use metrics::{
    DivergenceConfig, DivergenceMonitor, JsonLinesSink, MemorySink, MetricsSink, StepMetrics,
    TracingSink,
};
pub use run::{run, RunOptions, RunSummary};
pub use trainer::{Evaluation, StopSignal, TrainState, Trainer};
