//! Sampling module - Metropolis sampling of |ψ|² with persistent walkers.

mod stats;
mod vmc;
mod walkers;

pub use stats::{autocorrelation_time, blocking_error, mean, standard_error, variance, SeriesStats};
pub use vmc::{MetropolisSampler, SampleStats, SamplerConfig};
pub use walkers::{Walker, WalkerBatch};
