//! Estimator module - local energy samples and the energy gradient.

mod gradient;
mod sample;

pub use gradient::{
    log_squeeze, median, quantile, ClipMode, EnergyStats, EstimatorConfig, GradientEstimate,
    GradientEstimator,
};
pub use sample::{evaluate_batch, evaluate_sample, log_psi_gradient, LayerStat, LocalEnergySample};
