//! Optimizer module - parameter updates from energy gradient estimates.
//!
//! Three methods share one interface:
//!
//! - Adam with bias-corrected moments, stepped by `burn::optim`,
//! - KFAC, a natural gradient with Kronecker-factored curvature per dense layer,
//! - stochastic reconfiguration (SR), the natural gradient with the full
//!   overlap matrix.
//!
//! The learning rate follows `lr / (1 + t / decay_rate)` when a decay rate is
//! configured.

mod adam;
mod kfac;
mod sr;

pub use adam::{AdamConfig, AdamState};
pub use kfac::{KfacConfig, KfacState, KroneckerFactors};
pub use sr::{SrConfig, SrState};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::estimator::{GradientEstimate, LocalEnergySample};
use crate::wavefunction::{ParamLayout, Parameters};

/// `lr / (1 + t / decay_rate)`.
pub fn scheduled_learning_rate(lr: f64, decay_rate: Option<f64>, step: u64) -> f64 {
    match decay_rate {
        Some(decay) => lr / (1.0 + step as f64 / decay),
        None => lr,
    }
}

/// Scale factor keeping the predicted change `lr²·Δ·g` below `max_norm`.
pub(crate) fn norm_constraint_scale(max_norm: Option<f64>, lr: f64, delta: &[f64], grad: &[f64]) -> f64 {
    let Some(max_norm) = max_norm else {
        return 1.0;
    };
    let predicted: f64 = lr * lr * delta.iter().zip(grad).map(|(d, g)| d * g).sum::<f64>();
    if predicted > max_norm {
        (max_norm / predicted).sqrt()
    } else {
        1.0
    }
}

pub(crate) fn norm(xs: &[f64]) -> f64 {
    xs.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Optimizer selection, tagged by `kind` in configuration files.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam(AdamConfig),
    Kfac(KfacConfig),
    Sr(SrConfig),
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Kfac(KfacConfig::default())
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            OptimizerConfig::Adam(c) => c.validate(),
            OptimizerConfig::Kfac(c) => c.validate(),
            OptimizerConfig::Sr(c) => c.validate(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OptimizerConfig::Adam(_) => "adam",
            OptimizerConfig::Kfac(_) => "kfac",
            OptimizerConfig::Sr(_) => "sr",
        }
    }
}

/// Mutable optimizer state, persisted in checkpoints.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerState {
    Adam(AdamState),
    Kfac(KfacState),
    Sr(SrState),
}

impl OptimizerState {
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerState::Adam(_) => "adam",
            OptimizerState::Kfac(_) => "kfac",
            OptimizerState::Sr(_) => "sr",
        }
    }

    /// Number of updates applied so far.
    pub fn step(&self) -> u64 {
        match self {
            OptimizerState::Adam(s) => s.step,
            OptimizerState::Kfac(s) => s.step,
            OptimizerState::Sr(s) => s.step,
        }
    }
}

/// What one update did.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StepStats {
    pub learning_rate: f64,
    pub grad_norm: f64,
    pub update_norm: f64,
    /// Norm of the parameters after the update.
    pub param_norm: f64,
    /// Current damping (KFAC only).
    pub damping: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Optimizer {
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// KFAC needs dense layer statistics from every sample.
    pub fn needs_layer_stats(&self) -> bool {
        matches!(self.config, OptimizerConfig::Kfac(_))
    }

    /// Fresh state for parameters with the given layout.
    pub fn init(&self, layout: &ParamLayout) -> OptimizerState {
        match &self.config {
            OptimizerConfig::Adam(_) => OptimizerState::Adam(AdamState::new(layout.len())),
            OptimizerConfig::Kfac(c) => OptimizerState::Kfac(KfacState::new(c, layout)),
            OptimizerConfig::Sr(_) => OptimizerState::Sr(SrState::default()),
        }
    }

    /// Compute new parameters from a gradient estimate, advancing `state`.
    pub fn step(
        &self,
        state: &mut OptimizerState,
        params: &Parameters,
        estimate: &GradientEstimate,
        samples: &[LocalEnergySample],
    ) -> Result<(Parameters, StepStats)> {
        if estimate.gradient.len() != params.len() {
            return Err(VmcError::InvalidConfig(format!(
                "gradient has {} entries, parameters have {}",
                estimate.gradient.len(),
                params.len()
            )));
        }
        let (update, learning_rate, damping) = match (&self.config, state) {
            (OptimizerConfig::Adam(c), OptimizerState::Adam(s)) => {
                let (update, lr) = adam::update(c, s, params.values(), &estimate.gradient);
                (update, lr, None)
            }
            (OptimizerConfig::Kfac(c), OptimizerState::Kfac(s)) => {
                let (update, lr) = kfac::update(c, s, params, estimate, samples);
                (update, lr, Some(s.damping))
            }
            (OptimizerConfig::Sr(c), OptimizerState::Sr(s)) => {
                let (update, lr) = sr::update(c, s, estimate, samples);
                (update, lr, None)
            }
            (config, state) => {
                return Err(VmcError::InvalidConfig(format!(
                    "optimizer state {} does not match optimizer {}",
                    state.name(),
                    config.name()
                )))
            }
        };

        let values: Vec<f64> = params.values().iter().zip(&update).map(|(p, u)| p + u).collect();
        let new_params = params.with_values(values)?;
        let stats = StepStats {
            learning_rate,
            grad_norm: norm(&estimate.gradient),
            update_norm: norm(&update),
            param_norm: new_params.norm(),
            damping,
        };
        Ok((new_params, stats))
    }
}
