//! Stochastic Reconfiguration (SR) optimizer.
//!
//! Natural gradient descent on the energy. The update δp solves
//!
//!   (S + ε I) · δp = f
//!
//! where:
//! - S_ij = ⟨Ō_i Ō_j⟩                 (overlap/covariance matrix)
//! - f_i = ⟨Ē_L Ō_i⟩                  (energy-parameter covariance)
//! - Ō_i = ∂ ln|Ψ| / ∂p_i − ⟨∂ ln|Ψ| / ∂p_i⟩, Ē_L the centered local energy
//!
//! and the parameters move by `−lr · δp`. With more parameters than samples
//! the same δp is obtained in sample space as `Ōᵀ (Ō Ōᵀ + n ε I)⁻¹ Ē_L`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::estimator::{GradientEstimate, LocalEnergySample};
use super::{norm_constraint_scale, scheduled_learning_rate};

fn default_learning_rate() -> f64 {
    0.05
}

fn default_sr_epsilon() -> f64 {
    1e-3
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SrConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub decay_rate: Option<f64>,
    /// Levenberg-Marquardt regularization of the S matrix.
    #[serde(default = "default_sr_epsilon")]
    pub sr_epsilon: f64,
    #[serde(default)]
    pub norm_constraint: Option<f64>,
}

impl Default for SrConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            decay_rate: None,
            sr_epsilon: default_sr_epsilon(),
            norm_constraint: None,
        }
    }
}

impl SrConfig {
    /// Set learning rate.
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Set SR regularization parameter.
    pub fn with_sr_epsilon(mut self, eps: f64) -> Self {
        self.sr_epsilon = eps;
        self
    }

    pub fn with_norm_constraint(mut self, norm_constraint: Option<f64>) -> Self {
        self.norm_constraint = norm_constraint;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(VmcError::InvalidConfig("sr.learning_rate must be positive".into()));
        }
        if !(self.sr_epsilon > 0.0) {
            return Err(VmcError::InvalidConfig("sr.sr_epsilon must be positive".into()));
        }
        if matches!(self.norm_constraint, Some(c) if !(c > 0.0)) {
            return Err(VmcError::InvalidConfig("sr.norm_constraint must be positive".into()));
        }
        if matches!(self.decay_rate, Some(d) if !(d > 0.0)) {
            return Err(VmcError::InvalidConfig("sr.decay_rate must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SrState {
    pub step: u64,
}

fn solve_symmetric(matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    match matrix.clone().cholesky() {
        Some(chol) => Some(chol.solve(rhs)),
        None => matrix.lu().solve(rhs),
    }
}

/// Solve `(ŌᵀŌ/n + εI) δ = Ōᵀe/n` with the `p × p` overlap matrix.
fn solve_parameter_space(o: &DMatrix<f64>, e: &DVector<f64>, eps: f64) -> DVector<f64> {
    let n = o.nrows() as f64;
    let p = o.ncols();
    let s = o.transpose() * o / n + DMatrix::identity(p, p) * eps;
    let force = o.transpose() * e / n;
    // fall back to the plain gradient if S is singular
    solve_symmetric(s, &force).unwrap_or(force)
}

/// Same δ through the `n × n` matrix `ŌŌᵀ + nεI`.
fn solve_sample_space(o: &DMatrix<f64>, e: &DVector<f64>, eps: f64) -> DVector<f64> {
    let n = o.nrows();
    let t = o * o.transpose() + DMatrix::identity(n, n) * (n as f64 * eps);
    match solve_symmetric(t, e) {
        Some(y) => o.transpose() * y,
        None => o.transpose() * e / n as f64,
    }
}

/// Returns the parameter update and the learning rate used.
pub(super) fn update(
    config: &SrConfig,
    state: &mut SrState,
    estimate: &GradientEstimate,
    samples: &[LocalEnergySample],
) -> (Vec<f64>, f64) {
    let lr = scheduled_learning_rate(config.learning_rate, config.decay_rate, state.step);
    state.step += 1;
    let n_params = estimate.gradient.len();
    let kept = &estimate.kept;
    if kept.is_empty() {
        return (vec![0.0; n_params], lr);
    }

    let n = kept.len() as f64;
    let mut o_mean = vec![0.0; n_params];
    for &i in kept {
        for (m, &o) in o_mean.iter_mut().zip(&samples[i].log_psi_grad) {
            *m += o / n;
        }
    }
    let o = DMatrix::from_fn(kept.len(), n_params, |k, j| {
        samples[kept[k]].log_psi_grad[j] - o_mean[j]
    });
    let e = DVector::from_column_slice(&estimate.centered_energies);

    let delta = if n_params <= kept.len() {
        solve_parameter_space(&o, &e, config.sr_epsilon)
    } else {
        solve_sample_space(&o, &e, config.sr_epsilon)
    };
    let delta = delta.as_slice();
    let scale = norm_constraint_scale(config.norm_constraint, lr, delta, &estimate.gradient);
    let update = delta.iter().map(|d| -lr * scale * d).collect();
    (update, lr)
}
