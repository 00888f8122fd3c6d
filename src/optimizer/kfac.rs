//! Kronecker-factored approximate curvature (KFAC).
//!
//! For a dense block with inputs `a` (bias entry included) and output
//! derivatives `g = ∂ log|ψ| / ∂ out`, the Fisher block is approximated by
//! `G ⊗ A` with `A = E[a aᵀ]` (averaged over all uses of the layer) and
//! `G = E[Σ g gᵀ]` (summed over uses, averaged over samples). Both factors
//! are exponential moving averages across steps. The preconditioned gradient
//! of the `n_out × (n_in + 1)` weight matrix `M` is
//!
//!   Δ = (G + λ/π I)⁻¹ M (A + π λ I)⁻¹,  λ = √damping,
//!   π = √((tr A / dim A) / (tr G / dim G)).
//!
//! Generic blocks use the diagonal of the Fisher matrix instead.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::estimator::{GradientEstimate, LocalEnergySample};
use crate::wavefunction::{BlockKind, ParamLayout, Parameters};
use super::{norm, norm_constraint_scale, scheduled_learning_rate};

fn default_learning_rate() -> f64 {
    0.05
}
fn default_damping() -> f64 {
    1e-3
}
fn default_min_damping() -> f64 {
    1e-6
}
fn default_max_damping() -> f64 {
    10.0
}
fn default_damping_adaptation() -> f64 {
    1.2
}
fn default_max_update_ratio() -> f64 {
    0.05
}
fn default_cov_ema_decay() -> f64 {
    0.95
}
fn default_norm_constraint() -> Option<f64> {
    Some(1e-3)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KfacConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub decay_rate: Option<f64>,
    /// Initial Tikhonov damping.
    #[serde(default = "default_damping")]
    pub damping: f64,
    #[serde(default = "default_min_damping")]
    pub min_damping: f64,
    #[serde(default = "default_max_damping")]
    pub max_damping: f64,
    /// Factor by which the damping is raised or lowered.
    #[serde(default = "default_damping_adaptation")]
    pub damping_adaptation: f64,
    /// Relative update `|Δθ|/|θ|` above which the damping is raised.
    #[serde(default = "default_max_update_ratio")]
    pub max_update_ratio: f64,
    #[serde(default = "default_cov_ema_decay")]
    pub cov_ema_decay: f64,
    #[serde(default = "default_norm_constraint")]
    pub norm_constraint: Option<f64>,
}

impl Default for KfacConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            decay_rate: None,
            damping: default_damping(),
            min_damping: default_min_damping(),
            max_damping: default_max_damping(),
            damping_adaptation: default_damping_adaptation(),
            max_update_ratio: default_max_update_ratio(),
            cov_ema_decay: default_cov_ema_decay(),
            norm_constraint: default_norm_constraint(),
        }
    }
}

impl KfacConfig {
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_norm_constraint(mut self, norm_constraint: Option<f64>) -> Self {
        self.norm_constraint = norm_constraint;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(VmcError::InvalidConfig("kfac.learning_rate must be positive".into()));
        }
        if !(self.min_damping > 0.0
            && self.min_damping <= self.damping
            && self.damping <= self.max_damping)
        {
            return Err(VmcError::InvalidConfig(format!(
                "kfac damping {} must lie in [{}, {}] with a positive lower bound",
                self.damping, self.min_damping, self.max_damping
            )));
        }
        if !(self.damping_adaptation > 1.0) {
            return Err(VmcError::InvalidConfig(
                "kfac.damping_adaptation must exceed 1".into(),
            ));
        }
        if !(self.max_update_ratio > 0.0) {
            return Err(VmcError::InvalidConfig("kfac.max_update_ratio must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.cov_ema_decay) {
            return Err(VmcError::InvalidConfig("kfac.cov_ema_decay must lie in [0, 1)".into()));
        }
        if matches!(self.norm_constraint, Some(c) if !(c > 0.0)) {
            return Err(VmcError::InvalidConfig("kfac.norm_constraint must be positive".into()));
        }
        if matches!(self.decay_rate, Some(d) if !(d > 0.0)) {
            return Err(VmcError::InvalidConfig("kfac.decay_rate must be positive".into()));
        }
        Ok(())
    }
}

/// Kronecker factors of one dense block.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KroneckerFactors {
    /// `(n_in + 1) × (n_in + 1)` input second moment.
    pub a: DMatrix<f64>,
    /// `n_out × n_out` output-derivative second moment.
    pub g: DMatrix<f64>,
}

/// Curvature statistics and damping, indexed by parameter block.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KfacState {
    pub step: u64,
    pub damping: f64,
    pub factors: Vec<Option<KroneckerFactors>>,
    pub diagonal: Vec<Option<Vec<f64>>>,
}

fn ema<T>(old: Option<T>, new: T, decay: f64, blend: impl FnOnce(T, T, f64) -> T) -> T {
    match old {
        Some(old) => blend(old, new, decay),
        None => new,
    }
}

impl KfacState {
    pub fn new(config: &KfacConfig, layout: &ParamLayout) -> Self {
        let n_blocks = layout.blocks().len();
        Self {
            step: 0,
            damping: config.damping,
            factors: vec![None; n_blocks],
            diagonal: vec![None; n_blocks],
        }
    }

    /// Fold the statistics of `samples` into the moving averages.
    fn accumulate(&mut self, decay: f64, layout: &ParamLayout, samples: &[&LocalEnergySample]) {
        if samples.is_empty() {
            return;
        }
        let n = samples.len() as f64;
        for (index, block) in layout.blocks().iter().enumerate() {
            match block.kind {
                BlockKind::Dense { n_in, n_out } => {
                    let mut a = DMatrix::<f64>::zeros(n_in + 1, n_in + 1);
                    let mut g = DMatrix::<f64>::zeros(n_out, n_out);
                    let mut uses = 0usize;
                    for stat in samples
                        .iter()
                        .flat_map(|s| &s.layer_stats)
                        .filter(|stat| stat.block == index)
                    {
                        let av = DVector::from_column_slice(&stat.a);
                        let gv = DVector::from_column_slice(&stat.g);
                        a.ger(1.0, &av, &av, 1.0);
                        g.ger(1.0, &gv, &gv, 1.0);
                        uses += 1;
                    }
                    if uses == 0 {
                        continue;
                    }
                    a /= uses as f64;
                    g /= n;
                    let new = KroneckerFactors { a, g };
                    self.factors[index] = Some(ema(self.factors[index].take(), new, decay, |old, new, d| {
                        KroneckerFactors {
                            a: old.a * d + new.a * (1.0 - d),
                            g: old.g * d + new.g * (1.0 - d),
                        }
                    }));
                }
                BlockKind::Generic => {
                    let range = block.range();
                    let mut diag = vec![0.0; block.len];
                    for s in samples {
                        for (d, x) in diag.iter_mut().zip(&s.log_psi_grad[range.clone()]) {
                            *d += x * x / n;
                        }
                    }
                    self.diagonal[index] = Some(ema(self.diagonal[index].take(), diag, decay, |old, new, d| {
                        old.iter().zip(&new).map(|(o, x)| o * d + x * (1.0 - d)).collect()
                    }));
                }
            }
        }
    }

    /// Raise the damping when updates are large relative to the parameters,
    /// lower it when they are small.
    fn adapt_damping(&mut self, config: &KfacConfig, update_norm: f64, param_norm: f64) {
        if !(param_norm > 0.0) || !update_norm.is_finite() {
            return;
        }
        let ratio = update_norm / param_norm;
        if ratio > config.max_update_ratio {
            self.damping *= config.damping_adaptation;
        } else if ratio < 0.25 * config.max_update_ratio {
            self.damping /= config.damping_adaptation;
        }
        self.damping = self.damping.clamp(config.min_damping, config.max_damping);
    }
}

fn solve_spd(matrix: DMatrix<f64>, rhs: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    match matrix.clone().cholesky() {
        Some(chol) => Some(chol.solve(rhs)),
        None => matrix.lu().solve(rhs),
    }
}

/// `(G + λ/π I)⁻¹ M (A + πλ I)⁻¹` flattened row-major like the block itself.
fn precondition_dense(factors: &KroneckerFactors, grad: &[f64], n_out: usize, damping: f64) -> Option<Vec<f64>> {
    let n_cols = factors.a.nrows();
    let m = DMatrix::from_row_slice(n_out, n_cols, grad);
    let pi = ((factors.a.trace() / n_cols as f64) / (factors.g.trace() / n_out as f64)).sqrt();
    let pi = if pi.is_finite() && pi > 0.0 { pi } else { 1.0 };
    let lambda = damping.sqrt();

    let a = &factors.a + DMatrix::identity(n_cols, n_cols) * (pi * lambda);
    let g = &factors.g + DMatrix::identity(n_out, n_out) * (lambda / pi);
    let left = solve_spd(g, &m)?;
    // A is symmetric, so A⁻¹ Xᵀ is the transpose of X A⁻¹
    let delta_t = solve_spd(a, &left.transpose())?;
    Some(delta_t.as_slice().to_vec())
}

/// Returns the parameter update and the learning rate used.
pub(super) fn update(
    config: &KfacConfig,
    state: &mut KfacState,
    params: &Parameters,
    estimate: &GradientEstimate,
    samples: &[LocalEnergySample],
) -> (Vec<f64>, f64) {
    let lr = scheduled_learning_rate(config.learning_rate, config.decay_rate, state.step);
    let layout = params.layout();
    let kept: Vec<&LocalEnergySample> = estimate.kept.iter().map(|&i| &samples[i]).collect();
    state.accumulate(config.cov_ema_decay, layout, &kept);

    let grad = &estimate.gradient;
    let mut delta = grad.clone();
    for (index, block) in layout.blocks().iter().enumerate() {
        let range = block.range();
        match block.kind {
            BlockKind::Dense { n_out, .. } => {
                let Some(factors) = &state.factors[index] else {
                    continue;
                };
                match precondition_dense(factors, &grad[range.clone()], n_out, state.damping) {
                    Some(d) => delta[range].copy_from_slice(&d),
                    None => tracing::warn!(block = %block.name, "singular curvature block, using the plain gradient"),
                }
            }
            BlockKind::Generic => {
                if let Some(fisher) = &state.diagonal[index] {
                    for (d, f) in delta[range].iter_mut().zip(fisher) {
                        *d /= f + state.damping;
                    }
                }
            }
        }
    }

    let scale = norm_constraint_scale(config.norm_constraint, lr, &delta, grad);
    let update: Vec<f64> = delta.iter().map(|d| -lr * scale * d).collect();
    state.adapt_damping(config, norm(&update), params.norm());
    state.step += 1;
    (update, lr)
}
