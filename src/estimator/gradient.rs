//! Energy gradient estimator with robust outlier treatment.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use super::sample::LocalEnergySample;

/// Treatment of local energy outliers before the gradient is formed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipMode {
    None,
    /// Hard clamp to `median ± w`.
    Clamp,
    /// Smooth logarithmic squeeze around the median.
    #[default]
    LogSqueeze,
}

fn default_clip_width() -> f64 {
    5.0
}

fn default_clip_quantile() -> f64 {
    0.95
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    #[serde(default)]
    pub clip_mode: ClipMode,
    /// Clip width in units of the `clip_quantile` deviation from the median.
    #[serde(default = "default_clip_width")]
    pub clip_width: f64,
    #[serde(default = "default_clip_quantile")]
    pub clip_quantile: f64,
    /// Samples deviating by at least this many scale units are dropped.
    #[serde(default)]
    pub exclude_width: Option<f64>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            clip_mode: ClipMode::default(),
            clip_width: default_clip_width(),
            clip_quantile: default_clip_quantile(),
            exclude_width: None,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.clip_width > 0.0) {
            return Err(VmcError::InvalidConfig("estimator.clip_width must be positive".into()));
        }
        if !(self.clip_quantile > 0.0 && self.clip_quantile <= 1.0) {
            return Err(VmcError::InvalidConfig(
                "estimator.clip_quantile must lie in (0, 1]".into(),
            ));
        }
        if let Some(width) = self.exclude_width {
            if !(width > 0.0) {
                return Err(VmcError::InvalidConfig(
                    "estimator.exclude_width must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Statistics of the raw finite local energies.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct EnergyStats {
    pub mean: f64,
    pub variance: f64,
    pub std_error: f64,
    pub min: f64,
    pub max: f64,
    pub n_samples: usize,
    pub n_excluded: usize,
    pub n_nonfinite: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradientEstimate {
    /// `∂E/∂θ` over the flat parameter vector.
    pub gradient: Vec<f64>,
    pub energy: EnergyStats,
    /// Indices of the samples that entered the gradient.
    pub kept: Vec<usize>,
    /// Treated energies of the kept samples minus their mean.
    pub centered_energies: Vec<f64>,
}

/// `sgn(x) log(1 + (|x| + x²/2 + |x|³)/(1 + x²))`, linear near zero and
/// logarithmic in the tails.
pub fn log_squeeze(x: f64) -> f64 {
    let a = x.abs();
    x.signum() * ((a + 0.5 * a * a + a * a * a) / (1.0 + a * a)).ln_1p()
}

/// Quantile with linear interpolation between order statistics.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

pub fn median(values: &[f64]) -> f64 {
    quantile(values, 0.5)
}

pub struct GradientEstimator {
    config: EstimatorConfig,
}

impl GradientEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Combine per-walker samples into an energy gradient.
    ///
    /// `n_params` sizes the gradient when no sample survives.
    pub fn estimate(&self, samples: &[LocalEnergySample], n_params: usize) -> GradientEstimate {
        let finite: Vec<usize> = (0..samples.len()).filter(|&i| samples[i].is_finite()).collect();
        let n_nonfinite = samples.len() - finite.len();
        let energies: Vec<f64> = finite.iter().map(|&i| samples[i].energy.total).collect();

        let med = median(&energies);
        let deviations: Vec<f64> = energies.iter().map(|e| (e - med).abs()).collect();
        let scale = quantile(&deviations, self.config.clip_quantile);
        let spread = scale.is_finite() && scale > 0.0;

        let mut kept = Vec::with_capacity(finite.len());
        let mut treated = Vec::with_capacity(finite.len());
        for (k, &i) in finite.iter().enumerate() {
            let e = energies[k];
            if let (Some(width), true) = (self.config.exclude_width, spread) {
                if deviations[k] / scale >= width {
                    continue;
                }
            }
            kept.push(i);
            treated.push(if spread { self.treat(e, med, scale) } else { e });
        }
        let n_excluded = finite.len() - kept.len();
        if n_excluded > 0 || n_nonfinite > 0 {
            tracing::warn!(n_excluded, n_nonfinite, "dropped local energy samples");
        }

        let baseline = if treated.is_empty() {
            0.0
        } else {
            treated.iter().sum::<f64>() / treated.len() as f64
        };
        let centered: Vec<f64> = treated.iter().map(|e| e - baseline).collect();

        let mut gradient = vec![0.0; n_params];
        for (&i, &de) in kept.iter().zip(&centered) {
            for (g, &d) in gradient.iter_mut().zip(&samples[i].log_psi_grad) {
                *g += de * d;
            }
        }
        if !kept.is_empty() {
            let factor = 2.0 / kept.len() as f64;
            gradient.iter_mut().for_each(|g| *g *= factor);
        }

        GradientEstimate {
            gradient,
            energy: energy_stats(&energies, n_excluded, n_nonfinite),
            kept,
            centered_energies: centered,
        }
    }

    fn treat(&self, e: f64, med: f64, scale: f64) -> f64 {
        let width = self.config.clip_width * scale;
        match self.config.clip_mode {
            ClipMode::None => e,
            ClipMode::Clamp => e.clamp(med - width, med + width),
            ClipMode::LogSqueeze => med + 2.0 * width * log_squeeze((e - med) / (2.0 * width)),
        }
    }
}

fn energy_stats(energies: &[f64], n_excluded: usize, n_nonfinite: usize) -> EnergyStats {
    let n = energies.len();
    let mean = if n == 0 { f64::NAN } else { energies.iter().sum::<f64>() / n as f64 };
    let variance = if n == 0 {
        f64::NAN
    } else {
        energies.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n as f64
    };
    EnergyStats {
        mean,
        variance,
        std_error: (variance / n as f64).sqrt(),
        min: energies.iter().copied().fold(f64::INFINITY, f64::min),
        max: energies.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        n_samples: n,
        n_excluded,
        n_nonfinite,
    }
}
