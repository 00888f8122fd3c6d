//! Metropolis sampling of |ψ|² for variational Monte Carlo.
//!
//! All walkers move in parallel, each with its own RNG stream, so a run is
//! reproducible from its seed regardless of the thread count.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::wavefunction::Ansatz;
use super::walkers::WalkerBatch;

fn default_n_walkers() -> usize {
    256
}
fn default_initial_step_size() -> f64 {
    0.5
}
fn default_min_step_size() -> f64 {
    0.01
}
fn default_max_step_size() -> f64 {
    2.0
}
fn default_target_acceptance() -> f64 {
    0.57
}
fn default_adaptation_interval() -> usize {
    10
}
fn default_n_burn_in() -> usize {
    100
}
fn default_n_decorrelate() -> usize {
    4
}
fn default_init_width() -> f64 {
    1.0
}

/// Parameters of the Metropolis sampler.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    #[serde(default = "default_n_walkers")]
    pub n_walkers: usize,
    #[serde(default = "default_initial_step_size")]
    pub initial_step_size: f64,
    #[serde(default = "default_min_step_size")]
    pub min_step_size: f64,
    #[serde(default = "default_max_step_size")]
    pub max_step_size: f64,
    #[serde(default = "default_target_acceptance")]
    pub target_acceptance: f64,
    /// Sweeps between step size adaptations.
    #[serde(default = "default_adaptation_interval")]
    pub adaptation_interval: usize,
    #[serde(default = "default_n_burn_in")]
    pub n_burn_in: usize,
    /// Extra sweeps after each parameter update.
    #[serde(default)]
    pub n_burn_in_after_update: usize,
    /// Sweeps discarded between production samples.
    #[serde(default = "default_n_decorrelate")]
    pub n_decorrelate: usize,
    /// Width of the initial electron clouds around the nuclei.
    #[serde(default = "default_init_width")]
    pub init_width: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            n_walkers: default_n_walkers(),
            initial_step_size: default_initial_step_size(),
            min_step_size: default_min_step_size(),
            max_step_size: default_max_step_size(),
            target_acceptance: default_target_acceptance(),
            adaptation_interval: default_adaptation_interval(),
            n_burn_in: default_n_burn_in(),
            n_burn_in_after_update: 0,
            n_decorrelate: default_n_decorrelate(),
            init_width: default_init_width(),
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_walkers == 0 {
            return Err(VmcError::InvalidConfig("sampler.n_walkers must be positive".into()));
        }
        if !(self.min_step_size > 0.0 && self.min_step_size <= self.max_step_size) {
            return Err(VmcError::InvalidConfig(format!(
                "sampler step bounds [{}, {}] are invalid",
                self.min_step_size, self.max_step_size
            )));
        }
        if !(self.min_step_size..=self.max_step_size).contains(&self.initial_step_size) {
            return Err(VmcError::InvalidConfig(format!(
                "sampler.initial_step_size {} is outside [{}, {}]",
                self.initial_step_size, self.min_step_size, self.max_step_size
            )));
        }
        if !(self.target_acceptance > 0.0 && self.target_acceptance < 1.0) {
            return Err(VmcError::InvalidConfig(
                "sampler.target_acceptance must lie in (0, 1)".into(),
            ));
        }
        if self.adaptation_interval == 0 {
            return Err(VmcError::InvalidConfig(
                "sampler.adaptation_interval must be positive".into(),
            ));
        }
        if !(self.init_width > 0.0) {
            return Err(VmcError::InvalidConfig("sampler.init_width must be positive".into()));
        }
        Ok(())
    }
}

/// Acceptance and step size of one production sample.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    pub acceptance: f64,
    pub step_size: f64,
    pub sweeps: usize,
}

/// Metropolis sampler with an adaptive Gaussian proposal.
#[derive(Debug, Clone)]
pub struct MetropolisSampler {
    config: SamplerConfig,
}

impl MetropolisSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Move every walker once. Returns accepted and proposed counts.
    pub fn sweep<A: Ansatz>(&self, batch: &mut WalkerBatch, ansatz: &A, params: &[f64]) -> (u64, u64) {
        let step_size = batch.step_size;
        let accepted = batch
            .walkers
            .par_iter_mut()
            .map(|w| w.step(ansatz, params, step_size) as u64)
            .sum::<u64>();
        let proposed = batch.len() as u64;

        batch.sweeps += 1;
        batch.window_accepted += accepted;
        batch.window_proposed += proposed;
        batch.window_sweeps += 1;
        if batch.window_sweeps >= self.config.adaptation_interval {
            self.adapt_step_size(batch);
        }
        (accepted, proposed)
    }

    /// Adapt the step size to achieve the target acceptance rate.
    fn adapt_step_size(&self, batch: &mut WalkerBatch) {
        let acceptance = if batch.window_proposed == 0 {
            0.0
        } else {
            batch.window_accepted as f64 / batch.window_proposed as f64
        };
        let adjustment = (acceptance / self.config.target_acceptance).sqrt();
        let old = batch.step_size;
        batch.step_size = (old * adjustment)
            .clamp(self.config.min_step_size, self.config.max_step_size);
        tracing::debug!(
            acceptance,
            old_step = old,
            new_step = batch.step_size,
            "adapted step size"
        );
        batch.window_accepted = 0;
        batch.window_proposed = 0;
        batch.window_sweeps = 0;
    }

    /// Run `n` sweeps without producing samples.
    pub fn burn_in<A: Ansatz>(&self, batch: &mut WalkerBatch, ansatz: &A, params: &[f64], n: usize) {
        for _ in 0..n {
            self.sweep(batch, ansatz, params);
        }
    }

    /// Cache amplitudes of fresh walkers and equilibrate them.
    pub fn equilibrate<A: Ansatz>(&self, batch: &mut WalkerBatch, ansatz: &A, params: &[f64]) {
        batch.refresh(ansatz, params);
        self.burn_in(batch, ansatz, params, self.config.n_burn_in);
        tracing::debug!(
            sweeps = self.config.n_burn_in,
            step_size = batch.step_size,
            acceptance = batch.acceptance(),
            "burn-in finished"
        );
    }

    /// Advance the walkers to the next production sample.
    ///
    /// Pending re-equilibration after a parameter update is performed first.
    pub fn sample<A: Ansatz>(&self, batch: &mut WalkerBatch, ansatz: &A, params: &[f64]) -> SampleStats {
        if batch.needs_reequilibration {
            self.burn_in(batch, ansatz, params, self.config.n_burn_in_after_update);
            batch.needs_reequilibration = false;
        }
        let sweeps = self.config.n_decorrelate + 1;
        let (mut accepted, mut proposed) = (0, 0);
        for _ in 0..sweeps {
            let (a, p) = self.sweep(batch, ansatz, params);
            accepted += a;
            proposed += p;
        }
        SampleStats {
            acceptance: if proposed == 0 { 0.0 } else { accepted as f64 / proposed as f64 },
            step_size: batch.step_size,
            sweeps,
        }
    }

    /// Recompute cached amplitudes after a parameter update.
    pub fn after_update<A: Ansatz>(&self, batch: &mut WalkerBatch, ansatz: &A, params: &[f64]) {
        batch.refresh(ansatz, params);
        batch.needs_reequilibration = self.config.n_burn_in_after_update > 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavefunction::GaussianAnsatz;
    use approx::assert_relative_eq;

    fn gaussian_batch(n_walkers: usize, seed: u64) -> WalkerBatch {
        WalkerBatch::new(vec![vec![0.0; 3]; n_walkers], seed, 0.5)
    }

    #[test]
    fn test_config_defaults_are_valid() {
        assert!(SamplerConfig::default().validate().is_ok());
        let bad = SamplerConfig { target_acceptance: 1.5, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = SamplerConfig { initial_step_size: 10.0, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_step_size_adapts_within_bounds() {
        let config = SamplerConfig {
            n_walkers: 16,
            max_step_size: 50.0,
            initial_step_size: 40.0,
            n_burn_in: 50,
            ..Default::default()
        };
        let sampler = MetropolisSampler::new(config.clone());
        let ansatz = GaussianAnsatz::new(1, 0, 1.0);
        let mut batch = WalkerBatch::new(vec![vec![0.0; 3]; 16], 3, config.initial_step_size);
        sampler.equilibrate(&mut batch, &ansatz, &[1.0]);
        // huge steps are almost always rejected, so the step must shrink
        assert!(batch.step_size < 40.0);
        assert!(batch.step_size >= config.min_step_size);
        assert_eq!(batch.sweeps, 50);
    }

    #[test]
    fn test_sampling_is_reproducible() {
        let sampler = MetropolisSampler::new(SamplerConfig { n_burn_in: 5, ..Default::default() });
        let ansatz = GaussianAnsatz::new(1, 0, 0.7);
        let mut a = gaussian_batch(8, 11);
        let mut b = gaussian_batch(8, 11);
        for batch in [&mut a, &mut b] {
            sampler.equilibrate(batch, &ansatz, &[0.7]);
            sampler.sample(batch, &ansatz, &[0.7]);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_after_update_flags_reequilibration() {
        let config = SamplerConfig { n_burn_in: 0, n_burn_in_after_update: 3, n_decorrelate: 0, ..Default::default() };
        let sampler = MetropolisSampler::new(config);
        let ansatz = GaussianAnsatz::new(1, 0, 1.0);
        let mut batch = gaussian_batch(4, 5);
        sampler.equilibrate(&mut batch, &ansatz, &[1.0]);
        sampler.after_update(&mut batch, &ansatz, &[0.9]);
        assert!(batch.needs_reequilibration);
        for w in &batch.walkers {
            assert_relative_eq!(w.log_psi, ansatz.log_psi(&[0.9], &w.r).log_abs);
        }
        let stats = sampler.sample(&mut batch, &ansatz, &[0.9]);
        assert!(!batch.needs_reequilibration);
        assert_eq!(stats.sweeps, 1);
        assert_eq!(batch.sweeps, 4);
    }
}
