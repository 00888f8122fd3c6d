//! The training loop: sample, evaluate, estimate, update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::estimator::{evaluate_batch, EstimatorConfig, GradientEstimator};
use crate::hamiltonian::Hamiltonian;
use crate::optimizer::{Optimizer, OptimizerConfig, OptimizerState};
use crate::sampling::{MetropolisSampler, SamplerConfig, SeriesStats, WalkerBatch};
use crate::wavefunction::{Ansatz, Parameters};
use super::checkpoint::Checkpointer;
use super::config::TrainingConfig;
use super::metrics::{DivergenceMonitor, MetricsSink, StepMetrics};

/// Everything that changes between iterations. This is what a checkpoint holds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainState {
    /// Completed iterations.
    pub step: u64,
    pub params: Parameters,
    pub optimizer: OptimizerState,
    pub walkers: WalkerBatch,
}

/// Cooperative stop request, checked between iterations.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the first request only.
    pub fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of fixed-parameter VMC.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Statistics of the per-step batch mean energies.
    pub energy: SeriesStats,
    pub acceptance: f64,
    pub n_nonfinite: usize,
}

/// Immutable pieces of a training run.
pub struct Trainer<A: Ansatz, H: Hamiltonian> {
    ansatz: A,
    hamiltonian: H,
    sampler: MetropolisSampler,
    estimator: GradientEstimator,
    optimizer: Optimizer,
}

impl<A: Ansatz, H: Hamiltonian> Trainer<A, H> {
    pub fn new(
        ansatz: A,
        hamiltonian: H,
        sampler: SamplerConfig,
        estimator: EstimatorConfig,
        optimizer: OptimizerConfig,
    ) -> Self {
        Self {
            ansatz,
            hamiltonian,
            sampler: MetropolisSampler::new(sampler),
            estimator: GradientEstimator::new(estimator),
            optimizer: Optimizer::new(optimizer),
        }
    }

    pub fn ansatz(&self) -> &A {
        &self.ansatz
    }

    pub fn sampler(&self) -> &MetropolisSampler {
        &self.sampler
    }

    /// Fresh parameters from `seed` and equilibrated walkers.
    pub fn initialize(&self, mut walkers: WalkerBatch, seed: u64) -> TrainState {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let params = self.ansatz.init_params(&mut rng);
        self.sampler.equilibrate(&mut walkers, &self.ansatz, params.values());
        let optimizer = self.optimizer.init(params.layout());
        TrainState { step: 0, params, optimizer, walkers }
    }

    /// Check that a restored state belongs to this ansatz and optimizer.
    pub fn check_state(&self, state: &TrainState) -> Result<()> {
        if state.params.layout() != self.ansatz.layout() {
            return Err(VmcError::InvalidConfig(
                "checkpoint parameters do not match the configured ansatz".into(),
            ));
        }
        if state.optimizer.name() != self.optimizer.config().name() {
            return Err(VmcError::InvalidConfig(format!(
                "checkpoint holds {} optimizer state, configuration selects {}",
                state.optimizer.name(),
                self.optimizer.config().name()
            )));
        }
        if let Some(w) = state.walkers.walkers.first() {
            if w.r.len() != 3 * self.ansatz.n_electrons() {
                return Err(VmcError::InvalidConfig(
                    "checkpoint walkers do not match the number of electrons".into(),
                ));
            }
        }
        Ok(())
    }

    /// One iteration: Sample → Evaluate → Estimate → Update → refresh walkers.
    pub fn iterate(&self, mut state: TrainState) -> Result<(TrainState, StepMetrics)> {
        let sampler = self.sampler.sample(&mut state.walkers, &self.ansatz, state.params.values());
        let samples = evaluate_batch(
            &self.hamiltonian,
            &self.ansatz,
            state.params.values(),
            &state.walkers,
            self.optimizer.needs_layer_stats(),
        );
        let estimate = self.estimator.estimate(&samples, state.params.len());
        let (params, optimizer) =
            self.optimizer
                .step(&mut state.optimizer, &state.params, &estimate, &samples)?;
        self.sampler.after_update(&mut state.walkers, &self.ansatz, params.values());
        state.params = params;
        state.step += 1;

        let metrics = StepMetrics {
            step: state.step,
            energy: estimate.energy,
            sampler,
            optimizer,
            diverged: false,
        };
        Ok((state, metrics))
    }

    /// Iterate until `config.steps` iterations are done or `stop` is raised.
    ///
    /// Checkpoints every `checkpoint_every` iterations and once at the end.
    pub fn train(
        &self,
        mut state: TrainState,
        config: &TrainingConfig,
        sink: &mut dyn MetricsSink,
        checkpointer: Option<&Checkpointer>,
        stop: &StopSignal,
    ) -> Result<TrainState> {
        let mut monitor = DivergenceMonitor::new(config.divergence.clone());
        let mut saved_step = None;
        tracing::info!(
            from = state.step,
            to = config.steps,
            walkers = state.walkers.len(),
            params = state.params.len(),
            "training started"
        );

        while state.step < config.steps {
            if stop.is_raised() {
                tracing::info!(step = state.step, "stop requested");
                break;
            }
            let (next, mut metrics) = self.iterate(state)?;
            state = next;

            metrics.diverged = monitor.observe(metrics.energy.mean);
            if metrics.diverged {
                tracing::warn!(step = state.step, energy = metrics.energy.mean, "energy diverged");
            }
            sink.record(&metrics)?;
            if metrics.diverged && config.divergence.fatal {
                sink.flush()?;
                return Err(VmcError::Diverged { step: state.step, energy: metrics.energy.mean });
            }

            if let Some(checkpointer) = checkpointer {
                if config.checkpoint_every > 0 && state.step % config.checkpoint_every == 0 {
                    checkpointer.save(&state)?;
                    saved_step = Some(state.step);
                }
            }
        }

        sink.flush()?;
        if let Some(checkpointer) = checkpointer {
            if saved_step != Some(state.step) {
                checkpointer.save(&state)?;
            }
        }
        tracing::info!(step = state.step, "training finished");
        Ok(state)
    }

    /// Fixed-parameter VMC over `n_steps` production samples.
    ///
    /// Works on a copy of the walkers; `state` is left untouched.
    pub fn evaluate(&self, state: &TrainState, n_steps: usize) -> Evaluation {
        let params = state.params.values();
        let mut walkers = state.walkers.clone();
        let mut series = Vec::with_capacity(n_steps);
        let mut acceptance = 0.0;
        let mut n_nonfinite = 0;

        for _ in 0..n_steps {
            let stats = self.sampler.sample(&mut walkers, &self.ansatz, params);
            acceptance += stats.acceptance;
            let configs = walkers.configurations();
            let energies = self.hamiltonian.local_energies(&self.ansatz, params, &configs);
            let finite: Vec<f64> = energies.iter().filter(|e| e.is_finite()).map(|e| e.total).collect();
            n_nonfinite += energies.len() - finite.len();
            if !finite.is_empty() {
                series.push(finite.iter().sum::<f64>() / finite.len() as f64);
            }
        }

        let energy = SeriesStats::from_series(&series);
        tracing::info!(
            energy = energy.mean,
            error = energy.error,
            autocorrelation_time = energy.autocorrelation_time,
            "evaluation finished"
        );
        Evaluation {
            energy,
            acceptance: if n_steps == 0 { 0.0 } else { acceptance / n_steps as f64 },
            n_nonfinite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hamiltonian::HarmonicTrap;
    use crate::optimizer::{AdamConfig, SrConfig};
    use crate::training::metrics::MemorySink;
    use crate::wavefunction::GaussianAnsatz;
    use approx::assert_relative_eq;

    fn trap_trainer(optimizer: OptimizerConfig) -> Trainer<GaussianAnsatz, HarmonicTrap> {
        let sampler = SamplerConfig { n_walkers: 64, n_burn_in: 20, n_decorrelate: 1, ..Default::default() };
        Trainer::new(
            GaussianAnsatz::new(1, 1, 1.0),
            HarmonicTrap::new(1.0),
            sampler,
            EstimatorConfig::default(),
            optimizer,
        )
    }

    fn trap_walkers(n: usize, seed: u64) -> WalkerBatch {
        let configs = (0..n).map(|k| vec![0.1 * (k % 7) as f64, -0.05 * (k % 5) as f64, 0.2, 0.0, 0.3, -0.1]).collect();
        WalkerBatch::new(configs, seed, 0.5)
    }

    fn training_config(steps: u64) -> TrainingConfig {
        TrainingConfig { steps, checkpoint_every: 0, ..Default::default() }
    }

    #[test]
    fn test_iterate_advances_state() {
        let trainer = trap_trainer(OptimizerConfig::Adam(AdamConfig::default().with_learning_rate(0.01)));
        let state = trainer.initialize(trap_walkers(64, 1), 1);
        let before = state.params.values()[0];
        let (state, metrics) = trainer.iterate(state).unwrap();
        assert_eq!(state.step, 1);
        assert_eq!(metrics.step, 1);
        assert_eq!(metrics.energy.n_samples, 64);
        assert!(state.params.values()[0] != before);
        // walker caches follow the new parameters
        for w in &state.walkers.walkers {
            assert_relative_eq!(w.log_psi, trainer.ansatz().log_psi(state.params.values(), &w.r).log_abs);
        }
    }

    #[test]
    fn test_stop_signal_halts_training() {
        let trainer = trap_trainer(OptimizerConfig::Sr(SrConfig::default()));
        let state = trainer.initialize(trap_walkers(16, 2), 2);
        let stop = StopSignal::new();
        stop.raise();
        let mut sink = MemorySink::default();
        let state = trainer.train(state, &training_config(10), &mut sink, None, &stop).unwrap();
        assert_eq!(state.step, 0);
        assert!(sink.records.is_empty());
    }

    /// Raises a shared stop signal once a given step is recorded, the way the
    /// Ctrl-C handler does from another thread.
    struct InterruptAt {
        stop: StopSignal,
        step: u64,
    }

    impl MetricsSink for InterruptAt {
        fn record(&mut self, metrics: &StepMetrics) -> Result<()> {
            if metrics.step == self.step {
                let handle = self.stop.clone();
                std::thread::spawn(move || handle.raise()).join().unwrap();
            }
            Ok(())
        }
    }

    #[test]
    fn test_interrupt_mid_run_checkpoints_last_step() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path()).unwrap();
        let trainer = trap_trainer(OptimizerConfig::Sr(SrConfig::default()));
        let state = trainer.initialize(trap_walkers(16, 4), 4);
        let stop = StopSignal::new();
        let mut sink = InterruptAt { stop: stop.clone(), step: 2 };
        let state = trainer
            .train(state, &training_config(10), &mut sink, Some(&checkpointer), &stop)
            .unwrap();
        assert_eq!(state.step, 2);
        assert!(stop.is_raised());
        assert!(!stop.raise());
        assert_eq!(checkpointer.latest().unwrap(), Some(checkpointer.path_for(2)));
        assert_eq!(Checkpointer::load(&checkpointer.path_for(2)).unwrap(), state);
    }

    #[test]
    fn test_train_records_every_step() {
        let trainer = trap_trainer(OptimizerConfig::Sr(SrConfig::default()));
        let state = trainer.initialize(trap_walkers(16, 3), 3);
        let mut sink = MemorySink::default();
        let state = trainer.train(state, &training_config(4), &mut sink, None, &StopSignal::new()).unwrap();
        assert_eq!(state.step, 4);
        let steps: Vec<u64> = sink.records.iter().map(|m| m.step).collect();
        assert_eq!(steps, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_checkpoints_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path()).unwrap();
        let trainer = trap_trainer(OptimizerConfig::Sr(SrConfig::default()));
        let state = trainer.initialize(trap_walkers(8, 4), 4);
        let config = TrainingConfig { steps: 5, checkpoint_every: 2, ..Default::default() };
        trainer
            .train(state, &config, &mut MemorySink::default(), Some(&checkpointer), &StopSignal::new())
            .unwrap();
        for step in [2, 4, 5] {
            assert!(checkpointer.path_for(step).exists());
        }
        assert_eq!(checkpointer.latest().unwrap(), Some(checkpointer.path_for(5)));
    }

    #[test]
    fn test_evaluate_exact_state_has_no_error() {
        // a = ω/2 is the exact ground state: every local energy is 3ω/2 per electron
        let trainer = trap_trainer(OptimizerConfig::default());
        let mut state = trainer.initialize(trap_walkers(16, 5), 5);
        state.params = state.params.with_values(vec![0.5]).unwrap();
        state.walkers.refresh(trainer.ansatz(), state.params.values());
        let eval = trainer.evaluate(&state, 10);
        assert_relative_eq!(eval.energy.mean, 3.0, epsilon = 1e-10);
        assert!(eval.energy.error < 1e-10);
        assert!(eval.acceptance > 0.0);
    }

    #[test]
    fn test_mismatched_checkpoint_is_rejected() {
        let trainer = trap_trainer(OptimizerConfig::Sr(SrConfig::default()));
        let mut state = trainer.initialize(trap_walkers(4, 6), 6);
        assert!(trainer.check_state(&state).is_ok());
        state.optimizer = Optimizer::new(OptimizerConfig::Adam(AdamConfig::default())).init(state.params.layout());
        assert!(trainer.check_state(&state).is_err());
    }
}
