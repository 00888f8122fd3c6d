//! End-to-end physics checks across sampler, estimator, optimizer and trainer.

use approx::assert_relative_eq;
use nalgebra::Vector3;

use crate::estimator::{evaluate_batch, ClipMode, EstimatorConfig, GradientEstimator};
use crate::hamiltonian::{Hamiltonian, HarmonicTrap, MolecularHamiltonian};
use crate::optimizer::{KfacConfig, OptimizerConfig, SrConfig};
use crate::sampling::{MetropolisSampler, SamplerConfig, WalkerBatch};
use crate::systems::Molecule;
use crate::training::{Checkpointer, MemorySink, StopSignal, Trainer, TrainingConfig};
use crate::wavefunction::{Ansatz, GaussianAnsatz, HydrogenicAnsatz, NeuralAnsatz, NeuralAnsatzConfig};

fn origin_walkers(n_walkers: usize, n_electrons: usize, seed: u64) -> WalkerBatch {
    let configs = (0..n_walkers)
        .map(|k| {
            (0..3 * n_electrons)
                .map(|c| 0.3 * (((k * 7 + c * 3) % 11) as f64 / 11.0 - 0.5))
                .collect()
        })
        .collect();
    WalkerBatch::new(configs, seed, 0.5)
}

#[test]
fn test_gaussian_stationary_distribution() {
    // |ψ|² = exp(-2a r²): every coordinate has variance 1/(4a)
    let a = 0.8;
    let ansatz = GaussianAnsatz::new(1, 0, a);
    let sampler = MetropolisSampler::new(SamplerConfig {
        n_walkers: 200,
        n_burn_in: 200,
        n_decorrelate: 4,
        ..Default::default()
    });
    let mut batch = origin_walkers(200, 1, 42);
    sampler.equilibrate(&mut batch, &ansatz, &[a]);

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0usize;
    for _ in 0..50 {
        sampler.sample(&mut batch, &ansatz, &[a]);
        for w in &batch.walkers {
            for &x in &w.r {
                sum += x;
                sum_sq += x * x;
                n += 1;
            }
        }
    }
    let mean = sum / n as f64;
    let variance = sum_sq / n as f64 - mean * mean;
    assert!(mean.abs() < 0.03, "mean {mean}");
    assert_relative_eq!(variance, 1.0 / (4.0 * a), max_relative = 0.08);
    assert!(batch.acceptance() > 0.3 && batch.acceptance() < 0.85);
}

#[test]
fn test_hydrogen_exact_state_has_zero_variance() {
    let molecule = Molecule::from_name("H").unwrap();
    let hamiltonian = MolecularHamiltonian::new(&molecule);
    let ansatz = HydrogenicAnsatz::new(Vector3::zeros(), 1, 0, 1.0);
    let sampler = MetropolisSampler::new(SamplerConfig { n_walkers: 64, n_burn_in: 50, ..Default::default() });
    let mut batch = WalkerBatch::from_molecule(&molecule, 64, 1.0, 3, 0.5);
    sampler.equilibrate(&mut batch, &ansatz, &[1.0]);
    sampler.sample(&mut batch, &ansatz, &[1.0]);

    let samples = evaluate_batch(&hamiltonian, &ansatz, &[1.0], &batch, false);
    for s in &samples {
        assert_relative_eq!(s.energy.total, -0.5, epsilon = 1e-10);
    }
    let estimate = GradientEstimator::new(EstimatorConfig::default()).estimate(&samples, 1);
    assert_relative_eq!(estimate.energy.mean, -0.5, epsilon = 1e-10);
    assert!(estimate.energy.variance < 1e-18);
    assert_eq!(estimate.energy.n_excluded, 0);
    assert!(estimate.gradient[0].abs() < 1e-8);
}

#[test]
fn test_local_energy_is_invariant_under_exchange() {
    let molecule = Molecule::from_name("Li").unwrap();
    let config = NeuralAnsatzConfig {
        embedding_dim: 8,
        kernel_dim: 8,
        dist_feat_dim: 4,
        n_interactions: 1,
        n_determinants: 2,
        ..Default::default()
    };
    let ansatz = NeuralAnsatz::new(&molecule, config, None).unwrap();
    let params = ansatz.init_params(&mut rand::thread_rng());
    let hamiltonian = MolecularHamiltonian::new(&molecule);

    let r = [0.3, -0.2, 0.1, -0.5, 0.4, 0.2, 1.1, 0.7, -0.9];
    let mut swapped = r;
    for c in 0..3 {
        swapped.swap(c, 3 + c);
    }
    let base = ansatz.log_psi(params.values(), &r);
    let exchanged = ansatz.log_psi(params.values(), &swapped);
    assert_relative_eq!(exchanged.log_abs, base.log_abs, epsilon = 1e-10);
    assert_eq!(exchanged.sign, -base.sign);

    let e = hamiltonian.local_energy(&ansatz, params.values(), &r);
    let e_swapped = hamiltonian.local_energy(&ansatz, params.values(), &swapped);
    assert_relative_eq!(e.total, e_swapped.total, epsilon = 1e-8, max_relative = 1e-8);
}

#[test]
fn test_gradient_estimate_is_unbiased() {
    // E(a) = 3a/2 + 3/(8a) for one electron in a unit trap: dE/da = 9/8 at a = 1
    let ansatz = GaussianAnsatz::new(1, 0, 1.0);
    let hamiltonian = HarmonicTrap::new(1.0);
    let sampler = MetropolisSampler::new(SamplerConfig {
        n_walkers: 1024,
        n_burn_in: 100,
        n_decorrelate: 4,
        ..Default::default()
    });
    let estimator = GradientEstimator::new(EstimatorConfig { clip_mode: ClipMode::None, ..Default::default() });
    let mut batch = origin_walkers(1024, 1, 9);
    sampler.equilibrate(&mut batch, &ansatz, &[1.0]);

    let n_batches = 40;
    let mut gradient = 0.0;
    let mut energy = 0.0;
    for _ in 0..n_batches {
        sampler.sample(&mut batch, &ansatz, &[1.0]);
        let samples = evaluate_batch(&hamiltonian, &ansatz, &[1.0], &batch, false);
        let estimate = estimator.estimate(&samples, 1);
        gradient += estimate.gradient[0] / n_batches as f64;
        energy += estimate.energy.mean / n_batches as f64;
    }
    assert_relative_eq!(energy, 1.875, epsilon = 0.04);
    assert_relative_eq!(gradient, 1.125, epsilon = 0.1);
}

fn trap_trainer() -> Trainer<GaussianAnsatz, HarmonicTrap> {
    Trainer::new(
        GaussianAnsatz::new(1, 1, 0.8),
        HarmonicTrap::new(1.0),
        SamplerConfig { n_walkers: 32, n_burn_in: 20, n_decorrelate: 2, ..Default::default() },
        EstimatorConfig::default(),
        OptimizerConfig::Kfac(KfacConfig::default().with_learning_rate(0.1)),
    )
}

#[test]
fn test_checkpoint_resume_reproduces_trajectory() {
    let dir = tempfile::tempdir().unwrap();
    let checkpointer = Checkpointer::new(dir.path()).unwrap();
    let trainer = trap_trainer();
    let stop = StopSignal::new();

    let state = trainer.initialize(origin_walkers(32, 2, 5), 5);
    let first = TrainingConfig { steps: 3, checkpoint_every: 0, ..Default::default() };
    let state = trainer.train(state, &first, &mut MemorySink::default(), Some(&checkpointer), &stop).unwrap();
    let path = checkpointer.latest().unwrap().unwrap();

    let rest = TrainingConfig { steps: 6, checkpoint_every: 0, ..Default::default() };
    let mut uninterrupted = MemorySink::default();
    let direct = trainer.train(state, &rest, &mut uninterrupted, None, &stop).unwrap();

    let restored = Checkpointer::load(&path).unwrap();
    let mut resumed = MemorySink::default();
    let replayed = trainer.train(restored, &rest, &mut resumed, None, &stop).unwrap();

    assert_eq!(uninterrupted.records.len(), 3);
    assert_eq!(resumed.records, uninterrupted.records);
    assert_eq!(replayed, direct);
}

#[test]
fn test_training_lowers_helium_energy() {
    // for ψ = exp(-ζ(r1 + r2)), E(ζ) = ζ² - 27ζ/8 with its minimum at ζ = 27/16
    let molecule = Molecule::from_name("He").unwrap();
    let trainer = Trainer::new(
        HydrogenicAnsatz::new(Vector3::zeros(), 1, 1, 1.0),
        MolecularHamiltonian::new(&molecule),
        SamplerConfig { n_walkers: 128, n_burn_in: 50, n_decorrelate: 2, ..Default::default() },
        EstimatorConfig::default(),
        OptimizerConfig::Sr(SrConfig::default().with_learning_rate(0.2)),
    );
    let walkers = WalkerBatch::from_molecule(&molecule, 128, 1.0, 17, 0.5);
    let state = trainer.initialize(walkers, 17);
    let before = trainer.evaluate(&state, 20);

    let config = TrainingConfig { steps: 40, checkpoint_every: 0, ..Default::default() };
    let mut sink = MemorySink::default();
    let state = trainer.train(state, &config, &mut sink, None, &StopSignal::new()).unwrap();
    let after = trainer.evaluate(&state, 20);

    let zeta = state.params.values()[0];
    assert!((1.55..1.85).contains(&zeta), "zeta {zeta}");
    assert!(after.energy.mean < before.energy.mean);
    assert!(after.energy.mean < -2.75, "energy {}", after.energy.mean);
    assert!(sink.records.iter().all(|m| !m.diverged));
}

#[test]
fn test_neural_helium_kfac_training_is_stable() {
    let molecule = Molecule::from_name("He").unwrap();
    let config = NeuralAnsatzConfig {
        embedding_dim: 8,
        kernel_dim: 8,
        dist_feat_dim: 4,
        n_interactions: 1,
        n_determinants: 2,
        ..Default::default()
    };
    let trainer = Trainer::new(
        NeuralAnsatz::new(&molecule, config, None).unwrap(),
        MolecularHamiltonian::new(&molecule),
        SamplerConfig { n_walkers: 64, n_burn_in: 50, n_decorrelate: 2, ..Default::default() },
        EstimatorConfig::default(),
        OptimizerConfig::Kfac(KfacConfig::default()),
    );
    let walkers = WalkerBatch::from_molecule(&molecule, 64, 1.0, 23, 0.5);
    let state = trainer.initialize(walkers, 23);

    let config = TrainingConfig { steps: 40, checkpoint_every: 0, ..Default::default() };
    let mut sink = MemorySink::default();
    let state = trainer.train(state, &config, &mut sink, None, &StopSignal::new()).unwrap();
    assert!(state.params.values().iter().all(|p| p.is_finite()));

    let energies: Vec<f64> = sink.records.iter().map(|m| m.energy.mean).collect();
    assert_eq!(energies.len(), 40);
    assert!(energies.iter().all(|e| e.is_finite()), "{energies:?}");
    assert!(sink.records.iter().all(|m| !m.diverged && m.optimizer.update_norm.is_finite()));

    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let (first, last) = (mean(&energies[..10]), mean(&energies[30..]));
    assert!(last <= first + 0.1, "first window {first}, last window {last}");
    assert!(last < -2.0, "last window {last}");
}
