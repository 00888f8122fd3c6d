//! Assembles a trainer from a [`RunConfig`] and drives it to completion.

use std::path::PathBuf;

use crate::error::{Result, VmcError};
use crate::hamiltonian::MolecularHamiltonian;
use crate::sampling::WalkerBatch;
use crate::systems::Molecule;
use crate::wavefunction::{Ansatz, HydrogenicAnsatz, NeuralAnsatz};
use super::checkpoint::Checkpointer;
use super::config::{AnsatzConfig, RunConfig};
use super::metrics::{JsonLinesSink, MetricsSink, TracingSink};
use super::trainer::{Evaluation, StopSignal, Trainer};

/// Overrides and controls supplied by the caller rather than the file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Continue from the latest checkpoint in `training.checkpoint_dir`.
    pub resume: bool,
    pub steps: Option<u64>,
    pub eval_steps: Option<usize>,
    pub stop: StopSignal,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub steps: u64,
    pub n_params: usize,
    pub evaluation: Option<Evaluation>,
    pub checkpoint: Option<PathBuf>,
}

pub fn run(config: &RunConfig, options: &RunOptions) -> Result<RunSummary> {
    config.validate()?;
    let molecule = config.system.molecule()?;
    match &config.ansatz {
        AnsatzConfig::Neural(ansatz) => {
            let ansatz = NeuralAnsatz::new(&molecule, ansatz.clone(), config.system.baseline.clone())?;
            run_with(ansatz, &molecule, config, options)
        }
        AnsatzConfig::Hydrogenic { zeta } => {
            let ansatz = HydrogenicAnsatz::new(molecule.coords[0], molecule.n_up(), molecule.n_down(), *zeta);
            run_with(ansatz, &molecule, config, options)
        }
    }
}

fn run_with<A: Ansatz>(
    ansatz: A,
    molecule: &Molecule,
    config: &RunConfig,
    options: &RunOptions,
) -> Result<RunSummary> {
    let trainer = Trainer::new(
        ansatz,
        MolecularHamiltonian::new(molecule),
        config.sampler.clone(),
        config.estimator.clone(),
        config.optimizer.clone(),
    );
    let checkpointer = config
        .training
        .checkpoint_dir
        .as_ref()
        .map(|dir| Checkpointer::new(dir.clone()))
        .transpose()?;

    let mut training = config.training.clone();
    if let Some(steps) = options.steps {
        training.steps = steps;
    }

    let resumed = if options.resume {
        let checkpointer = checkpointer.as_ref().ok_or_else(|| {
            VmcError::InvalidConfig("resuming requires training.checkpoint_dir".into())
        })?;
        match checkpointer.latest()? {
            Some(path) => {
                let state = Checkpointer::load(&path)?;
                trainer.check_state(&state)?;
                Some(state)
            }
            None => {
                tracing::warn!(dir = %checkpointer.dir().display(), "no checkpoint to resume from, starting fresh");
                None
            }
        }
    } else {
        None
    };
    let state = match resumed {
        Some(state) => state,
        None => {
            let sampler = &config.sampler;
            let walkers = WalkerBatch::from_molecule(
                molecule,
                sampler.n_walkers,
                sampler.init_width,
                training.seed,
                sampler.initial_step_size,
            );
            trainer.initialize(walkers, training.seed)
        }
    };

    let mut sinks: Vec<Box<dyn MetricsSink>> = vec![Box::new(TracingSink)];
    if let Some(path) = &training.metrics_path {
        sinks.push(Box::new(JsonLinesSink::open(path)?));
    }

    let state = trainer.train(state, &training, &mut sinks, checkpointer.as_ref(), &options.stop)?;

    let eval_steps = options.eval_steps.unwrap_or(training.eval_steps);
    let evaluation = (eval_steps > 0).then(|| trainer.evaluate(&state, eval_steps));
    Ok(RunSummary {
        steps: state.step,
        n_params: state.params.len(),
        evaluation,
        checkpoint: checkpointer.map(|c| c.path_for(state.step)),
    })
}
