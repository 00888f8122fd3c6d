//! YAML run configuration.
//!
//! ```yaml
//! system:
//!   name: LiH
//! ansatz:
//!   kind: neural
//!   n_determinants: 8
//! optimizer:
//!   kind: kfac
//!   learning_rate: 0.02
//! training:
//!   steps: 2000
//!   checkpoint_dir: runs/lih
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::estimator::EstimatorConfig;
use crate::optimizer::OptimizerConfig;
use crate::sampling::SamplerConfig;
use crate::systems::Molecule;
use crate::wavefunction::{BaselineOrbitals, NeuralAnsatzConfig};
use super::metrics::DivergenceConfig;

/// The molecule, either a built-in name or explicit nuclei.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub molecule: Option<Molecule>,
    /// Precomputed Hartree-Fock orbitals used as a baseline.
    #[serde(default)]
    pub baseline: Option<BaselineOrbitals>,
}

impl SystemConfig {
    pub fn molecule(&self) -> Result<Molecule> {
        match (&self.name, &self.molecule) {
            (Some(name), None) => Molecule::from_name(name),
            (None, Some(molecule)) => {
                molecule.validate()?;
                Ok(molecule.clone())
            }
            (Some(_), Some(_)) => Err(VmcError::InvalidConfig(
                "system.name and system.molecule are mutually exclusive".into(),
            )),
            (None, None) => Err(VmcError::InvalidConfig(
                "either system.name or system.molecule is required".into(),
            )),
        }
    }
}

fn default_zeta() -> f64 {
    1.0
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnsatzConfig {
    Neural(NeuralAnsatzConfig),
    /// Single-center exponential orbitals, for atoms with at most one
    /// electron per spin.
    Hydrogenic {
        #[serde(default = "default_zeta")]
        zeta: f64,
    },
}

impl Default for AnsatzConfig {
    fn default() -> Self {
        AnsatzConfig::Neural(NeuralAnsatzConfig::default())
    }
}

impl AnsatzConfig {
    pub fn validate(&self, molecule: &Molecule) -> Result<()> {
        match self {
            AnsatzConfig::Neural(config) => config.validate(),
            AnsatzConfig::Hydrogenic { zeta } => {
                if !(*zeta > 0.0) {
                    return Err(VmcError::InvalidConfig("ansatz.zeta must be positive".into()));
                }
                if molecule.n_nuclei() != 1 || molecule.n_up() > 1 || molecule.n_down() > 1 {
                    return Err(VmcError::InvalidConfig(
                        "the hydrogenic ansatz needs one nucleus and at most one electron per spin"
                            .into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn default_steps() -> u64 {
    1000
}

fn default_checkpoint_every() -> u64 {
    100
}

fn default_eval_steps() -> usize {
    100
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Total number of optimizer iterations.
    #[serde(default = "default_steps")]
    pub steps: u64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Iterations between checkpoints; 0 saves only at the end.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: u64,
    /// JSON-lines metrics file.
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
    #[serde(default)]
    pub divergence: DivergenceConfig,
    /// Production steps of the final fixed-parameter evaluation.
    #[serde(default = "default_eval_steps")]
    pub eval_steps: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            seed: 0,
            checkpoint_dir: None,
            checkpoint_every: default_checkpoint_every(),
            metrics_path: None,
            divergence: DivergenceConfig::default(),
            eval_steps: default_eval_steps(),
        }
    }
}

/// Complete description of a run, validated once at startup.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RunConfig {
    pub system: SystemConfig,
    #[serde(default)]
    pub ansatz: AnsatzConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: RunConfig = serde_yaml::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: RunConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let molecule = self.system.molecule()?;
        if let Some(baseline) = &self.system.baseline {
            if !matches!(self.ansatz, AnsatzConfig::Neural(_)) {
                return Err(VmcError::InvalidConfig(
                    "baseline orbitals are only used by the neural ansatz".into(),
                ));
            }
            baseline.validate(molecule.n_up().max(molecule.n_down()))?;
        }
        self.ansatz.validate(&molecule)?;
        self.sampler.validate()?;
        self.estimator.validate()?;
        self.optimizer.validate()?;
        self.training.divergence.validate()
    }
}
