//! Neural VMC - variational quantum Monte Carlo with neural-network wavefunctions
//!
//! This crate samples electron configurations from |ψ|² with a Metropolis
//! random walk, evaluates local energies with exact automatic
//! differentiation, and minimizes the variational energy with Adam, KFAC or
//! stochastic reconfiguration.

pub mod autodiff;
pub mod error;
pub mod estimator;
pub mod hamiltonian;
pub mod optimizer;
pub mod sampling;
mod serde_float;
pub mod systems;
pub mod training;
pub mod wavefunction;

// Re-export commonly used types at crate root
pub use error::{Result, VmcError};
pub use estimator::{EstimatorConfig, GradientEstimator, LocalEnergySample};
pub use hamiltonian::{Hamiltonian, HarmonicTrap, LocalEnergy, MolecularHamiltonian};
pub use optimizer::{AdamConfig, KfacConfig, Optimizer, OptimizerConfig, SrConfig};
pub use sampling::{MetropolisSampler, SamplerConfig, Walker, WalkerBatch};
pub use systems::Molecule;
pub use training::{Checkpointer, RunConfig, TrainState, Trainer};
pub use wavefunction::{Ansatz, GaussianAnsatz, HydrogenicAnsatz, NeuralAnsatz, NeuralAnsatzConfig, Parameters};

#[cfg(test)]
mod tests;
