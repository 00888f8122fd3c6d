//! Wavefunction module - trial wavefunctions and their building blocks.
//!
//! Every ansatz is written once, generically over [`crate::autodiff::Scalar`],
//! and evaluated with plain `f64` for sampling, with dual numbers for the
//! kinetic energy and on burn's autodiff graph for parameter gradients.

mod analytic;
mod basis;
mod determinant;
mod jastrow;
mod layers;
mod network;
mod params;
mod traits;

pub use analytic::{GaussianAnsatz, HydrogenicAnsatz};
pub use basis::{BaselineOrbitals, GaussianShell, ShellKind};
pub use determinant::{signed_logsumexp, slogdet};
pub use jastrow::{distance, CuspJastrow};
pub use layers::{log_spaced_dims, Dense, DistanceBasis, Mlp};
pub use network::{NeuralAnsatz, NeuralAnsatzConfig};
pub use params::{BlockKind, ParamBlock, ParamLayout, Parameters};
pub use traits::{constants, Ansatz, LayerObserver, LogPsi, NoObserver};
