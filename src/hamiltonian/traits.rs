//! Hamiltonian trait and local energy evaluation.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::autodiff::{gradient_and_laplacian, Dual2_64};
use crate::wavefunction::{constants, Ansatz, NoObserver};

/// Local energy `E_L = (Hψ)/ψ` split into its kinetic and potential parts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LocalEnergy {
    pub total: f64,
    pub kinetic: f64,
    pub potential: f64,
}

impl LocalEnergy {
    pub fn is_finite(&self) -> bool {
        self.total.is_finite()
    }
}

/// Kinetic energy `−½ Σ (∇² log|ψ| + |∇ log|ψ||²)` from dual-number passes.
pub fn kinetic_energy<A: Ansatz>(ansatz: &A, params: &[f64], r: &[f64]) -> f64 {
    let theta: Vec<Dual2_64> = constants(params);
    let log_psi = gradient_and_laplacian(r, |coords| {
        ansatz.forward(&theta, coords, &mut NoObserver).log_abs
    });
    let grad_sq: f64 = log_psi.gradient.iter().map(|g| g * g).sum();
    -0.5 * (log_psi.laplacian + grad_sq)
}

/// A many-electron Hamiltonian `−½∇² + V(r)`.
pub trait Hamiltonian: Send + Sync {
    /// Potential energy of a configuration.
    fn potential(&self, r: &[f64]) -> f64;

    /// Local energy of `ansatz` at `r`.
    fn local_energy<A: Ansatz>(&self, ansatz: &A, params: &[f64], r: &[f64]) -> LocalEnergy {
        let kinetic = kinetic_energy(ansatz, params, r);
        let potential = self.potential(r);
        LocalEnergy { total: kinetic + potential, kinetic, potential }
    }

    /// Local energies of many configurations, evaluated in parallel.
    fn local_energies<A: Ansatz>(&self, ansatz: &A, params: &[f64], rs: &[&[f64]]) -> Vec<LocalEnergy> {
        rs.par_iter()
            .map(|r| self.local_energy(ansatz, params, r))
            .collect()
    }
}
