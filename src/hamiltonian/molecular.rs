//! Coulomb Hamiltonian of a molecule and a harmonic trap for toy systems.

use nalgebra::Vector3;

use crate::systems::Molecule;
use super::traits::Hamiltonian;

fn position(r: &[f64], i: usize) -> Vector3<f64> {
    Vector3::new(r[3 * i], r[3 * i + 1], r[3 * i + 2])
}

/// Non-relativistic Born-Oppenheimer Hamiltonian with point nuclei.
#[derive(Debug, Clone)]
pub struct MolecularHamiltonian {
    coords: Vec<Vector3<f64>>,
    charges: Vec<f64>,
    nuclear_repulsion: f64,
}

impl MolecularHamiltonian {
    pub fn new(molecule: &Molecule) -> Self {
        Self {
            coords: molecule.coords.clone(),
            charges: molecule.charges.clone(),
            nuclear_repulsion: molecule.nuclear_repulsion(),
        }
    }

    pub fn nuclear_repulsion(&self) -> f64 {
        self.nuclear_repulsion
    }
}

impl Hamiltonian for MolecularHamiltonian {
    fn potential(&self, r: &[f64]) -> f64 {
        let n = r.len() / 3;
        let mut v = self.nuclear_repulsion;
        for i in 0..n {
            let ri = position(r, i);
            for (center, &z) in self.coords.iter().zip(&self.charges) {
                v -= z / (ri - center).norm();
            }
            for j in (i + 1)..n {
                v += 1.0 / (ri - position(r, j)).norm();
            }
        }
        v
    }
}

/// Isotropic harmonic trap `V = ½ ω² Σᵢ |rᵢ|²` without interactions.
#[derive(Debug, Clone, Copy)]
pub struct HarmonicTrap {
    pub omega: f64,
}

impl HarmonicTrap {
    pub fn new(omega: f64) -> Self {
        Self { omega }
    }
}

impl Hamiltonian for HarmonicTrap {
    fn potential(&self, r: &[f64]) -> f64 {
        0.5 * self.omega * self.omega * r.iter().map(|x| x * x).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavefunction::{Ansatz, GaussianAnsatz, HydrogenicAnsatz};
    use approx::assert_relative_eq;

    #[test]
    fn test_hydrogen_local_energy_is_exact() {
        let mol = Molecule::from_name("H").unwrap();
        let hamiltonian = MolecularHamiltonian::new(&mol);
        let ansatz = HydrogenicAnsatz::new(Vector3::zeros(), 1, 0, 1.0);
        for r in [[0.3, -0.4, 0.5], [1.5, 0.2, -2.0], [-0.05, 0.01, 0.02]] {
            let e = hamiltonian.local_energy(&ansatz, &[1.0], &r);
            assert_relative_eq!(e.total, -0.5, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_helium_local_energy_matches_analytic_form() {
        // For ψ = exp(−ζ(r₁ + r₂)): E_L = −ζ² + (ζ − 2)(1/r₁ + 1/r₂) + 1/r₁₂
        let mol = Molecule::from_name("He").unwrap();
        let hamiltonian = MolecularHamiltonian::new(&mol);
        let zeta = 1.6875;
        let ansatz = HydrogenicAnsatz::new(Vector3::zeros(), 1, 1, zeta);
        let r = [0.4, 0.3, -0.2, -0.9, 0.1, 0.6];
        let r1 = (0.16_f64 + 0.09 + 0.04).sqrt();
        let r2 = (0.81_f64 + 0.01 + 0.36).sqrt();
        let r12 = (1.69_f64 + 0.04 + 0.64).sqrt();
        let expected = -zeta * zeta + (zeta - 2.0) * (1.0 / r1 + 1.0 / r2) + 1.0 / r12;
        let e = hamiltonian.local_energy(&ansatz, &[zeta], &r);
        assert_relative_eq!(e.total, expected, epsilon = 1e-10);
    }

    #[test]
    fn test_harmonic_trap_ground_state() {
        let trap = HarmonicTrap::new(2.0);
        let ansatz = GaussianAnsatz::new(1, 1, 1.0);
        let params = ansatz.init_params(&mut rand::thread_rng());
        let r = [0.3, -0.1, 0.7, 1.2, 0.4, -0.5];
        let e = trap.local_energy(&ansatz, params.values(), &r);
        // two electrons, 3ω/2 each
        assert_relative_eq!(e.total, 6.0, epsilon = 1e-10);
    }

    #[test]
    fn test_nuclear_repulsion_is_included() {
        let mol = Molecule::from_name("H2").unwrap();
        let hamiltonian = MolecularHamiltonian::new(&mol);
        let far = [1e6, 0.0, 0.0, -1e6, 0.0, 0.0];
        assert_relative_eq!(hamiltonian.potential(&far), 1.0 / 1.4, epsilon = 1e-3);
    }

    #[test]
    fn test_batched_local_energies_preserve_order() {
        let mol = Molecule::from_name("H").unwrap();
        let hamiltonian = MolecularHamiltonian::new(&mol);
        let ansatz = HydrogenicAnsatz::new(Vector3::zeros(), 1, 0, 0.8);
        let configs: Vec<Vec<f64>> = (1..20).map(|k| vec![0.1 * k as f64, 0.0, 0.2]).collect();
        let refs: Vec<&[f64]> = configs.iter().map(Vec::as_slice).collect();
        let batch = hamiltonian.local_energies(&ansatz, &[0.8], &refs);
        for (r, e) in refs.iter().zip(&batch) {
            assert_eq!(*e, hamiltonian.local_energy(&ansatz, &[0.8], r));
        }
    }
}
