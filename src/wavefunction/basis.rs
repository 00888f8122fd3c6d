//! Contracted Gaussian basis functions and baseline molecular orbitals.
//!
//! Baseline orbitals come from an external Hartree-Fock or CASSCF run and are
//! deserialized from YAML or JSON. The network multiplies them by a learned
//! correction instead of building orbitals from scratch.

use std::f64::consts::PI;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::autodiff::Scalar;
use crate::error::{Result, VmcError};
use super::traits::constants;

// STO-6G fit of a Slater 1s function with unit exponent.
const STO6G_1S_EXPONENTS: [f64; 6] = [
    23.10303149, 4.235915534, 1.185056519, 0.4070988982, 0.1580884151, 0.06510953954,
];
const STO6G_1S_COEFFICIENTS: [f64; 6] = [
    0.009163596281, 0.04936149294, 0.1685383049, 0.3705627997, 0.4164915298, 0.1303340841,
];

/// Angular momentum of a shell.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    S,
    P,
}

/// Contracted Gaussian shell with normalized primitives.
///
/// An s shell yields one basis function, a p shell three (x, y, z).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GaussianShell {
    pub center: Vector3<f64>,
    pub kind: ShellKind,
    pub exponents: Vec<f64>,
    pub coefficients: Vec<f64>,
}

impl GaussianShell {
    /// STO-6G contraction approximating `exp(−ζ r)` centered at `center`.
    pub fn sto6g_1s(center: Vector3<f64>, zeta: f64) -> Self {
        Self {
            center,
            kind: ShellKind::S,
            exponents: STO6G_1S_EXPONENTS.iter().map(|a| a * zeta * zeta).collect(),
            coefficients: STO6G_1S_COEFFICIENTS.to_vec(),
        }
    }

    pub fn n_functions(&self) -> usize {
        match self.kind {
            ShellKind::S => 1,
            ShellKind::P => 3,
        }
    }

    fn norm(&self, alpha: f64) -> f64 {
        match self.kind {
            ShellKind::S => (2.0 * alpha / PI).powf(0.75),
            ShellKind::P => (128.0 * alpha.powi(5) / PI.powi(3)).powf(0.25),
        }
    }

    /// Append the shell's basis function values at `r` to `out`.
    pub fn evaluate_into<S: Scalar>(&self, r: &[S], out: &mut Vec<S>) {
        let d = [r[0] - self.center.x, r[1] - self.center.y, r[2] - self.center.z];
        let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
        let primitives: Vec<S> = self.exponents.iter().map(|&a| (r2 * -a).exp()).collect();
        let weights: Vec<S> = self
            .exponents
            .iter()
            .zip(&self.coefficients)
            .map(|(&a, &c)| S::constant(c * self.norm(a)))
            .collect();
        let radial = S::dot(&primitives, &weights);
        match self.kind {
            ShellKind::S => out.push(radial),
            ShellKind::P => out.extend(d.iter().map(|&x| x * radial)),
        }
    }
}

/// Molecular orbitals as linear combinations of Gaussian shells.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BaselineOrbitals {
    pub shells: Vec<GaussianShell>,
    /// One row of basis coefficients per molecular orbital.
    pub mo_coefficients: Vec<Vec<f64>>,
}

impl BaselineOrbitals {
    pub fn n_basis(&self) -> usize {
        self.shells.iter().map(GaussianShell::n_functions).sum()
    }

    pub fn n_orbitals(&self) -> usize {
        self.mo_coefficients.len()
    }

    pub fn validate(&self, n_required: usize) -> Result<()> {
        let n_basis = self.n_basis();
        if let Some(row) = self.mo_coefficients.iter().find(|row| row.len() != n_basis) {
            return Err(VmcError::InvalidSystem(format!(
                "orbital coefficient row has {} entries, basis has {n_basis} functions",
                row.len()
            )));
        }
        if self.shells.iter().any(|s| s.exponents.len() != s.coefficients.len()) {
            return Err(VmcError::InvalidSystem(
                "shell exponents and coefficients differ in length".into(),
            ));
        }
        if self.n_orbitals() < n_required {
            return Err(VmcError::InvalidSystem(format!(
                "{} baseline orbitals supplied, {n_required} needed",
                self.n_orbitals()
            )));
        }
        Ok(())
    }

    /// Values of the first `n` orbitals at a single electron position.
    pub fn evaluate<S: Scalar>(&self, r: &[S], n: usize) -> Vec<S> {
        let mut basis = Vec::with_capacity(self.n_basis());
        for shell in &self.shells {
            shell.evaluate_into(r, &mut basis);
        }
        self.mo_coefficients[..n]
            .iter()
            .map(|row| S::dot(&basis, &constants(row)))
            .collect()
    }

    /// Minimal basis for hydrogen-like nuclei: one STO-6G 1s shell per
    /// nucleus and the identity as orbital coefficients.
    pub fn minimal_s(coords: &[Vector3<f64>], charges: &[f64]) -> Self {
        let shells: Vec<GaussianShell> = coords
            .iter()
            .zip(charges)
            .map(|(c, &z)| GaussianShell::sto6g_1s(*c, z))
            .collect();
        let n = shells.len();
        let mo_coefficients = (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        Self { shells, mo_coefficients }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sto6g_approximates_slater_1s() {
        let shell = GaussianShell::sto6g_1s(Vector3::zeros(), 1.0);
        let norm = 1.0 / PI.sqrt();
        for r in [0.5_f64, 1.0, 2.0] {
            let mut out = Vec::new();
            shell.evaluate_into(&[r, 0.0, 0.0], &mut out);
            assert_relative_eq!(out[0], norm * (-r).exp(), epsilon = 2e-3);
        }
    }

    #[test]
    fn test_sto6g_scales_with_exponent() {
        let unit = GaussianShell::sto6g_1s(Vector3::zeros(), 1.0);
        let scaled = GaussianShell::sto6g_1s(Vector3::zeros(), 2.0);
        let (mut a, mut b) = (Vec::new(), Vec::new());
        unit.evaluate_into(&[1.0, 0.0, 0.0], &mut a);
        scaled.evaluate_into(&[0.5, 0.0, 0.0], &mut b);
        // ψ_ζ(r) = ζ^{3/2} ψ_1(ζ r) for normalized functions
        assert_relative_eq!(b[0], 2.0_f64.powf(1.5) * a[0], epsilon = 1e-12);
    }

    #[test]
    fn test_p_shell_is_odd() {
        let shell = GaussianShell {
            center: Vector3::new(0.0, 0.0, 1.0),
            kind: ShellKind::P,
            exponents: vec![0.8],
            coefficients: vec![1.0],
        };
        let (mut plus, mut minus) = (Vec::new(), Vec::new());
        shell.evaluate_into(&[0.3, -0.2, 1.4], &mut plus);
        shell.evaluate_into(&[-0.3, 0.2, 0.6], &mut minus);
        assert_eq!(plus.len(), 3);
        for (p, m) in plus.iter().zip(&minus) {
            assert_relative_eq!(*p, -*m, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_validate_checks_shapes() {
        let orbitals = BaselineOrbitals::minimal_s(&[Vector3::zeros()], &[1.0]);
        assert!(orbitals.validate(1).is_ok());
        assert!(orbitals.validate(2).is_err());
        let broken = BaselineOrbitals {
            mo_coefficients: vec![vec![1.0, 0.0]],
            ..orbitals
        };
        assert!(broken.validate(1).is_err());
    }
}
