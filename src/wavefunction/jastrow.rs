//! Electron-electron cusp Jastrow factor.

use serde::{Deserialize, Serialize};

use crate::autodiff::Scalar;

/// Fixed pair Jastrow `log J = Σᵢ<ⱼ −cᵢⱼ α / (1 + rᵢⱼ/α)`.
///
/// `cᵢⱼ` is ½ for opposite spins and ¼ for equal spins, which gives
/// `∂ log J / ∂rᵢⱼ = cᵢⱼ` at coalescence and so satisfies the Kato cusp
/// conditions for both spin channels.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CuspJastrow {
    /// Range of the correlation hole
    pub alpha: f64,
    pub n_up: usize,
    pub n_electrons: usize,
}

impl CuspJastrow {
    pub fn new(alpha: f64, n_up: usize, n_electrons: usize) -> Self {
        Self { alpha, n_up, n_electrons }
    }

    /// All unique electron pairs (i, j) with i < j.
    fn unique_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.n_electrons)
            .flat_map(move |i| ((i + 1)..self.n_electrons).map(move |j| (i, j)))
    }

    pub fn log_value<S: Scalar>(&self, r: &[S]) -> S {
        let terms: Vec<S> = self
            .unique_pairs()
            .map(|(i, j)| {
                let same_spin = (i < self.n_up) == (j < self.n_up);
                let c = if same_spin { 0.25 } else { 0.5 };
                let r_ij = distance(&r[3 * i..3 * i + 3], &r[3 * j..3 * j + 3]);
                (r_ij / self.alpha + 1.0).recip() * (-c * self.alpha)
            })
            .collect();
        S::sum(&terms)
    }
}

/// Euclidean distance between two 3-vectors.
pub fn distance<S: Scalar>(a: &[S], b: &[S]) -> S {
    let d = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
    (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
}
