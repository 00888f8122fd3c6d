//! Ansatz trait shared by the neural network and the analytic trial functions.

use rand::Rng;

use crate::autodiff::Scalar;
use super::params::{ParamLayout, Parameters};

/// `log|ψ|` and the sign of ψ.
#[derive(Clone, Copy, Debug)]
pub struct LogPsi<S> {
    pub log_abs: S,
    pub sign: f64,
}

/// Receives the inputs and outputs of every dense layer evaluation.
///
/// `inputs` include the trailing constant 1 that multiplies the bias column.
/// An observer may replace `outputs` with equal values, e.g. watched
/// reverse-mode handles; the layer continues with what it leaves there.
pub trait LayerObserver<S: Scalar> {
    fn observe(&mut self, block: usize, inputs: &[S], outputs: &mut [S]);
}

/// Observer that ignores everything.
pub struct NoObserver;

impl<S: Scalar> LayerObserver<S> for NoObserver {
    fn observe(&mut self, _block: usize, _inputs: &[S], _outputs: &mut [S]) {}
}

/// Lift plain numbers into a scalar type as constants.
pub fn constants<S: Scalar>(xs: &[f64]) -> Vec<S> {
    xs.iter().map(|&x| S::constant(x)).collect()
}

/// Trial wavefunction with variational parameters.
///
/// A configuration is a flat slice of `3 * n_electrons()` coordinates, the
/// first `n_up()` electrons being spin-up.
pub trait Ansatz: Send + Sync {
    fn n_electrons(&self) -> usize;

    fn n_up(&self) -> usize;

    fn layout(&self) -> &ParamLayout;

    /// Fresh random parameters.
    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Parameters;

    /// Evaluate `log|ψ|` and its sign for any scalar type.
    fn forward<S: Scalar>(
        &self,
        params: &[S],
        r: &[S],
        observer: &mut dyn LayerObserver<S>,
    ) -> LogPsi<S>;

    /// Plain evaluation used by the sampler.
    fn log_psi(&self, params: &[f64], r: &[f64]) -> LogPsi<f64> {
        self.forward(params, r, &mut NoObserver)
    }

    /// Central-difference gradient of `log|ψ|` with respect to the coordinates.
    fn numerical_log_gradient(&self, params: &[f64], r: &[f64], h: f64) -> Vec<f64> {
        (0..r.len())
            .map(|k| {
                let mut r_fwd = r.to_vec();
                let mut r_bwd = r.to_vec();
                r_fwd[k] += h;
                r_bwd[k] -= h;
                (self.log_psi(params, &r_fwd).log_abs - self.log_psi(params, &r_bwd).log_abs)
                    / (2.0 * h)
            })
            .collect()
    }

    /// Central-difference Laplacian of `log|ψ|`.
    fn numerical_log_laplacian(&self, params: &[f64], r: &[f64], h: f64) -> f64 {
        let center = self.log_psi(params, r).log_abs;
        (0..r.len())
            .map(|k| {
                let mut r_fwd = r.to_vec();
                let mut r_bwd = r.to_vec();
                r_fwd[k] += h;
                r_bwd[k] -= h;
                (self.log_psi(params, &r_fwd).log_abs - 2.0 * center
                    + self.log_psi(params, &r_bwd).log_abs)
                    / (h * h)
            })
            .sum()
    }
}
