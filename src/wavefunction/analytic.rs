//! Closed-form trial functions with a single variational parameter.

use nalgebra::Vector3;
use rand::Rng;

use crate::autodiff::Scalar;
use super::params::{ParamLayout, Parameters};
use super::traits::{Ansatz, LayerObserver, LogPsi};

/// Product of hydrogenic 1s orbitals, `log ψ = −ζ Σᵢ |rᵢ − R|`.
///
/// With ζ = Z and a single electron this is the exact ground state of a
/// hydrogen-like ion. The function is symmetric, so it only describes
/// electrons that can share an orbital (at most one per spin).
#[derive(Debug, Clone)]
pub struct HydrogenicAnsatz {
    center: Vector3<f64>,
    n_electrons: usize,
    n_up: usize,
    zeta: f64,
    layout: ParamLayout,
}

impl HydrogenicAnsatz {
    pub fn new(center: Vector3<f64>, n_up: usize, n_down: usize, zeta: f64) -> Self {
        let mut layout = ParamLayout::new();
        layout.add_generic("zeta", 1);
        Self { center, n_electrons: n_up + n_down, n_up, zeta, layout }
    }
}

impl Ansatz for HydrogenicAnsatz {
    fn n_electrons(&self) -> usize {
        self.n_electrons
    }

    fn n_up(&self) -> usize {
        self.n_up
    }

    fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    fn init_params<R: Rng + ?Sized>(&self, _rng: &mut R) -> Parameters {
        let mut params = Parameters::zeros(self.layout.clone());
        params.values_mut()[0] = self.zeta;
        params
    }

    fn forward<S: Scalar>(
        &self,
        params: &[S],
        r: &[S],
        _observer: &mut dyn LayerObserver<S>,
    ) -> LogPsi<S> {
        let radii: Vec<S> = r
            .chunks_exact(3)
            .map(|ri| {
                let d = [ri[0] - self.center.x, ri[1] - self.center.y, ri[2] - self.center.z];
                (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
            })
            .collect();
        LogPsi { log_abs: -(params[0] * S::sum(&radii)), sign: 1.0 }
    }
}

/// Isotropic Gaussian, `log ψ = −a Σᵢ |rᵢ|²`.
///
/// Exact ground state of the harmonic trap with `a = ω/2`.
#[derive(Debug, Clone)]
pub struct GaussianAnsatz {
    n_electrons: usize,
    n_up: usize,
    a: f64,
    layout: ParamLayout,
}

impl GaussianAnsatz {
    pub fn new(n_up: usize, n_down: usize, a: f64) -> Self {
        let mut layout = ParamLayout::new();
        layout.add_generic("a", 1);
        Self { n_electrons: n_up + n_down, n_up, a, layout }
    }
}

impl Ansatz for GaussianAnsatz {
    fn n_electrons(&self) -> usize {
        self.n_electrons
    }

    fn n_up(&self) -> usize {
        self.n_up
    }

    fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    fn init_params<R: Rng + ?Sized>(&self, _rng: &mut R) -> Parameters {
        let mut params = Parameters::zeros(self.layout.clone());
        params.values_mut()[0] = self.a;
        params
    }

    fn forward<S: Scalar>(
        &self,
        params: &[S],
        r: &[S],
        _observer: &mut dyn LayerObserver<S>,
    ) -> LogPsi<S> {
        LogPsi { log_abs: -(params[0] * S::dot(r, r)), sign: 1.0 }
    }
}
