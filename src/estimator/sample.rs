//! Per-walker local energies and log-amplitude gradients.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::autodiff::{Scalar, TapeSession, Var};
use crate::hamiltonian::{Hamiltonian, LocalEnergy};
use crate::sampling::WalkerBatch;
use crate::wavefunction::{constants, Ansatz, LayerObserver, NoObserver};

/// Activations and back-propagated derivatives of one dense layer use.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LayerStat {
    pub block: usize,
    /// Layer inputs, including the trailing 1 of the bias column.
    pub a: Vec<f64>,
    /// `∂ log|ψ| / ∂ output`.
    pub g: Vec<f64>,
}

/// Everything the estimator and optimizers need from one walker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LocalEnergySample {
    pub energy: LocalEnergy,
    /// `∂ log|ψ| / ∂θ` over the flat parameter vector.
    pub log_psi_grad: Vec<f64>,
    /// Filled only when curvature statistics are requested.
    pub layer_stats: Vec<LayerStat>,
}

impl LocalEnergySample {
    pub fn is_finite(&self) -> bool {
        self.energy.is_finite() && self.log_psi_grad.iter().all(|g| g.is_finite())
    }
}

/// Watches the outputs of every dense layer use so their adjoints can be
/// read back after the backward pass.
struct KfacCapture {
    uses: Vec<(usize, Vec<f64>, Vec<Var>)>,
}

impl LayerObserver<Var> for KfacCapture {
    fn observe(&mut self, block: usize, inputs: &[Var], outputs: &mut [Var]) {
        for output in outputs.iter_mut() {
            *output = output.watch();
        }
        let a = inputs.iter().map(Scalar::value).collect();
        self.uses.push((block, a, outputs.to_vec()));
    }
}

/// Parameter gradient of `log|ψ|`, optionally with per-layer statistics.
pub fn log_psi_gradient<A: Ansatz>(
    ansatz: &A,
    params: &[f64],
    r: &[f64],
    collect_layers: bool,
) -> (Vec<f64>, Vec<LayerStat>) {
    let session = TapeSession::new();
    let theta = session.variables(params);
    let coords: Vec<Var> = constants(r);
    let mut capture = KfacCapture { uses: Vec::new() };
    let log_psi = if collect_layers {
        ansatz.forward(&theta, &coords, &mut capture)
    } else {
        ansatz.forward(&theta, &coords, &mut NoObserver)
    };
    let adjoints = log_psi.log_abs.backward();
    let layer_stats = capture
        .uses
        .into_iter()
        .map(|(block, a, outputs)| LayerStat { block, a, g: adjoints.of_all(&outputs) })
        .collect();
    (adjoints.of_all(&theta), layer_stats)
}

/// Local energy and log-amplitude gradient of one configuration.
pub fn evaluate_sample<H: Hamiltonian, A: Ansatz>(
    hamiltonian: &H,
    ansatz: &A,
    params: &[f64],
    r: &[f64],
    collect_layers: bool,
) -> LocalEnergySample {
    let energy = hamiltonian.local_energy(ansatz, params, r);
    let (log_psi_grad, layer_stats) = log_psi_gradient(ansatz, params, r, collect_layers);
    LocalEnergySample { energy, log_psi_grad, layer_stats }
}

/// Evaluate every walker in parallel; results keep the walker order.
pub fn evaluate_batch<H: Hamiltonian, A: Ansatz>(
    hamiltonian: &H,
    ansatz: &A,
    params: &[f64],
    batch: &WalkerBatch,
    collect_layers: bool,
) -> Vec<LocalEnergySample> {
    batch
        .walkers
        .par_iter()
        .map(|w| evaluate_sample(hamiltonian, ansatz, params, &w.r, collect_layers))
        .collect()
}
