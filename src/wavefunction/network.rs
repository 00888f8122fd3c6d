//! Neural-network ansatz.
//!
//! Electron embeddings are refined by continuous-filter message passing over
//! electron-electron and electron-nucleus distances. Orbitals are read off the
//! final embeddings, multiplied by exponential envelopes (or by baseline
//! orbitals) and combined into spin-factored determinants. A cusp Jastrow and
//! a learned symmetric Jastrow complete the wavefunction:
//!
//! ```text
//! ψ(r) = exp(J(r)) Σ_d w_d det[φ_dk↑(r_i↑)] det[φ_dk↓(r_i↓)]
//! ```

use nalgebra::Vector3;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::autodiff::Scalar;
use crate::error::{Result, VmcError};
use crate::systems::Molecule;
use super::basis::BaselineOrbitals;
use super::determinant::{signed_logsumexp, slogdet};
use super::jastrow::CuspJastrow;
use super::layers::{Dense, DistanceBasis, Mlp};
use super::params::{ParamLayout, Parameters};
use super::traits::{Ansatz, LayerObserver, LogPsi};

/// Hyperparameters of [`NeuralAnsatz`].
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct NeuralAnsatzConfig {
    pub embedding_dim: usize,
    pub kernel_dim: usize,
    pub dist_feat_dim: usize,
    pub n_interactions: usize,
    pub cutoff: f64,
    pub n_layers_w: usize,
    pub n_layers_h: usize,
    pub n_layers_g: usize,
    pub n_determinants: usize,
    pub jastrow_layers: usize,
    pub cusp_alpha: f64,
    /// Feed signed coordinate differences, not only distances, to the
    /// interaction filters. Filters then see `7 · dist_feat_dim` features and
    /// are evaluated for each direction of an electron pair.
    pub difference_features: bool,
}

impl Default for NeuralAnsatzConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 32,
            kernel_dim: 64,
            dist_feat_dim: 16,
            n_interactions: 2,
            cutoff: 10.0,
            n_layers_w: 2,
            n_layers_h: 1,
            n_layers_g: 1,
            n_determinants: 4,
            jastrow_layers: 2,
            cusp_alpha: 1.0,
            difference_features: false,
        }
    }
}

impl NeuralAnsatzConfig {
    /// Width of the edge features entering the filter networks.
    pub fn edge_feature_dim(&self) -> usize {
        if self.difference_features {
            7 * self.dist_feat_dim
        } else {
            self.dist_feat_dim
        }
    }

    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("embedding_dim", self.embedding_dim),
            ("kernel_dim", self.kernel_dim),
            ("dist_feat_dim", self.dist_feat_dim),
            ("n_determinants", self.n_determinants),
            ("n_layers_w", self.n_layers_w),
            ("n_layers_h", self.n_layers_h),
            ("n_layers_g", self.n_layers_g),
            ("jastrow_layers", self.jastrow_layers),
        ];
        if let Some((name, _)) = dims.iter().find(|(_, v)| *v == 0) {
            return Err(VmcError::InvalidConfig(format!("ansatz.{name} must be positive")));
        }
        if !(self.cutoff > 0.0) || !(self.cusp_alpha > 0.0) {
            return Err(VmcError::InvalidConfig(
                "ansatz.cutoff and ansatz.cusp_alpha must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// One message-passing layer.
#[derive(Debug, Clone)]
struct Interaction {
    w_same: Mlp,
    w_anti: Mlp,
    w_ne: Mlp,
    h: Mlp,
    g_same: Mlp,
    g_anti: Mlp,
    g_ne: Mlp,
}

impl Interaction {
    fn new(layout: &mut ParamLayout, index: usize, config: &NeuralAnsatzConfig) -> Self {
        let (e, k, f) = (config.embedding_dim, config.kernel_dim, config.edge_feature_dim());
        let name = |part: &str| format!("interaction{index}.{part}");
        Self {
            w_same: Mlp::log_spaced(layout, &name("w_same"), f, k, config.n_layers_w),
            w_anti: Mlp::log_spaced(layout, &name("w_anti"), f, k, config.n_layers_w),
            w_ne: Mlp::log_spaced(layout, &name("w_ne"), f, k, config.n_layers_w),
            h: Mlp::log_spaced(layout, &name("h"), e, k, config.n_layers_h),
            g_same: Mlp::log_spaced(layout, &name("g_same"), k, e, config.n_layers_g),
            g_anti: Mlp::log_spaced(layout, &name("g_anti"), k, e, config.n_layers_g),
            g_ne: Mlp::log_spaced(layout, &name("g_ne"), k, e, config.n_layers_g),
        }
    }

    fn mlps(&self) -> [&Mlp; 7] {
        [
            &self.w_same,
            &self.w_anti,
            &self.w_ne,
            &self.h,
            &self.g_same,
            &self.g_anti,
            &self.g_ne,
        ]
    }
}

/// Orbital read-out for one spin channel.
#[derive(Debug, Clone)]
struct SpinOrbitals {
    /// Electron indices `start..start + n`
    start: usize,
    n: usize,
    linear: Dense,
    /// Offset of `n_det · n · n_nuclei` exponents followed by as many weights
    envelope: Option<usize>,
}

/// Message-passing neural wavefunction for a molecule.
#[derive(Debug, Clone)]
pub struct NeuralAnsatz {
    config: NeuralAnsatzConfig,
    coords: Vec<Vector3<f64>>,
    charges: Vec<f64>,
    n_up: usize,
    n_down: usize,
    baseline: Option<BaselineOrbitals>,
    layout: ParamLayout,
    electron_embedding: usize,
    n_spin_types: usize,
    nuclear_embedding: usize,
    basis: DistanceBasis,
    interactions: Vec<Interaction>,
    orbitals: Vec<SpinOrbitals>,
    det_weights: usize,
    jastrow_net: Mlp,
    cusp: CuspJastrow,
}

impl NeuralAnsatz {
    pub fn new(
        molecule: &Molecule,
        config: NeuralAnsatzConfig,
        baseline: Option<BaselineOrbitals>,
    ) -> Result<Self> {
        molecule.validate()?;
        config.validate()?;
        let (n_up, n_down) = (molecule.n_up(), molecule.n_down());
        if let Some(orbitals) = &baseline {
            orbitals.validate(n_up.max(n_down))?;
        }
        let n_nuc = molecule.n_nuclei();
        let (e, k) = (config.embedding_dim, config.kernel_dim);
        let n_det = config.n_determinants;

        let mut layout = ParamLayout::new();
        let n_spin_types = if n_up == n_down { 1 } else { 2 };
        let electron_embedding = block_offset(&mut layout, "embedding.electron", n_spin_types * e);
        let nuclear_embedding = block_offset(&mut layout, "embedding.nuclear", n_nuc * k);
        let interactions = (0..config.n_interactions)
            .map(|i| Interaction::new(&mut layout, i, &config))
            .collect();

        let mut orbitals = Vec::new();
        for (label, start, n) in [("up", 0, n_up), ("down", n_up, n_down)] {
            if n == 0 {
                continue;
            }
            let linear = Dense::new(&mut layout, format!("orbitals.{label}"), e, n_det * n);
            let envelope = baseline
                .is_none()
                .then(|| block_offset(&mut layout, format!("envelope.{label}"), 2 * n_det * n * n_nuc));
            orbitals.push(SpinOrbitals { start, n, linear, envelope });
        }
        let det_weights = block_offset(&mut layout, "determinant.weights", n_det);
        let jastrow_net = Mlp::log_spaced(&mut layout, "jastrow", e, 1, config.jastrow_layers);

        Ok(Self {
            basis: DistanceBasis::new(config.dist_feat_dim, config.cutoff),
            cusp: CuspJastrow::new(config.cusp_alpha, n_up, n_up + n_down),
            config,
            coords: molecule.coords.clone(),
            charges: molecule.charges.clone(),
            n_up,
            n_down,
            baseline,
            layout,
            electron_embedding,
            n_spin_types,
            nuclear_embedding,
            interactions,
            orbitals,
            det_weights,
            jastrow_net,
        })
    }

    pub fn config(&self) -> &NeuralAnsatzConfig {
        &self.config
    }

    fn spin_type(&self, i: usize) -> usize {
        if self.n_spin_types == 1 || i < self.n_up {
            0
        } else {
            1
        }
    }

    fn is_up(&self, i: usize) -> bool {
        i < self.n_up
    }

    fn edge_features<S: Scalar>(&self, diff: [S; 3]) -> Vec<S> {
        if self.config.difference_features {
            self.basis.forward_difference(diff, norm(diff))
        } else {
            self.basis.forward(norm(diff))
        }
    }

    fn embed<S: Scalar>(
        &self,
        params: &[S],
        ee_features: &[Vec<Vec<S>>],
        ne_features: &[Vec<Vec<S>>],
        observer: &mut dyn LayerObserver<S>,
    ) -> Vec<Vec<S>> {
        let n = self.n_up + self.n_down;
        let (e, k) = (self.config.embedding_dim, self.config.kernel_dim);
        let mut x: Vec<Vec<S>> = (0..n)
            .map(|i| {
                let start = self.electron_embedding + self.spin_type(i) * e;
                params[start..start + e].to_vec()
            })
            .collect();
        let y: Vec<&[S]> = (0..self.coords.len())
            .map(|nuc| {
                let start = self.nuclear_embedding + nuc * k;
                &params[start..start + k]
            })
            .collect();

        // distance-only filters are symmetric, so each unordered pair is evaluated once
        let symmetric = !self.config.difference_features;
        for layer in &self.interactions {
            let h: Vec<Vec<S>> = x.iter().map(|xi| layer.h.forward(params, xi, observer)).collect();
            let mut w_ee: Vec<Vec<Option<Vec<S>>>> = vec![vec![None; n]; n];
            for i in 0..n {
                for j in 0..n {
                    if i == j || (symmetric && j < i) {
                        continue;
                    }
                    let net = if self.is_up(i) == self.is_up(j) { &layer.w_same } else { &layer.w_anti };
                    w_ee[i][j] = Some(net.forward(params, &ee_features[i][j], observer));
                }
            }

            let mut updated = Vec::with_capacity(n);
            for i in 0..n {
                let (mut same, mut anti) = (Vec::new(), Vec::new());
                for j in (0..n).filter(|&j| j != i) {
                    let w = if symmetric && j < i { &w_ee[j][i] } else { &w_ee[i][j] };
                    let bucket = if self.is_up(i) == self.is_up(j) { &mut same } else { &mut anti };
                    if let Some(w) = w {
                        bucket.push((w, &h[j][..]));
                    }
                }
                let w_n: Vec<Vec<S>> = ne_features[i]
                    .iter()
                    .map(|f| layer.w_ne.forward(params, f, observer))
                    .collect();
                let nuclear: Vec<(&Vec<S>, &[S])> = w_n.iter().zip(y.iter().copied()).collect();

                let z_same = convolve(&same, k);
                let z_anti = convolve(&anti, k);
                let z_ne = convolve(&nuclear, k);
                let g_same = layer.g_same.forward(params, &z_same, observer);
                let g_anti = layer.g_anti.forward(params, &z_anti, observer);
                let g_ne = layer.g_ne.forward(params, &z_ne, observer);
                updated.push(
                    (0..e)
                        .map(|c| S::sum(&[x[i][c], g_same[c], g_anti[c], g_ne[c]]))
                        .collect::<Vec<S>>(),
                );
            }
            x = updated;
        }
        x
    }

    /// Orbital matrices, one row-major `n × n` matrix per determinant.
    fn orbital_matrices<S: Scalar>(
        &self,
        spin: &SpinOrbitals,
        params: &[S],
        r: &[S],
        x: &[Vec<S>],
        ne_dist: &[Vec<S>],
        observer: &mut dyn LayerObserver<S>,
    ) -> Vec<Vec<S>> {
        let n = spin.n;
        let n_det = self.config.n_determinants;
        let n_nuc = self.coords.len();
        let mut matrices = vec![Vec::with_capacity(n * n); n_det];
        for i in spin.start..spin.start + n {
            let out = spin.linear.forward(params, &x[i], observer);
            let baseline = self
                .baseline
                .as_ref()
                .map(|orbitals| orbitals.evaluate(&r[3 * i..3 * i + 3], n));
            for (d, matrix) in matrices.iter_mut().enumerate() {
                for orb in 0..n {
                    let o = out[d * n + orb];
                    let phi = match (&baseline, spin.envelope) {
                        (Some(b), _) => b[orb] * (o + 1.0),
                        (None, Some(offset)) => {
                            let base = offset + (d * n + orb) * n_nuc;
                            let weights_at = offset + n_det * n * n_nuc + (d * n + orb) * n_nuc;
                            let decays: Vec<S> = (0..n_nuc)
                                .map(|nuc| (-(params[base + nuc].abs() * ne_dist[i][nuc])).exp())
                                .collect();
                            o * S::dot(&params[weights_at..weights_at + n_nuc], &decays)
                        }
                        (None, None) => o,
                    };
                    matrix.push(phi);
                }
            }
        }
        matrices
    }
}

fn norm<S: Scalar>(d: [S; 3]) -> S {
    (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
}

fn block_offset(layout: &mut ParamLayout, name: impl Into<String>, len: usize) -> usize {
    let index = layout.add_generic(name, len);
    layout.block(index).offset
}

/// `z_c = Σ_pairs w_c h_c` for every channel `c`.
fn convolve<S: Scalar, W: AsRef<[S]>>(pairs: &[(W, &[S])], k: usize) -> Vec<S> {
    let mut ws = Vec::with_capacity(pairs.len());
    let mut hs = Vec::with_capacity(pairs.len());
    (0..k)
        .map(|c| {
            ws.clear();
            hs.clear();
            for (w, h) in pairs {
                ws.push(w.as_ref()[c]);
                hs.push(h[c]);
            }
            S::dot(&ws, &hs)
        })
        .collect()
}

impl Ansatz for NeuralAnsatz {
    fn n_electrons(&self) -> usize {
        self.n_up + self.n_down
    }

    fn n_up(&self) -> usize {
        self.n_up
    }

    fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Parameters {
        let mut params = Parameters::zeros(self.layout.clone());
        let values = params.values_mut();
        let (e, k) = (self.config.embedding_dim, self.config.kernel_dim);
        for v in &mut values[self.electron_embedding..self.electron_embedding + self.n_spin_types * e] {
            *v = rng.sample(StandardNormal);
        }
        for v in &mut values[self.nuclear_embedding..self.nuclear_embedding + self.coords.len() * k] {
            *v = rng.sample(StandardNormal);
        }
        for layer in &self.interactions {
            for mlp in layer.mlps() {
                mlp.init(values, rng);
            }
        }
        let n_det = self.config.n_determinants;
        let n_nuc = self.coords.len();
        for spin in &self.orbitals {
            spin.linear.init(values, rng);
            if let Some(offset) = spin.envelope {
                // exponents start at the nuclear charge, weights at one
                let count = n_det * spin.n * n_nuc;
                for slot in 0..count {
                    values[offset + slot] = self.charges[slot % n_nuc];
                    values[offset + count + slot] = 1.0;
                }
            }
        }
        for v in &mut values[self.det_weights..self.det_weights + n_det] {
            *v = 1.0;
        }
        self.jastrow_net.init(values, rng);
        params
    }

    fn forward<S: Scalar>(
        &self,
        params: &[S],
        r: &[S],
        observer: &mut dyn LayerObserver<S>,
    ) -> LogPsi<S> {
        let n = self.n_electrons();
        let ri = |i: usize| &r[3 * i..3 * i + 3];

        let symmetric = !self.config.difference_features;
        // features of the edge from sender j to receiver i, at [i][j]
        let ee_features: Vec<Vec<Vec<S>>> = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| {
                        if i == j || (symmetric && j < i) {
                            return Vec::new();
                        }
                        let (a, b) = (ri(i), ri(j));
                        self.edge_features([a[0] - b[0], a[1] - b[1], a[2] - b[2]])
                    })
                    .collect()
            })
            .collect();
        let ne_diffs: Vec<Vec<[S; 3]>> = (0..n)
            .map(|i| {
                let a = ri(i);
                self.coords.iter().map(|c| [a[0] - c.x, a[1] - c.y, a[2] - c.z]).collect()
            })
            .collect();
        let ne_dist: Vec<Vec<S>> = ne_diffs
            .iter()
            .map(|row| row.iter().map(|&d| norm(d)).collect())
            .collect();
        let ne_features: Vec<Vec<Vec<S>>> = ne_diffs
            .iter()
            .map(|row| row.iter().map(|&d| self.edge_features(d)).collect())
            .collect();

        let x = self.embed(params, &ee_features, &ne_features, observer);

        let n_det = self.config.n_determinants;
        let mut dets = vec![LogPsi { log_abs: S::constant(0.0), sign: 1.0 }; n_det];
        for spin in &self.orbitals {
            let matrices = self.orbital_matrices(spin, params, r, &x, &ne_dist, observer);
            for (det, matrix) in dets.iter_mut().zip(matrices) {
                let part = slogdet(matrix, spin.n);
                det.log_abs = det.log_abs + part.log_abs;
                det.sign *= part.sign;
            }
        }
        let weights = &params[self.det_weights..self.det_weights + n_det];
        let psi = signed_logsumexp(&dets, weights);

        let pooled: Vec<S> = (0..self.config.embedding_dim)
            .map(|c| S::sum(&x.iter().map(|xi| xi[c]).collect::<Vec<S>>()))
            .collect();
        let learned = self.jastrow_net.forward(params, &pooled, observer)[0];
        let jastrow = learned + self.cusp.log_value(r);

        LogPsi { log_abs: psi.log_abs + jastrow, sign: psi.sign }
    }
}
