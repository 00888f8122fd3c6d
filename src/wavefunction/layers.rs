//! Dense layers, multilayer perceptrons and the Gaussian distance basis.

use rand::Rng;

use crate::autodiff::Scalar;
use super::params::ParamLayout;
use super::traits::LayerObserver;

/// Affine map `y = W x + b` backed by a dense parameter block.
#[derive(Clone, Debug)]
pub struct Dense {
    block: usize,
    offset: usize,
    n_in: usize,
    n_out: usize,
}

impl Dense {
    pub fn new(layout: &mut ParamLayout, name: impl Into<String>, n_in: usize, n_out: usize) -> Self {
        let block = layout.add_dense(name, n_in, n_out);
        let offset = layout.block(block).offset;
        Self { block, offset, n_in, n_out }
    }

    pub fn n_in(&self) -> usize {
        self.n_in
    }

    pub fn n_out(&self) -> usize {
        self.n_out
    }

    pub fn forward<S: Scalar>(
        &self,
        params: &[S],
        x: &[S],
        observer: &mut dyn LayerObserver<S>,
    ) -> Vec<S> {
        debug_assert_eq!(x.len(), self.n_in);
        let width = self.n_in + 1;
        let mut input = Vec::with_capacity(width);
        input.extend_from_slice(x);
        input.push(S::constant(1.0));
        let mut output: Vec<S> = (0..self.n_out)
            .map(|o| {
                let start = self.offset + o * width;
                S::dot(&params[start..start + width], &input)
            })
            .collect();
        observer.observe(self.block, &input, &mut output);
        output
    }

    /// Uniform initialization in `±1/√n_in`, weights and bias alike.
    pub fn init<R: Rng + ?Sized>(&self, values: &mut [f64], rng: &mut R) {
        let bound = 1.0 / (self.n_in.max(1) as f64).sqrt();
        let len = self.n_out * (self.n_in + 1);
        for v in &mut values[self.offset..self.offset + len] {
            *v = rng.gen_range(-bound..bound);
        }
    }
}

/// Layer widths interpolated geometrically between `n_in` and `n_out`.
pub fn log_spaced_dims(n_in: usize, n_out: usize, n_layers: usize) -> Vec<usize> {
    let n_layers = n_layers.max(1);
    (0..=n_layers)
        .map(|k| {
            let q = k as f64 / n_layers as f64;
            let dim = (n_in as f64).powf(1.0 - q) * (n_out as f64).powf(q);
            (dim.round() as usize).max(1)
        })
        .collect()
}

/// Stack of dense layers with shifted-softplus activations in between.
/// The last layer is linear.
#[derive(Clone, Debug)]
pub struct Mlp {
    layers: Vec<Dense>,
}

impl Mlp {
    pub fn new(layout: &mut ParamLayout, name: &str, dims: &[usize]) -> Self {
        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, w)| Dense::new(layout, format!("{name}.{i}"), w[0], w[1]))
            .collect();
        Self { layers }
    }

    pub fn log_spaced(
        layout: &mut ParamLayout,
        name: &str,
        n_in: usize,
        n_out: usize,
        n_layers: usize,
    ) -> Self {
        Self::new(layout, name, &log_spaced_dims(n_in, n_out, n_layers))
    }

    pub fn n_out(&self) -> usize {
        self.layers.last().map_or(0, Dense::n_out)
    }

    pub fn forward<S: Scalar>(
        &self,
        params: &[S],
        x: &[S],
        observer: &mut dyn LayerObserver<S>,
    ) -> Vec<S> {
        let mut h = x.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(params, &h, observer);
            if i + 1 < self.layers.len() {
                h = h.into_iter().map(S::ssp).collect();
            }
        }
        h
    }

    pub fn init<R: Rng + ?Sized>(&self, values: &mut [f64], rng: &mut R) {
        for layer in &self.layers {
            layer.init(values, rng);
        }
    }
}

/// Gaussian expansion of a distance with a smooth envelope `d² e^{−d}`.
///
/// Centers are spaced quadratically up to `cutoff`, widths grow linearly with
/// the center so that long distances are resolved more coarsely.
#[derive(Clone, Debug)]
pub struct DistanceBasis {
    mus: Vec<f64>,
    sigmas: Vec<f64>,
}

impl DistanceBasis {
    pub fn new(n_features: usize, cutoff: f64) -> Self {
        let denom = (n_features.max(2) - 1) as f64;
        let qs: Vec<f64> = (0..n_features).map(|k| k as f64 / denom).collect();
        Self {
            mus: qs.iter().map(|q| cutoff * q * q).collect(),
            sigmas: qs.iter().map(|q| (1.0 + cutoff * q) / 7.0).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.mus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mus.is_empty()
    }

    pub fn forward<S: Scalar>(&self, d: S) -> Vec<S> {
        let envelope = d * d * (-d).exp();
        self.mus
            .iter()
            .zip(&self.sigmas)
            .map(|(&mu, &sigma)| {
                let z = (d - mu) / sigma;
                envelope * (-(z * z)).exp()
            })
            .collect()
    }

    /// Expansion of a difference vector: the positive and the negative part
    /// of each Cartesian component, then the distance, `7 · len()` features.
    pub fn forward_difference<S: Scalar>(&self, diff: [S; 3], dist: S) -> Vec<S> {
        let zero = S::constant(0.0);
        let mut out = Vec::with_capacity(7 * self.len());
        for x in diff {
            let (pos, neg) = if x.value() > 0.0 { (x, zero) } else { (zero, -x) };
            out.extend(self.forward(pos));
            out.extend(self.forward(neg));
        }
        out.extend(self.forward(dist));
        out
    }
}
