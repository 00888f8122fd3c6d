//! Adam with bias-corrected first and second moments, stepped by
//! `burn::optim`.


use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use burn::module::{Module, Param};
use burn::optim::{self, record::AdaptorRecord, AdaptiveMomentumState, GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};

use crate::autodiff::Reverse;

use crate::error::{Result, VmcError};
use super::scheduled_learning_rate;

fn default_learning_rate() -> f64 {
    1e-3
}
fn default_beta1() -> f64 {
    0.9
}
fn default_beta2() -> f64 {
    0.999
}
fn default_epsilon() -> f64 {
    1e-8
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AdamConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub decay_rate: Option<f64>,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            decay_rate: None,
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
        }
    }
}

impl AdamConfig {
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = Some(decay_rate);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(VmcError::InvalidConfig("adam.learning_rate must be positive".into()));
        }
        if !((0.0..1.0).contains(&self.beta1) && (0.0..1.0).contains(&self.beta2)) {
            return Err(VmcError::InvalidConfig("adam betas must lie in [0, 1)".into()));
        }
        if matches!(self.decay_rate, Some(d) if !(d > 0.0)) {
            return Err(VmcError::InvalidConfig("adam.decay_rate must be positive".into()));
        }
        Ok(())
    }
}

/// Step count and moment estimates, kept in plain vectors so the state
/// checkpoints as JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AdamState {
    pub step: u64,
    pub m: Vec<f64>,
    pub v: Vec<f64>,
}

impl AdamState {
    pub fn new(n_params: usize) -> Self {
        Self { step: 0, m: vec![0.0; n_params], v: vec![0.0; n_params] }
    }
}

/// The flat parameter vector as a burn module.
#[derive(Module, Debug)]
struct Flat<B: Backend> {
    values: Param<Tensor<B, 1>>,
}

fn vector<B: Backend>(xs: &[f64], device: &B::Device) -> Tensor<B, 1> {
    Tensor::from_data(TensorData::new(xs.to_vec(), [xs.len()]), device)
}

fn values<B: Backend>(tensor: Tensor<B, 1>) -> Vec<f64> {
    tensor.into_data().iter::<f64>().collect()
}

/// One `burn::optim::Adam` step with the moments restored from `state`.
///
/// Returns the parameter update and the learning rate used.
pub(super) fn update(
    config: &AdamConfig,
    state: &mut AdamState,
    params: &[f64],
    grad: &[f64],
) -> (Vec<f64>, f64) {
    let lr = scheduled_learning_rate(config.learning_rate, config.decay_rate, state.step);
    let device = NdArrayDevice::default();
    let flat = Flat::<Reverse> { values: Param::from_tensor(vector(params, &device)) };
    let id = flat.values.id;

    let mut optimizer = optim::AdamConfig::new()
        .with_beta_1(config.beta1 as f32)
        .with_beta_2(config.beta2 as f32)
        .with_epsilon(config.epsilon as f32)
        .init::<Reverse, Flat<Reverse>>();
    if state.step > 0 {
        let momentum = AdaptiveMomentumState::new(
            state.step as usize,
            vector::<NdArray<f64>>(&state.m, &device),
            vector::<NdArray<f64>>(&state.v, &device),
        );
        let record = AdaptorRecord::from_state(optim::AdamState::new(momentum));
        optimizer = optimizer.load_record([(id, record)].into_iter().collect());
    }

    let mut grads = GradientsParams::new();
    grads.register(id, vector::<NdArray<f64>>(grad, &device));
    let flat = optimizer.step(lr, flat, grads);

    if let Some(record) = optimizer.to_record().remove(&id) {
        let momentum = record.into_state::<1>().momentum;
        state.m = values(momentum.moment_1);
        state.v = values(momentum.moment_2);
    }
    state.step += 1;

    let update = values(flat.values.val())
        .into_iter()
        .zip(params)
        .map(|(new, old)| new - old)
        .collect();
    (update, lr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_step_has_learning_rate_magnitude() {
        let config = AdamConfig::default().with_learning_rate(0.1);
        let mut state = AdamState::new(2);
        let (update, lr) = update(&config, &mut state, &[1.0, 1.0], &[3.0, -0.5]);
        assert_relative_eq!(lr, 0.1);
        assert_relative_eq!(update[0], -0.1, epsilon = 1e-6);
        assert_relative_eq!(update[1], 0.1, epsilon = 1e-6);
        assert_eq!(state.step, 1);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let config = AdamConfig::default().with_learning_rate(0.05);
        let mut state = AdamState::new(1);
        let mut x = 2.0;
        for _ in 0..500 {
            let (u, _) = update(&config, &mut state, &[x], &[2.0 * (x - 0.5)]);
            x += u[0];
        }
        assert_relative_eq!(x, 0.5, epsilon = 1e-2);
    }

    #[test]
    fn test_split_run_matches_continuous_run() {
        let config = AdamConfig::default().with_learning_rate(0.05);
        let grads = [[0.3, -1.2], [0.1, -0.8], [-0.4, 0.5], [0.2, 0.2]];

        let mut continuous = AdamState::new(2);
        let mut x = vec![1.0, -1.0];
        for g in &grads {
            let (u, _) = update(&config, &mut continuous, &x, g);
            x.iter_mut().zip(&u).for_each(|(x, u)| *x += u);
        }

        let mut split = AdamState::new(2);
        let mut y = vec![1.0, -1.0];
        for g in &grads[..2] {
            let (u, _) = update(&config, &mut split, &y, g);
            y.iter_mut().zip(&u).for_each(|(y, u)| *y += u);
        }
        let mut split: AdamState = serde_json::from_str(&serde_json::to_string(&split).unwrap()).unwrap();
        for g in &grads[2..] {
            let (u, _) = update(&config, &mut split, &y, g);
            y.iter_mut().zip(&u).for_each(|(y, u)| *y += u);
        }

        assert_eq!(split, continuous);
        for (a, b) in x.iter().zip(&y) {
            assert_relative_eq!(a, b, epsilon = 1e-14);
        }
    }
}
