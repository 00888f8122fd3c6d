//! Walkers and the persistent walker batch.

use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::systems::Molecule;
use crate::wavefunction::Ansatz;

/// One Markov chain: a configuration, its cached amplitude and its own RNG.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Walker {
    pub r: Vec<f64>,
    /// `−∞` until the first refresh and at nodes.
    #[serde(with = "crate::serde_float")]
    pub log_psi: f64,
    #[serde(with = "crate::serde_float")]
    pub sign: f64,
    pub accepted: u64,
    pub proposed: u64,
    rng: Xoshiro256PlusPlus,
}

impl Walker {
    fn new(r: Vec<f64>, rng: Xoshiro256PlusPlus) -> Self {
        Self { r, log_psi: f64::NEG_INFINITY, sign: 0.0, accepted: 0, proposed: 0, rng }
    }

    /// Recompute the cached amplitude with the given parameters.
    pub fn refresh<A: Ansatz>(&mut self, ansatz: &A, params: &[f64]) {
        let value = ansatz.log_psi(params, &self.r);
        self.log_psi = value.log_abs;
        self.sign = value.sign;
    }

    /// One all-electron Metropolis move. Returns whether it was accepted.
    ///
    /// Proposals with a non-finite or vanishing amplitude are rejected.
    pub fn step<A: Ansatz>(&mut self, ansatz: &A, params: &[f64], step_size: f64) -> bool {
        let rng = &mut self.rng;
        let proposal: Vec<f64> = self
            .r
            .iter()
            .map(|x| x + step_size * rng.sample::<f64, _>(StandardNormal))
            .collect();
        self.proposed += 1;

        let new = ansatz.log_psi(params, &proposal);
        if !new.log_abs.is_finite() || new.sign == 0.0 {
            return false;
        }
        let log_ratio = 2.0 * (new.log_abs - self.log_psi);
        if log_ratio >= 0.0 || self.rng.gen::<f64>() < log_ratio.exp() {
            self.r = proposal;
            self.log_psi = new.log_abs;
            self.sign = new.sign;
            self.accepted += 1;
            true
        } else {
            false
        }
    }
}

/// All walkers plus the shared adaptive step size.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WalkerBatch {
    pub walkers: Vec<Walker>,
    pub step_size: f64,
    /// Set after a parameter update; cleared by the extra burn-in.
    pub needs_reequilibration: bool,
    /// Sweeps performed since creation.
    pub sweeps: u64,
    pub(crate) window_accepted: u64,
    pub(crate) window_proposed: u64,
    pub(crate) window_sweeps: usize,
}

impl WalkerBatch {
    /// Walkers at the given configurations, each with an independent RNG
    /// stream derived from `seed`.
    pub fn new(configs: Vec<Vec<f64>>, seed: u64, step_size: f64) -> Self {
        let mut stream = Xoshiro256PlusPlus::seed_from_u64(seed);
        let walkers = configs
            .into_iter()
            .map(|r| {
                stream.jump();
                Walker::new(r, stream.clone())
            })
            .collect();
        Self {
            walkers,
            step_size,
            needs_reequilibration: false,
            sweeps: 0,
            window_accepted: 0,
            window_proposed: 0,
            window_sweeps: 0,
        }
    }

    /// Walkers scattered around the nuclei of `molecule`.
    pub fn from_molecule(
        molecule: &Molecule,
        n_walkers: usize,
        init_width: f64,
        seed: u64,
        step_size: f64,
    ) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let configs = (0..n_walkers)
            .map(|_| molecule.initial_configuration(&mut rng, init_width))
            .collect();
        // the walker streams start from a different seed than the initial positions
        Self::new(configs, seed.wrapping_add(1), step_size)
    }

    pub fn len(&self) -> usize {
        self.walkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.walkers.is_empty()
    }

    pub fn configurations(&self) -> Vec<&[f64]> {
        self.walkers.iter().map(|w| w.r.as_slice()).collect()
    }

    /// Recompute every cached amplitude.
    pub fn refresh<A: Ansatz>(&mut self, ansatz: &A, params: &[f64]) {
        self.walkers
            .par_iter_mut()
            .for_each(|w| w.refresh(ansatz, params));
    }

    /// Acceptance ratio over the whole lifetime of the batch.
    pub fn acceptance(&self) -> f64 {
        let (acc, prop) = self
            .walkers
            .iter()
            .fold((0, 0), |(a, p), w| (a + w.accepted, p + w.proposed));
        if prop == 0 {
            0.0
        } else {
            acc as f64 / prop as f64
        }
    }
}
