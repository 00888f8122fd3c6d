//! Molecular system: fixed point-charge nuclei plus an electron count and spin.

use nalgebra::Vector3;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};

/// Nuclei, total charge and spin polarization of a molecule, in atomic units.
///
/// Electrons are ordered spin-up first: a configuration of
/// `n_up + n_down` electrons stores the `n_up` spin-up electrons before the
/// spin-down ones.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Molecule {
    /// Nuclear positions (Bohr)
    pub coords: Vec<Vector3<f64>>,
    /// Nuclear charges
    pub charges: Vec<f64>,
    /// Total molecular charge
    #[serde(default)]
    pub charge: i32,
    /// Number of unpaired electrons, `n_up - n_down`
    #[serde(default)]
    pub spin: u32,
}

impl Molecule {
    /// Create and validate a molecule.
    pub fn new(coords: Vec<Vector3<f64>>, charges: Vec<f64>, charge: i32, spin: u32) -> Result<Self> {
        let mol = Self { coords, charges, charge, spin };
        mol.validate()?;
        Ok(mol)
    }

    /// Built-in molecules by name: `H`, `He`, `Li`, `Be`, `H2`, `LiH`, `H4`.
    pub fn from_name(name: &str) -> Result<Self> {
        let z = Vector3::zeros;
        match name {
            "H" => Self::new(vec![z()], vec![1.0], 0, 1),
            "He" => Self::new(vec![z()], vec![2.0], 0, 0),
            "Li" => Self::new(vec![z()], vec![3.0], 0, 1),
            "Be" => Self::new(vec![z()], vec![4.0], 0, 0),
            "H2" => Self::new(
                vec![Vector3::new(0.0, 0.0, -0.7), Vector3::new(0.0, 0.0, 0.7)],
                vec![1.0, 1.0],
                0,
                0,
            ),
            "LiH" => Self::new(vec![z(), Vector3::new(3.015, 0.0, 0.0)], vec![3.0, 1.0], 0, 0),
            "H4" => Self::new(
                (0..4).map(|i| Vector3::new(0.0, 0.0, 1.8 * i as f64 - 2.7)).collect(),
                vec![1.0; 4],
                0,
                0,
            ),
            _ => Err(VmcError::InvalidSystem(format!("unknown molecule name {name:?}"))),
        }
    }

    /// Check that the electron count is compatible with the spin and that the
    /// nuclear input is well formed.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(VmcError::InvalidSystem(msg));
        if self.coords.is_empty() {
            return invalid("at least one nucleus is required".into());
        }
        if self.coords.len() != self.charges.len() {
            return invalid(format!(
                "{} nuclear positions but {} charges",
                self.coords.len(),
                self.charges.len()
            ));
        }
        if let Some(z) = self.charges.iter().find(|z| !(z.is_finite() && **z > 0.0 && z.fract() == 0.0)) {
            return invalid(format!("nuclear charges must be positive integers, got {z}"));
        }
        if self.coords.iter().any(|r| r.iter().any(|x| !x.is_finite())) {
            return invalid("nuclear positions must be finite".into());
        }
        for i in 0..self.coords.len() {
            for j in (i + 1)..self.coords.len() {
                if (self.coords[i] - self.coords[j]).norm() < 1e-6 {
                    return invalid(format!("nuclei {i} and {j} coincide"));
                }
            }
        }
        let total: f64 = self.charges.iter().sum();
        let n = total as i64 - self.charge as i64;
        if n < 1 {
            return invalid(format!("charge {} leaves no electrons", self.charge));
        }
        if (self.spin as i64) > n {
            return invalid(format!("spin {} exceeds electron count {n}", self.spin));
        }
        if (n - self.spin as i64) % 2 != 0 {
            return invalid(format!("spin {} is incompatible with {n} electrons", self.spin));
        }
        Ok(())
    }

    pub fn n_nuclei(&self) -> usize {
        self.coords.len()
    }

    pub fn n_electrons(&self) -> usize {
        (self.charges.iter().sum::<f64>() as i64 - self.charge as i64) as usize
    }

    pub fn n_up(&self) -> usize {
        (self.n_electrons() + self.spin as usize) / 2
    }

    pub fn n_down(&self) -> usize {
        (self.n_electrons() - self.spin as usize) / 2
    }

    /// Nuclear-nuclear repulsion energy (constant).
    pub fn nuclear_repulsion(&self) -> f64 {
        let n = self.n_nuclei();
        (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| self.charges[i] * self.charges[j] / (self.coords[i] - self.coords[j]).norm())
            .sum()
    }

    /// Nucleus index for each electron, spin-up electrons first.
    ///
    /// Electrons fill the nucleus with the most remaining charge, alternating
    /// spins, so neutral atoms start out close to their ground-state occupation.
    pub fn electron_assignment(&self) -> Vec<usize> {
        let mut remaining = self.charges.clone();
        let (n_up, n_down) = (self.n_up(), self.n_down());
        let mut up = Vec::with_capacity(n_up);
        let mut down = Vec::with_capacity(n_down);
        while up.len() < n_up || down.len() < n_down {
            let target = remaining
                .iter()
                .enumerate()
                .fold(0, |best, (i, &q)| if q > remaining[best] { i } else { best });
            remaining[target] -= 1.0;
            if (up.len() <= down.len() && up.len() < n_up) || down.len() == n_down {
                up.push(target);
            } else {
                down.push(target);
            }
        }
        up.extend(down);
        up
    }

    /// Random initial configuration: a Gaussian cloud of width `width` around
    /// each electron's assigned nucleus.
    pub fn initial_configuration<R: Rng + ?Sized>(&self, rng: &mut R, width: f64) -> Vec<f64> {
        let mut jitter = || width * rng.sample::<f64, _>(StandardNormal);
        self.electron_assignment()
            .into_iter()
            .flat_map(|nucleus| {
                let center = self.coords[nucleus];
                [
                    center.x + jitter(),
                    center.y + jitter(),
                    center.z + jitter(),
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_electron_counts() {
        let li = Molecule::from_name("Li").unwrap();
        assert_eq!(li.n_electrons(), 3);
        assert_eq!(li.n_up(), 2);
        assert_eq!(li.n_down(), 1);

        let lih = Molecule::from_name("LiH").unwrap();
        assert_eq!(lih.n_up(), 2);
        assert_eq!(lih.n_down(), 2);
    }

    #[test]
    fn test_inconsistent_spin_is_rejected() {
        let err = Molecule::new(vec![Vector3::zeros()], vec![2.0], 0, 1).unwrap_err();
        assert!(matches!(err, VmcError::InvalidSystem(_)));
        assert!(Molecule::new(vec![Vector3::zeros()], vec![1.0], 1, 0).is_err());
        assert!(Molecule::new(vec![Vector3::zeros()], vec![1.0, 1.0], 0, 0).is_err());
        assert!(Molecule::new(vec![Vector3::zeros()], vec![1.5], 0, 0).is_err());
        assert!(Molecule::from_name("Unobtainium").is_err());
    }

    #[test]
    fn test_nuclear_repulsion() {
        let h2 = Molecule::from_name("H2").unwrap();
        assert_relative_eq!(h2.nuclear_repulsion(), 1.0 / 1.4, epsilon = 1e-12);
        let he = Molecule::from_name("He").unwrap();
        assert_eq!(he.nuclear_repulsion(), 0.0);
    }

    #[test]
    fn test_electron_assignment_follows_charges() {
        let lih = Molecule::from_name("LiH").unwrap();
        let assignment = lih.electron_assignment();
        assert_eq!(assignment.len(), 4);
        let on_li = assignment.iter().filter(|&&i| i == 0).count();
        assert_eq!(on_li, 3);

        let h2 = Molecule::from_name("H2").unwrap();
        assert_eq!(h2.electron_assignment(), vec![0, 1]);
    }

    #[test]
    fn test_initial_configuration_shape() {
        let mol = Molecule::from_name("Be").unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let r = mol.initial_configuration(&mut rng, 0.5);
        assert_eq!(r.len(), 3 * 4);
        assert!(r.iter().all(|x| x.is_finite()));
    }
}
