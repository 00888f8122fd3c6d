//! Hamiltonian module - local energies of trial wavefunctions.
//!
//! The kinetic term is computed exactly from second-order dual numbers, one
//! pass per electron coordinate; the potential is a plain Coulomb sum.

mod molecular;
mod traits;

pub use molecular::{HarmonicTrap, MolecularHamiltonian};
pub use traits::{kinetic_energy, Hamiltonian, LocalEnergy};
