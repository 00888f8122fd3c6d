//! Systems module - molecular input for QMC calculations.

mod molecule;

pub use molecule::Molecule;
