//! Automatic differentiation for wavefunction derivatives.
//!
//! Ansatz code is written once, generically over [`Scalar`], and evaluated
//! with three number types:
//!
//! - `f64` for plain amplitude evaluation inside the sampler,
//! - `num_dual::Dual2_64` for the gradient and Laplacian with respect to
//!   electron coordinates (forward mode, see [`gradient_and_laplacian`]),
//! - [`Var`] for gradients with respect to network parameters, recorded on
//!   burn's autodiff backend (reverse mode).
//!
//! `Var` handles live in a thread-local arena that is only valid inside a
//! [`TapeSession`] guard on the same thread; rayon workers each own theirs.

mod dual;
mod reverse;
mod scalar;

pub use dual::{gradient_and_laplacian, Derivatives};
pub use num_dual::Dual2_64;
pub use reverse::{Adjoints, Reverse, TapeSession, Var};
pub use scalar::Scalar;
