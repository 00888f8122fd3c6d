//! The numeric trait shared by plain, forward-mode and reverse-mode evaluation.

use std::f64::consts::LN_2;
use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A differentiable real number.
///
/// Implementors provide the four primitive functions below; the activations
/// are composed from them, so a forward- or reverse-mode number type gets
/// their derivatives for free.
pub trait Scalar:
    Copy
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
{
    /// Lift a constant with zero derivative.
    fn constant(value: f64) -> Self;

    /// Primal value.
    fn value(&self) -> f64;

    fn exp(self) -> Self;

    fn ln(self) -> Self;

    fn sqrt(self) -> Self;

    fn recip(self) -> Self;

    /// Fused inner product `Σᵢ aᵢ bᵢ`.
    fn dot(a: &[Self], b: &[Self]) -> Self {
        debug_assert_eq!(a.len(), b.len());
        a.iter()
            .zip(b)
            .fold(Self::constant(0.0), |acc, (&x, &y)| acc + x * y)
    }

    /// Sum of a slice.
    fn sum(xs: &[Self]) -> Self {
        xs.iter().fold(Self::constant(0.0), |acc, &x| acc + x)
    }

    /// `|x|`, with the branch selected by the sign of the value.
    fn abs(self) -> Self {
        if self.value() < 0.0 {
            -self
        } else {
            self
        }
    }

    /// `ln(1 + eˣ)`, evaluated without overflow.
    fn softplus(self) -> Self {
        if self.value() > 0.0 {
            self + ((-self).exp() + 1.0).ln()
        } else {
            (self.exp() + 1.0).ln()
        }
    }

    /// Shifted softplus `ln(1 + eˣ) − ln 2`, zero at the origin.
    fn ssp(self) -> Self {
        self.softplus() - LN_2
    }
}

impl Scalar for f64 {
    fn constant(value: f64) -> Self {
        value
    }

    fn value(&self) -> f64 {
        *self
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn ln(self) -> Self {
        f64::ln(self)
    }

    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    fn recip(self) -> Self {
        f64::recip(self)
    }

    fn dot(a: &[Self], b: &[Self]) -> Self {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    fn softplus(self) -> Self {
        if self > 0.0 {
            self + f64::exp(-self).ln_1p()
        } else {
            f64::exp(self).ln_1p()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_f64_elementary_functions() {
        let x = 0.7_f64;
        assert_relative_eq!(Scalar::exp(x), x.exp(), epsilon = 1e-14);
        assert_relative_eq!(Scalar::ln(x), x.ln(), epsilon = 1e-14);
        assert_relative_eq!(Scalar::recip(x), 1.0 / x, epsilon = 1e-14);
        assert_relative_eq!(Scalar::ssp(0.0_f64), 0.0, epsilon = 1e-14);
        assert_relative_eq!(Scalar::abs(-2.5_f64), 2.5, epsilon = 1e-14);
    }

    #[test]
    fn test_softplus_is_stable_for_large_arguments() {
        assert_relative_eq!(Scalar::softplus(800.0_f64), 800.0, epsilon = 1e-12);
        assert!(Scalar::softplus(-800.0_f64) >= 0.0);
        assert!(Scalar::softplus(-800.0_f64).is_finite());
    }

    #[test]
    fn test_f64_dot() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        assert_relative_eq!(<f64 as Scalar>::dot(&a, &b), 32.0);
    }
}
