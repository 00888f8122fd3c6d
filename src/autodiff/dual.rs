//! Coordinate derivatives with second-order dual numbers from `num-dual`.
//!
//! A [`Dual2_64`] carries a value with its first and second derivative along
//! one seeded direction. Seeding each coordinate in turn yields the gradient
//! and the diagonal of the Hessian, whose sum is the Laplacian.

use num_dual::{Dual2_64, DualNum};

use super::scalar::Scalar;

impl Scalar for Dual2_64 {
    fn constant(value: f64) -> Self {
        Dual2_64::new(value, 0.0, 0.0)
    }

    fn value(&self) -> f64 {
        self.re
    }

    fn exp(self) -> Self {
        <Self as DualNum<f64>>::exp(&self)
    }

    fn ln(self) -> Self {
        <Self as DualNum<f64>>::ln(&self)
    }

    fn sqrt(self) -> Self {
        <Self as DualNum<f64>>::sqrt(&self)
    }

    fn recip(self) -> Self {
        <Self as DualNum<f64>>::recip(&self)
    }
}

/// Value, gradient and Laplacian of a scalar function of many variables.
#[derive(Clone, Debug, PartialEq)]
pub struct Derivatives {
    pub value: f64,
    pub gradient: Vec<f64>,
    pub laplacian: f64,
}

/// Differentiate `f` at `x` with one dual pass per coordinate.
pub fn gradient_and_laplacian<F>(x: &[f64], f: F) -> Derivatives
where
    F: Fn(&[Dual2_64]) -> Dual2_64,
{
    let mut seeded: Vec<Dual2_64> = x.iter().map(|&v| <Dual2_64 as Scalar>::constant(v)).collect();
    if seeded.is_empty() {
        return Derivatives { value: f(&seeded).re, gradient: Vec::new(), laplacian: 0.0 };
    }
    let mut value = 0.0;
    let mut gradient = Vec::with_capacity(x.len());
    let mut laplacian = 0.0;
    for k in 0..seeded.len() {
        seeded[k].v1 = 1.0;
        let y = f(&seeded);
        seeded[k].v1 = 0.0;
        value = y.re;
        gradient.push(y.v1);
        laplacian += y.v2;
    }
    Derivatives { value, gradient, laplacian }
}
