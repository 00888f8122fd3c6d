//! Log-domain determinants and signed log-sum-exp.

use crate::autodiff::Scalar;
use super::traits::LogPsi;

/// `log|det A|` and `sign(det A)` of a row-major `n × n` matrix.
///
/// LU decomposition with partial pivoting; pivots are chosen on values, so
/// the derivative information flows through the same elimination sequence.
/// A singular matrix returns `log|det| = −∞` and sign 0.
pub fn slogdet<S: Scalar>(mut a: Vec<S>, n: usize) -> LogPsi<S> {
    debug_assert_eq!(a.len(), n * n);
    if n == 0 {
        return LogPsi { log_abs: S::constant(0.0), sign: 1.0 };
    }
    let mut sign = 1.0;
    let mut log_diag = Vec::with_capacity(n);
    for k in 0..n {
        let pivot = (k..n)
            .max_by(|&i, &j| {
                a[i * n + k]
                    .value()
                    .abs()
                    .total_cmp(&a[j * n + k].value().abs())
            })
            .unwrap_or(k);
        let p = a[pivot * n + k].value();
        if p == 0.0 || !p.is_finite() {
            return LogPsi { log_abs: S::constant(f64::NEG_INFINITY), sign: 0.0 };
        }
        if pivot != k {
            for j in 0..n {
                a.swap(k * n + j, pivot * n + j);
            }
            sign = -sign;
        }
        let diag = a[k * n + k];
        if diag.value() < 0.0 {
            sign = -sign;
        }
        log_diag.push(diag.abs().ln());
        for i in (k + 1)..n {
            let factor = a[i * n + k] / diag;
            for j in (k + 1)..n {
                a[i * n + j] = a[i * n + j] - factor * a[k * n + j];
            }
        }
    }
    LogPsi { log_abs: S::sum(&log_diag), sign }
}

/// `log|Σ_d w_d s_d e^{l_d}|` and its sign for terms `(l_d, s_d)`.
///
/// The largest `l_d` is factored out by value before exponentiating.
pub fn signed_logsumexp<S: Scalar>(terms: &[LogPsi<S>], weights: &[S]) -> LogPsi<S> {
    debug_assert_eq!(terms.len(), weights.len());
    let shift = terms
        .iter()
        .filter(|t| t.sign != 0.0)
        .map(|t| t.log_abs.value())
        .fold(f64::NEG_INFINITY, f64::max);
    if !shift.is_finite() {
        return LogPsi { log_abs: S::constant(f64::NEG_INFINITY), sign: 0.0 };
    }
    let scaled: Vec<S> = terms
        .iter()
        .map(|t| {
            if t.sign == 0.0 {
                S::constant(0.0)
            } else {
                (t.log_abs - shift).exp() * t.sign
            }
        })
        .collect();
    let total = S::dot(&scaled, weights);
    let value = total.value();
    if value == 0.0 || !value.is_finite() {
        return LogPsi { log_abs: S::constant(f64::NEG_INFINITY), sign: 0.0 };
    }
    LogPsi {
        log_abs: total.abs().ln() + shift,
        sign: value.signum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::gradient_and_laplacian;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    #[test]
    fn test_slogdet_matches_nalgebra() {
        let data = vec![
            0.2, 1.5, -0.3, 0.7, //
            2.1, -0.4, 0.9, 0.1, //
            -1.2, 0.3, 0.5, 1.8, //
            0.6, 0.8, -2.2, 0.4,
        ];
        let reference = DMatrix::from_row_slice(4, 4, &data).determinant();
        let result = slogdet(data, 4);
        assert_relative_eq!(result.log_abs, reference.abs().ln(), epsilon = 1e-12);
        assert_eq!(result.sign, reference.signum());
    }

    #[test]
    fn test_slogdet_singular_and_empty() {
        let singular = slogdet(vec![1.0, 2.0, 2.0, 4.0], 2);
        assert_eq!(singular.sign, 0.0);
        assert_eq!(singular.log_abs, f64::NEG_INFINITY);

        let empty = slogdet::<f64>(Vec::new(), 0);
        assert_eq!(empty.log_abs, 0.0);
        assert_eq!(empty.sign, 1.0);
    }

    #[test]
    fn test_row_swap_flips_sign() {
        let a = vec![0.3, 1.0, -2.0, 0.5];
        let b = vec![-2.0, 0.5, 0.3, 1.0];
        let (da, db) = (slogdet(a, 2), slogdet(b, 2));
        assert_relative_eq!(da.log_abs, db.log_abs, epsilon = 1e-14);
        assert_eq!(da.sign, -db.sign);
    }

    #[test]
    fn test_log_det_gradient_is_inverse_transpose() {
        // ∂ log|det A| / ∂A_ij = (A⁻¹)_ji
        let data = [1.3, -0.2, 0.4, 0.8, 2.0, -0.5, 0.1, 0.6, 1.7];
        let grad = gradient_and_laplacian(&data, |a| slogdet(a.to_vec(), 3).log_abs).gradient;
        let inv = DMatrix::from_row_slice(3, 3, &data).try_inverse().unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(grad[i * 3 + j], inv[(j, i)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_signed_logsumexp() {
        let terms = [
            LogPsi { log_abs: 2.0_f64.ln(), sign: 1.0 },
            LogPsi { log_abs: 3.0_f64.ln(), sign: -1.0 },
        ];
        // 0.5 * 2 - 1.0 * 3 = -2
        let out = signed_logsumexp(&terms, &[0.5, 1.0]);
        assert_relative_eq!(out.log_abs, 2.0_f64.ln(), epsilon = 1e-14);
        assert_eq!(out.sign, -1.0);

        let large = [
            LogPsi { log_abs: 800.0, sign: 1.0 },
            LogPsi { log_abs: 799.0, sign: 1.0 },
        ];
        let out = signed_logsumexp(&large, &[1.0, 1.0]);
        assert_relative_eq!(out.log_abs, 800.0 + (1.0 + (-1.0_f64).exp()).ln(), epsilon = 1e-12);
    }
}
