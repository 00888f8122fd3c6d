//! Statistics of correlated Monte Carlo series.

use serde::{Deserialize, Serialize};

/// Mean, blocking error and integrated autocorrelation time of a series.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub mean: f64,
    pub error: f64,
    pub autocorrelation_time: f64,
    pub n_samples: usize,
}

impl SeriesStats {
    pub fn from_series(series: &[f64]) -> Self {
        let autocorrelation_time = autocorrelation_time(series);
        Self {
            mean: mean(series),
            error: blocking_error(series, autocorrelation_time),
            autocorrelation_time,
            n_samples: series.len(),
        }
    }
}

pub fn mean(series: &[f64]) -> f64 {
    if series.is_empty() {
        return f64::NAN;
    }
    series.iter().sum::<f64>() / series.len() as f64
}

/// Population variance.
pub fn variance(series: &[f64]) -> f64 {
    let m = mean(series);
    series.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / series.len() as f64
}

/// Estimate autocorrelation time using initial positive sequence.
pub fn autocorrelation_time(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return 1.0;
    }
    let mean = mean(series);
    let var = variance(series);
    if var == 0.0 {
        return 1.0;
    }

    let mut tau = 1.0;
    for t in 1..n / 2 {
        let rho: f64 = series[..n - t]
            .iter()
            .zip(&series[t..])
            .map(|(&x, &y)| (x - mean) * (y - mean))
            .sum::<f64>()
            / ((n - t) as f64 * var);

        if rho < 0.0 {
            break;
        }
        tau += 2.0 * rho;
    }
    tau
}

/// Naive standard error `√(var / (n − 1))`, NaN for fewer than two samples.
pub fn standard_error(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return f64::NAN;
    }
    (variance(series) / (n - 1) as f64).sqrt()
}

/// Standard error of the mean from blocks of length `⌈2τ⌉`.
///
/// Series too short for two blocks fall back to [`standard_error`], which
/// ignores correlations.
pub fn blocking_error(series: &[f64], autocorrelation_time: f64) -> f64 {
    let block_size = ((2.0 * autocorrelation_time).ceil() as usize).max(1);
    let n_blocks = series.len() / block_size;
    if n_blocks < 2 {
        return standard_error(series);
    }

    let block_means: Vec<f64> = series
        .chunks_exact(block_size)
        .map(|block| block.iter().sum::<f64>() / block_size as f64)
        .collect();

    let mean = mean(&block_means);
    let var = block_means.iter().map(|&x| (x - mean).powi(2)).sum::<f64>()
        / (n_blocks - 1) as f64;
    (var / n_blocks as f64).sqrt()
}
