//! Per-iteration metrics, their sinks and the divergence guard.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::estimator::EnergyStats;
use crate::optimizer::StepStats;
use crate::sampling::SampleStats;

/// Everything reported about one training iteration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepMetrics {
    /// Iteration number after the update, starting at 1.
    pub step: u64,
    pub energy: EnergyStats,
    pub sampler: SampleStats,
    pub optimizer: StepStats,
    /// Set by the divergence guard.
    pub diverged: bool,
}

/// Destination for training metrics.
pub trait MetricsSink {
    fn record(&mut self, metrics: &StepMetrics) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Logs every iteration at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&mut self, m: &StepMetrics) -> Result<()> {
        tracing::info!(
            step = m.step,
            energy = m.energy.mean,
            std_error = m.energy.std_error,
            variance = m.energy.variance,
            acceptance = m.sampler.acceptance,
            step_size = m.sampler.step_size,
            lr = m.optimizer.learning_rate,
            grad_norm = m.optimizer.grad_norm,
            update_norm = m.optimizer.update_norm,
            param_norm = m.optimizer.param_norm,
            damping = ?m.optimizer.damping,
            n_excluded = m.energy.n_excluded,
            n_nonfinite = m.energy.n_nonfinite,
            "training step"
        );
        Ok(())
    }
}

/// One JSON object per line, appended to a file.
pub struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { writer: BufWriter::new(file) })
    }
}

impl MetricsSink for JsonLinesSink {
    fn record(&mut self, metrics: &StepMetrics) -> Result<()> {
        serde_json::to_writer(&mut self.writer, metrics)?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| VmcError::Metrics(e.to_string()))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| VmcError::Metrics(e.to_string()))
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub records: Vec<StepMetrics>,
}

impl MetricsSink for MemorySink {
    fn record(&mut self, metrics: &StepMetrics) -> Result<()> {
        self.records.push(metrics.clone());
        Ok(())
    }
}

impl MetricsSink for Vec<Box<dyn MetricsSink>> {
    fn record(&mut self, metrics: &StepMetrics) -> Result<()> {
        self.iter_mut().try_for_each(|sink| sink.record(metrics))
    }

    fn flush(&mut self) -> Result<()> {
        self.iter_mut().try_for_each(|sink| sink.flush())
    }
}

fn default_window() -> usize {
    20
}

fn default_tolerance() -> f64 {
    1.0
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DivergenceConfig {
    /// Iterations per averaging window.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Allowed rise of the latest window mean over the best earlier one (Hartree).
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Abort training when divergence is detected.
    #[serde(default)]
    pub fatal: bool,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self { window: default_window(), tolerance: default_tolerance(), fatal: false }
    }
}

impl DivergenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(VmcError::InvalidConfig("training.divergence.window must be positive".into()));
        }
        if !(self.tolerance > 0.0) {
            return Err(VmcError::InvalidConfig(
                "training.divergence.tolerance must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Compares the mean energy of the latest window with the best mean of the
/// disjoint windows that ended before it.
///
/// Only the current window and the most recent completed window are kept; a
/// completed window joins `best` once the sliding window no longer overlaps
/// it.
#[derive(Debug, Clone)]
pub struct DivergenceMonitor {
    config: DivergenceConfig,
    recent: VecDeque<f64>,
    pending: Option<f64>,
    best: f64,
    count: u64,
}

impl DivergenceMonitor {
    pub fn new(config: DivergenceConfig) -> Self {
        Self {
            recent: VecDeque::with_capacity(config.window),
            config,
            pending: None,
            best: f64::INFINITY,
            count: 0,
        }
    }

    pub fn config(&self) -> &DivergenceConfig {
        &self.config
    }

    /// Record the energy of one iteration; returns whether training diverged.
    pub fn observe(&mut self, energy: f64) -> bool {
        if !energy.is_finite() {
            return true;
        }
        let w = self.config.window;
        if self.recent.len() == w {
            self.recent.pop_front();
        }
        self.recent.push_back(energy);
        self.count += 1;

        let latest = self.recent.iter().sum::<f64>() / w as f64;
        if self.count % w as u64 == 0 {
            if let Some(previous) = self.pending.replace(latest) {
                self.best = self.best.min(previous);
            }
        }
        if self.count < 2 * w as u64 {
            return false;
        }
        latest - self.best > self.config.tolerance
    }
}
