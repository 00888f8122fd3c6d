//! Error type shared across the crate.

use std::path::PathBuf;

/// Errors surfaced to the training loop or its caller.
///
/// Per-walker numerical failures (non-finite amplitudes or local energies) are
/// not errors: the sampler rejects such proposals and the estimator drops such
/// samples.
#[derive(Debug, thiserror::Error)]
pub enum VmcError {
    /// Inconsistent molecular input, detected before any sampling.
    #[error("invalid molecular system: {0}")]
    InvalidSystem(String),

    /// Configuration that failed validation at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A checkpoint could not be written or read.
    #[error("checkpoint {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A checkpoint file exists but does not decode.
    #[error("corrupt checkpoint {path}: {source}")]
    CorruptCheckpoint {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The energy diverged and the divergence guard is configured as fatal.
    #[error("energy diverged at step {step}: {energy}")]
    Diverged { step: u64, energy: f64 },

    /// The metrics sink failed.
    #[error("metrics sink: {0}")]
    Metrics(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VmcError>;
