//! Atomic JSON checkpoints of the training state.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, VmcError};
use super::trainer::TrainState;

const PREFIX: &str = "checkpoint_";
const EXTENSION: &str = "json";

/// Writes and finds checkpoints in one directory.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    dir: PathBuf,
}

/// Write `bytes` to a temporary file, sync it, then rename it into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

/// Run `op`, retrying once after a failure.
fn retry_once<T>(what: &Path, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    op().or_else(|e| {
        tracing::warn!(path = %what.display(), error = %e, "checkpoint write failed, retrying");
        op()
    })
}

fn step_of(path: &Path) -> Option<u64> {
    if path.extension()? != EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()?.strip_prefix(PREFIX)?.parse().ok()
}

impl Checkpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| VmcError::Checkpoint { path: dir.clone(), source })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, step: u64) -> PathBuf {
        self.dir.join(format!("{PREFIX}{step:08}.{EXTENSION}"))
    }

    /// Persist `state`; a second consecutive failure is an error.
    pub fn save(&self, state: &TrainState) -> Result<PathBuf> {
        let path = self.path_for(state.step);
        let bytes = serde_json::to_vec(state)?;
        retry_once(&path, || write_atomic(&path, &bytes))
            .map_err(|source| VmcError::Checkpoint { path: path.clone(), source })?;
        tracing::info!(step = state.step, path = %path.display(), "checkpoint saved");
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<TrainState> {
        let bytes = fs::read(path).map_err(|source| VmcError::Checkpoint { path: path.to_path_buf(), source })?;
        let state = serde_json::from_slice(&bytes)
            .map_err(|source| VmcError::CorruptCheckpoint { path: path.to_path_buf(), source })?;
        tracing::info!(path = %path.display(), "checkpoint loaded");
        Ok(state)
    }

    /// Checkpoint with the highest step, if any.
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|source| VmcError::Checkpoint { path: self.dir.clone(), source })?;
        let mut best: Option<(u64, PathBuf)> = None;
        for entry in entries {
            let path = entry?.path();
            if let Some(step) = step_of(&path) {
                if best.as_ref().map_or(true, |(s, _)| step > *s) {
                    best = Some((step, path));
                }
            }
        }
        Ok(best.map(|(_, path)| path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{Optimizer, OptimizerConfig};
    use crate::sampling::WalkerBatch;
    use crate::wavefunction::{Ansatz, GaussianAnsatz};

    fn state(step: u64) -> TrainState {
        let ansatz = GaussianAnsatz::new(1, 0, 0.7);
        let params = ansatz.init_params(&mut rand::thread_rng());
        let optimizer = Optimizer::new(OptimizerConfig::default()).init(params.layout());
        let mut walkers = WalkerBatch::new(vec![vec![0.1, 0.2, 0.3]; 4], 7, 0.5);
        walkers.refresh(&ansatz, params.values());
        TrainState { step, params, optimizer, walkers }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path().join("ckpt")).unwrap();
        let original = state(12);
        let path = checkpointer.save(&original).unwrap();
        assert_eq!(path, checkpointer.path_for(12));
        assert!(!path.with_extension("json.tmp").exists());
        let loaded = Checkpointer::load(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_walker_at_a_node_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path()).unwrap();
        let mut original = state(3);
        original.walkers.walkers[1].log_psi = f64::NEG_INFINITY;
        original.walkers.walkers[1].sign = 0.0;
        let path = checkpointer.save(&original).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(r#""log_psi":"-inf""#));
        assert_eq!(Checkpointer::load(&path).unwrap(), original);
    }

    #[test]
    fn test_latest_picks_highest_step() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path()).unwrap();
        assert_eq!(checkpointer.latest().unwrap(), None);
        for step in [5, 120, 40] {
            checkpointer.save(&state(step)).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(checkpointer.latest().unwrap(), Some(checkpointer.path_for(120)));
    }

    #[test]
    fn test_persistent_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path().join("gone")).unwrap();
        fs::remove_dir_all(dir.path().join("gone")).unwrap();
        match checkpointer.save(&state(1)) {
            Err(VmcError::Checkpoint { path, .. }) => assert_eq!(path, checkpointer.path_for(1)),
            other => panic!("expected a checkpoint error, got {other:?}"),
        }
    }

    #[test]
    fn test_retry_recovers_from_one_failure() {
        let mut calls = 0;
        let result = retry_once(Path::new("x"), || {
            calls += 1;
            if calls == 1 {
                Err(io::Error::new(io::ErrorKind::Other, "transient"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_corrupt_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint_00000001.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Checkpointer::load(&path), Err(VmcError::CorruptCheckpoint { .. })));
    }
}
