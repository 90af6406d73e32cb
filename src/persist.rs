//! End-of-run artifacts and policy snapshots on disk (feature `serde`).
//!
//! A run leaves three independently written JSON artifacts, each consumable
//! on its own by downstream tooling:
//!
//! - policy timing: seconds spent inside the policy, one entry per round,
//! - round records: `(problem, outcome, engine, total_elapsed)` per round,
//! - elapsed times: the bare per-round elapsed-seconds list.
//!
//! The elapsed list is redundant with the records by construction; it exists
//! because the cheapest consumers only want the timing column. All three are
//! plain JSON arrays, plus a separate snapshot file for the policy itself.
//!
//! Writes go through a temp file in the target directory followed by a
//! rename, so a crash mid-write never leaves a truncated artifact behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::dispatch::RunLog;
use crate::policy::PolicySnapshot;

/// Failures while reading or writing artifacts.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem-level failure.
    #[error("artifact i/o failed for {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// JSON encode/decode failure.
    #[error("artifact (de)serialization failed for {path}: {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let body = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut f = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        f.write_all(&body).map_err(io_err(&tmp))?;
        f.sync_all().map_err(io_err(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_err(path))?;
    tracing::debug!(path = %path.display(), bytes = body.len(), "artifact written");
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let body = fs::read(path).map_err(io_err(path))?;
    serde_json::from_slice(&body).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// The three per-run artifact paths under one directory, sharing a stem
/// (e.g. stem `run` gives `run_policy_times.json`, `run_records.json`,
/// `run_times.json`).
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    /// Per-round policy timing list.
    pub policy_times: PathBuf,
    /// Full round record list.
    pub records: PathBuf,
    /// Elapsed-only list.
    pub times: PathBuf,
}

impl ArtifactPaths {
    /// Derive the three paths from a directory and a file stem.
    pub fn new(dir: impl AsRef<Path>, stem: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            policy_times: dir.join(format!("{stem}_policy_times.json")),
            records: dir.join(format!("{stem}_records.json")),
            times: dir.join(format!("{stem}_times.json")),
        }
    }
}

/// Write the three run artifacts, each as its own JSON file.
///
/// Each file is written independently; a failure on one leaves any already
/// written artifacts in place.
pub fn write_run_artifacts(log: &RunLog, paths: &ArtifactPaths) -> Result<(), PersistError> {
    write_json(&paths.policy_times, &log.policy_times)?;
    write_json(&paths.records, &log.rounds)?;
    write_json(&paths.times, &log.elapsed_times())?;
    tracing::info!(
        rounds = log.rounds.len(),
        solved = log.solved_count(),
        "run artifacts written"
    );
    Ok(())
}

/// Write a policy snapshot as JSON.
pub fn write_snapshot(snap: &PolicySnapshot, path: impl AsRef<Path>) -> Result<(), PersistError> {
    write_json(path.as_ref(), snap)
}

/// Read back a policy snapshot written by [`write_snapshot`].
///
/// Shape validation against a live policy happens in
/// [`HybridLinUcb::restore`][crate::HybridLinUcb::restore], not here.
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<PolicySnapshot, PersistError> {
    read_json(path.as_ref())
}
