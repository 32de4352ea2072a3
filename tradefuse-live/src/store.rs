//! Persisted position state: one JSON snapshot, single writer.
//!
//! Writes go to `{path}.tmp` and are renamed into place, so readers only ever
//! see a complete file. Saves are throttled; a save requested inside the
//! throttle window is kept as one trailing save that the owner flushes with
//! [`StateStore::flush_due`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tradefuse_core::domain::OrderId;

use crate::position::Position;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state serialization: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("state write to {path} timed out after {timeout:?}")]
    Timeout { path: PathBuf, timeout: Duration },
}

/// On-disk shape of the state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub tracked: BTreeMap<OrderId, Position>,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

impl PersistedState {
    pub fn new(tracked: BTreeMap<OrderId, Position>, updated_at: i64) -> Self {
        Self { tracked, updated_at }
    }

    pub fn open_count(&self) -> usize {
        self.tracked.values().filter(|p| p.open).count()
    }
}

/// What a save request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    Deferred,
}

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    throttle: Duration,
    write_timeout: Duration,
    last_write: Option<Instant>,
    pending: Option<PersistedState>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, throttle: Duration, write_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            throttle,
            write_timeout,
            last_write: None,
            pending: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Load the state file.
    ///
    /// A missing file is empty state. A corrupt file is moved aside to
    /// `{path}.quarantined` and also yields empty state.
    pub async fn load(&self) -> Result<PersistedState, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no state file; starting empty");
                return Ok(PersistedState::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match serde_json::from_slice::<PersistedState>(&bytes) {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    tracked = state.tracked.len(),
                    open = state.open_count(),
                    "state loaded"
                );
                Ok(state)
            }
            Err(e) => {
                let quarantine = with_suffix(&self.path, "quarantined");
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    quarantine = %quarantine.display(),
                    "corrupt state file; starting empty"
                );
                if let Err(err) = tokio::fs::rename(&self.path, &quarantine).await {
                    warn!(error = %err, "could not quarantine corrupt state file");
                }
                Ok(PersistedState::default())
            }
        }
    }

    /// Save now if outside the throttle window, otherwise keep as the trailing save.
    ///
    /// A newer request replaces an older pending one.
    pub async fn request_save(&mut self, state: PersistedState) -> Result<SaveOutcome, StoreError> {
        if self.within_throttle() {
            debug!("state save deferred");
            self.pending = Some(state);
            return Ok(SaveOutcome::Deferred);
        }
        self.pending = None;
        self.write(&state).await?;
        Ok(SaveOutcome::Written)
    }

    /// Write the trailing save once the throttle window has passed.
    pub async fn flush_due(&mut self) -> Result<bool, StoreError> {
        if self.pending.is_none() || self.within_throttle() {
            return Ok(false);
        }
        self.flush().await
    }

    /// Write the trailing save regardless of the throttle.
    pub async fn flush(&mut self) -> Result<bool, StoreError> {
        match self.pending.take() {
            Some(state) => {
                if let Err(e) = self.write(&state).await {
                    self.pending = Some(state);
                    return Err(e);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn within_throttle(&self) -> bool {
        self.last_write
            .is_some_and(|at| at.elapsed() < self.throttle)
    }

    async fn write(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(state)?;
        let fut = write_atomic(&self.path, json);
        match tokio::time::timeout(self.write_timeout, fut).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StoreError::Timeout {
                    path: self.path.clone(),
                    timeout: self.write_timeout,
                })
            }
        }
        self.last_write = Some(Instant::now());
        debug!(path = %self.path.display(), tracked = state.tracked.len(), "state written");
        Ok(())
    }
}

async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    }
    let tmp = with_suffix(path, "tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".");
    s.push(suffix);
    PathBuf::from(s)
}
