//! Durable storage for the active schedule.
//!
//! The scheduler is the only writer. The record is written on every state
//! transition and read back once when a wake arrives with no schedule in
//! memory (the process was restarted or evicted in between).

use crate::error::{MemorizerError, Result};
use crate::schedule::ScheduleState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Single-writer key/value store for [`ScheduleState`].
pub trait StateStore: Send {
    /// Read the persisted record. `Ok(None)` when nothing was ever written.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::StateCorruption`] when a record exists but
    /// cannot be decoded, or an I/O error when it cannot be read.
    fn load(&self) -> Result<Option<ScheduleState>>;

    /// Replace the persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be written.
    fn save(&mut self, state: &ScheduleState) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSchedule {
    #[serde(default = "default_schema_version")]
    version: u8,
    state: ScheduleState,
}

fn default_schema_version() -> u8 {
    1
}

/// JSON file store with atomic replace (write temp file, then rename).
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the default location (`config_dir()/schedule.json`).
    #[must_use]
    pub fn at_default_path() -> Self {
        Self::new(crate::memorizer_dirs::schedule_file())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<Option<ScheduleState>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MemorizerError::Persistence(format!(
                    "cannot read schedule state {}: {e}",
                    self.path.display()
                )));
            }
        };

        let record: PersistedSchedule = serde_json::from_slice(&bytes).map_err(|e| {
            MemorizerError::StateCorruption(format!(
                "cannot parse schedule state {}: {e}",
                self.path.display()
            ))
        })?;
        if record.version != default_schema_version() {
            return Err(MemorizerError::StateCorruption(format!(
                "unsupported schedule state version {}",
                record.version
            )));
        }
        Ok(Some(record.state))
    }

    fn save(&mut self, state: &ScheduleState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemorizerError::Persistence(format!("cannot create state dir: {e}"))
            })?;
        }

        let record = PersistedSchedule {
            version: default_schema_version(),
            state: state.clone(),
        };
        let json = serde_json::to_vec_pretty(&record).map_err(|e| {
            MemorizerError::Persistence(format!("cannot serialize schedule state: {e}"))
        })?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json).map_err(|e| {
            MemorizerError::Persistence(format!("cannot write schedule temp file: {e}"))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            MemorizerError::Persistence(format!("cannot finalize schedule file: {e}"))
        })?;
        Ok(())
    }
}

/// In-memory store. Clones share the same record, so a fresh scheduler built
/// from a clone sees exactly what a restarted process would read from disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Option<ScheduleState>>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record, if any.
    #[must_use]
    pub fn peek(&self) -> Option<ScheduleState> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<ScheduleState>> {
        let guard = self
            .inner
            .lock()
            .map_err(|e| MemorizerError::Persistence(format!("state lock poisoned: {e}")))?;
        Ok(guard.clone())
    }

    fn save(&mut self, state: &ScheduleState) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| MemorizerError::Persistence(format!("state lock poisoned: {e}")))?;
        *guard = Some(state.clone());
        Ok(())
    }
}
