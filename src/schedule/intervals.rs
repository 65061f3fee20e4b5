//! Expanding wait table between plays.

use crate::error::{MemorizerError, Result};
use std::time::Duration;

/// Ordered, immutable sequence of waits between plays.
///
/// Lookups past the end clamp to the last entry, so the final wait repeats
/// indefinitely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalTable {
    entries: Vec<Duration>,
}

impl IntervalTable {
    /// Build a table from explicit durations.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::Config`] when `entries` is empty or holds a
    /// zero duration.
    pub fn new(entries: Vec<Duration>) -> Result<Self> {
        if entries.is_empty() {
            return Err(MemorizerError::Config(
                "interval table must contain at least one entry".to_owned(),
            ));
        }
        if let Some(pos) = entries.iter().position(Duration::is_zero) {
            return Err(MemorizerError::Config(format!(
                "interval table entry {pos} must be greater than zero"
            )));
        }
        Ok(Self { entries })
    }

    /// Build a table from whole seconds.
    ///
    /// # Errors
    ///
    /// Same conditions as [`IntervalTable::new`].
    pub fn from_secs(secs: &[u64]) -> Result<Self> {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    /// Wait to apply after the play at `index`.
    #[must_use]
    pub fn delay_for(&self, index: usize) -> Duration {
        self.entries[index.min(self.last_index())]
    }

    /// Index to use for the following play; never shrinks, never leaves the table.
    #[must_use]
    pub fn next_index(&self, index: usize) -> usize {
        index.saturating_add(1).min(self.last_index())
    }

    /// Clamp an index read from storage into the table.
    #[must_use]
    pub fn clamp_index(&self, index: usize) -> usize {
        index.min(self.last_index())
    }

    #[must_use]
    pub fn last_index(&self) -> usize {
        self.entries.len() - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for IntervalTable {
    fn default() -> Self {
        Self {
            entries: [10, 60, 300, 600]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}
