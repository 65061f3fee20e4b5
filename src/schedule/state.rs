//! The single active schedule and the media it alternates between.

use crate::error::{MemorizerError, Result};
use crate::schedule::IntervalTable;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Reference to a playable clip (a file path or URI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(String);

impl MediaRef {
    /// Parse a reference, rejecting blank input.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::InvalidInput`] for empty or whitespace-only input.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(MemorizerError::InvalidInput(
                "media reference cannot be empty".to_owned(),
            ));
        }
        Ok(Self(trimmed.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The reference as a filesystem path (a `file://` prefix is stripped).
    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(self.0.strip_prefix("file://").unwrap_or(&self.0))
    }
}

impl std::fmt::Display for MediaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the schedule is in its cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    #[default]
    Idle,
    Playing,
    Waiting,
    Stopped,
}

impl ScheduleStatus {
    /// Whether a wake for this status should resume the schedule.
    #[must_use]
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Playing | Self::Waiting)
    }
}

/// Flat persisted record of the active schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    /// One or two clips; with two the schedule alternates between them.
    pub items: Vec<MediaRef>,
    /// Alternation pointer into `items`.
    #[serde(default)]
    pub active_item_index: usize,
    /// Position in the interval table; never decreases within a run.
    #[serde(default)]
    pub interval_index: usize,
    #[serde(default)]
    pub status: ScheduleStatus,
    /// Epoch milliseconds of the pending wake while `Waiting`.
    #[serde(default)]
    pub next_due_at_ms: Option<u64>,
}

impl ScheduleState {
    /// Largest number of clips a schedule alternates between.
    pub const MAX_ITEMS: usize = 2;

    /// Fresh schedule at the start of the table, about to play `items[0]`.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::InvalidInput`] unless there are one or two items.
    pub fn new(items: Vec<MediaRef>) -> Result<Self> {
        if items.is_empty() {
            return Err(MemorizerError::InvalidInput(
                "at least one media reference is required".to_owned(),
            ));
        }
        if items.len() > Self::MAX_ITEMS {
            return Err(MemorizerError::InvalidInput(format!(
                "at most {} media references are supported, got {}",
                Self::MAX_ITEMS,
                items.len()
            )));
        }
        Ok(Self {
            items,
            active_item_index: 0,
            interval_index: 0,
            status: ScheduleStatus::Playing,
            next_due_at_ms: None,
        })
    }

    /// Clip the next play will use.
    #[must_use]
    pub fn current_item(&self) -> &MediaRef {
        &self.items[self.active_item_index.min(self.items.len() - 1)]
    }

    /// Move the alternation pointer to the other clip, if there is one.
    pub fn flip_active(&mut self) {
        if self.items.len() == Self::MAX_ITEMS {
            self.active_item_index = 1 - self.active_item_index.min(1);
        }
    }

    /// Check a record read back from storage, clamping the interval index
    /// into `table` (the table may have been shortened since it was written).
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::StateCorruption`] for a record that cannot be
    /// resumed.
    pub fn validated(mut self, table: &IntervalTable) -> Result<Self> {
        if self.items.is_empty() || self.items.len() > Self::MAX_ITEMS {
            return Err(MemorizerError::StateCorruption(format!(
                "expected 1-{} items, found {}",
                Self::MAX_ITEMS,
                self.items.len()
            )));
        }
        if self.items.iter().any(|item| item.as_str().trim().is_empty()) {
            return Err(MemorizerError::StateCorruption(
                "blank media reference".to_owned(),
            ));
        }
        if self.active_item_index >= self.items.len() {
            return Err(MemorizerError::StateCorruption(format!(
                "active item {} out of range for {} items",
                self.active_item_index,
                self.items.len()
            )));
        }
        if self.status == ScheduleStatus::Waiting && self.next_due_at_ms.is_none() {
            return Err(MemorizerError::StateCorruption(
                "waiting schedule has no due time".to_owned(),
            ));
        }
        let clamped = table.clamp_index(self.interval_index);
        if clamped != self.interval_index {
            tracing::warn!(
                stored = self.interval_index,
                clamped,
                "interval index beyond table; clamping"
            );
            self.interval_index = clamped;
        }
        Ok(self)
    }
}
