//! Events serialized into the scheduler, and read-only views out of it.

use crate::audio::PlaybackOutcome;
use crate::focus::FocusChange;
use crate::schedule::ScheduleStatus;
use serde::{Deserialize, Serialize};

/// What caused a wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeSource {
    /// The in-process timer.
    Timer,
    /// The OS-level safety-net alarm.
    SafetyNet,
    /// The host process (re)started.
    Restart,
}

/// Input to [`SchedulerCore::handle_at`](super::SchedulerCore::handle_at).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Begin a fresh schedule with one or two media references.
    Start { items: Vec<String> },
    /// Tear everything down and persist the schedule as stopped.
    Stop,
    /// Resume now, if anything is due.
    Wake { source: WakeSource },
    /// The playback issued for `cycle` ended.
    PlaybackFinished { cycle: u64, outcome: PlaybackOutcome },
    /// The focus grant issued for `cycle` changed.
    Focus { cycle: u64, change: FocusChange },
}

impl SchedulerEvent {
    /// Short name for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Stop => "stop",
            Self::Wake { .. } => "wake",
            Self::PlaybackFinished { .. } => "playback_finished",
            Self::Focus { .. } => "focus",
        }
    }
}

/// Point-in-time view of the schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub status: ScheduleStatus,
    pub items: Vec<String>,
    pub active_item_index: usize,
    pub interval_index: usize,
    /// Playback attempt counter of this process.
    pub cycle: u64,
    pub next_due_at_ms: Option<u64>,
}

/// Which scoped resources are currently outstanding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub timer: bool,
    pub alarm: bool,
    pub lease: bool,
    pub grant: bool,
    pub playback: bool,
}

impl ResourceReport {
    /// `true` when nothing at all is outstanding.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        !(self.timer || self.alarm || self.lease || self.grant || self.playback)
    }
}
