//! Memorizer: a resilient interval playback scheduler.
//!
//! Plays one clip (or alternates between two) on an expanding schedule and
//! keeps doing so across suspends, evictions and restarts.
//!
//! # Architecture
//!
//! - **Schedule**: interval table, the persisted [`ScheduleState`] and its store
//! - **Scheduler**: the single-writer [`SchedulerCore`] state machine and the
//!   tokio [`SchedulerRunner`] hosting it
//! - **Wake**: CPU wake leases with a hard ceiling
//! - **Focus**: arbitration of the shared output device
//! - **Alarm**: the OS-level safety net that relaunches the host
//! - **Audio**: clip decoding via `symphonia` and playback via `cpal`
//! - **Host**: newline-delimited JSON protocol for a presentation shell

pub mod alarm;
pub mod audio;
pub mod config;
pub mod error;
pub mod focus;
pub mod host;
pub mod memorizer_dirs;
pub mod schedule;
pub mod scheduler;
pub mod status;
pub mod wake;

mod worker;

pub use config::MemorizerConfig;
pub use error::{MemorizerError, Result};
pub use schedule::{IntervalTable, MediaRef, ScheduleState, ScheduleStatus};
pub use scheduler::{SchedulerCore, SchedulerEvent, SchedulerHandle, SchedulerRunner, WakeSource};
pub use status::StatusNotice;
