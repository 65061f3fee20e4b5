//! Safety-net alarms.
//!
//! The in-process timer is the primary wake source. Alongside it the
//! scheduler always arms one durable, OS-honored alarm for the same moment so
//! the schedule resumes even if this process is evicted in between. At most
//! one alarm is outstanding: arming replaces the previous one.

mod memory;
mod systemd;

pub use memory::MemoryAlarm;
pub use systemd::SystemdTimerAlarm;

use crate::config::{AlarmBackend, AlarmConfig};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifies the single outstanding alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyAlarmHandle {
    /// Increases with every arm; a newer handle always supersedes an older one.
    pub generation: u64,
    /// Epoch milliseconds the alarm fires at.
    pub fire_at_ms: u64,
}

/// Durable wake-up independent of this process's timers.
pub trait AlarmSafetyNet: Send {
    /// Replace any outstanding alarm with one firing at `fire_at_ms`.
    /// Must not block on the OS.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::Alarm`](crate::MemorizerError::Alarm) when the
    /// request is refused up front. A backend that reaches the OS in the
    /// background logs a later refusal and withdraws the handle.
    fn arm(&mut self, fire_at_ms: u64) -> Result<SafetyAlarmHandle>;

    /// Remove the outstanding alarm. A no-op when none exists.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::Alarm`](crate::MemorizerError::Alarm) when an
    /// existing alarm could not be removed.
    fn cancel(&mut self) -> Result<()>;

    /// The outstanding alarm, if any.
    fn outstanding(&self) -> Option<SafetyAlarmHandle>;
}

/// Build the configured alarm.
///
/// `resume_command` is what the OS runs when a systemd alarm fires.
pub fn create_alarm(
    config: &AlarmConfig,
    resume_command: Vec<String>,
    handle_path: PathBuf,
) -> Box<dyn AlarmSafetyNet> {
    match config.backend {
        AlarmBackend::Systemd => Box::new(SystemdTimerAlarm::new(
            config.unit_name.clone(),
            config.wake_system,
            resume_command,
            handle_path,
        )),
        AlarmBackend::Memory => Box::new(MemoryAlarm::new()),
    }
}
