//! Configuration types for the interval playback scheduler.

use crate::error::{MemorizerError, Result};
use crate::focus::FocusPriority;
use crate::schedule::IntervalTable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorizerConfig {
    /// Interval table and retry timing.
    pub schedule: ScheduleConfig,
    /// CPU wake lease settings.
    pub wake: WakeConfig,
    /// Output focus settings.
    pub focus: FocusConfig,
    /// Safety-net alarm settings.
    pub alarm: AlarmConfig,
    /// Audio output settings.
    pub audio: AudioConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Interval table and retry timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Wait between plays, in seconds. The last entry repeats indefinitely.
    pub intervals_secs: Vec<u64>,
    /// Fixed retry delay after the output device refused focus.
    pub focus_retry_secs: u64,
    /// A wake this close to (or past) the due time counts as on time.
    pub early_wake_tolerance_ms: u64,
    /// How often countdown notices are emitted while waiting.
    pub countdown_interval_secs: u64,
    /// A clip still playing after this long is cut off and counted as failed.
    pub max_play_secs: u64,
    /// Delay of the resume alarm left behind when the host exits mid-clip.
    pub shutdown_resume_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            intervals_secs: vec![10, 60, 300, 600],
            focus_retry_secs: 10,
            early_wake_tolerance_ms: 2_000,
            countdown_interval_secs: 1,
            max_play_secs: 600,
            shutdown_resume_secs: 10,
        }
    }
}

impl ScheduleConfig {
    /// Build the interval table described by `intervals_secs`.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::Config`] for an empty table or a zero entry.
    pub fn interval_table(&self) -> Result<IntervalTable> {
        IntervalTable::from_secs(&self.intervals_secs)
    }

    /// Focus retry delay as a [`Duration`].
    #[must_use]
    pub fn focus_retry(&self) -> Duration {
        Duration::from_secs(self.focus_retry_secs)
    }

    /// Longest a single play may run.
    #[must_use]
    pub fn max_play(&self) -> Duration {
        Duration::from_secs(self.max_play_secs)
    }

    /// Resume alarm delay after an exit mid-clip.
    #[must_use]
    pub fn shutdown_resume(&self) -> Duration {
        Duration::from_secs(self.shutdown_resume_secs)
    }
}

/// Which wake lock implementation to use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeBackend {
    /// Hold a `systemd-inhibit` sleep inhibitor while the lease is held.
    #[default]
    Inhibitor,
    /// Track the lease without touching the OS.
    None,
}

/// CPU wake lease settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Hard ceiling for a single lease; it expires on its own after this.
    pub lease_ceiling_secs: u64,
    /// Wake lock implementation.
    pub backend: WakeBackend,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            lease_ceiling_secs: 120,
            backend: WakeBackend::default(),
        }
    }
}

impl WakeConfig {
    /// Lease ceiling as a [`Duration`].
    #[must_use]
    pub fn lease_ceiling(&self) -> Duration {
        Duration::from_secs(self.lease_ceiling_secs)
    }
}

/// Output focus settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Priority requested for every play.
    pub priority: FocusPriority,
}

/// Which safety-net alarm implementation to use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmBackend {
    /// Transient `systemd-run --user` timer that relaunches the host.
    #[default]
    Systemd,
    /// In-memory only; does not survive process death.
    Memory,
}

/// Safety-net alarm settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// Alarm implementation.
    pub backend: AlarmBackend,
    /// Base name of the transient timer units.
    pub unit_name: String,
    /// Ask the OS to resume from suspend when the alarm fires.
    pub wake_system: bool,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            backend: AlarmBackend::default(),
            unit_name: "memorizer-wake".to_owned(),
            wake_system: true,
        }
    }
}

/// Audio output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Playback gain in `[0, 1]`.
    pub volume: f32,
    /// Gain applied while another source ducks us.
    pub duck_volume: f32,
    /// Output stream sample rate; clips are resampled to it.
    pub output_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            volume: 1.0,
            duck_volume: 0.3,
            output_sample_rate: 48_000,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write a daily-rolling log file under the data directory.
    pub file: bool,
}

impl MemorizerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// values fail [`validate`](Self::validate).
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| MemorizerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error only for a present but unreadable or invalid file.
    pub fn load_or_default(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MemorizerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        self.schedule.interval_table()?;
        for (key, value) in [
            ("schedule.focus_retry_secs", self.schedule.focus_retry_secs),
            ("schedule.max_play_secs", self.schedule.max_play_secs),
            ("schedule.shutdown_resume_secs", self.schedule.shutdown_resume_secs),
        ] {
            if value == 0 {
                return Err(MemorizerError::Config(format!(
                    "{key} must be greater than zero"
                )));
            }
        }
        if self.wake.lease_ceiling_secs == 0 {
            return Err(MemorizerError::Config(
                "wake.lease_ceiling_secs must be greater than zero".to_owned(),
            ));
        }
        for (key, value) in [
            ("audio.volume", self.audio.volume),
            ("audio.duck_volume", self.audio.duck_volume),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MemorizerError::Config(format!(
                    "{key} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.audio.output_sample_rate == 0 {
            return Err(MemorizerError::Config(
                "audio.output_sample_rate must be greater than zero".to_owned(),
            ));
        }
        if self.alarm.unit_name.trim().is_empty() {
            return Err(MemorizerError::Config(
                "alarm.unit_name cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::memorizer_dirs::config_file()
    }
}
