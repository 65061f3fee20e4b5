//! Centralized filesystem paths for memorizer.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Directory Layout
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | App data | `~/Library/Application Support/memorizer/` | `~/.local/share/memorizer/` |
//! | Config | `~/Library/Application Support/memorizer/` | `~/.config/memorizer/` |
//!
//! # Environment Overrides
//!
//! - `MEMORIZER_DATA_DIR`: overrides [`data_dir`]
//! - `MEMORIZER_CONFIG_DIR`: overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory (logs).
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("MEMORIZER_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("memorizer"))
        .unwrap_or_else(|| PathBuf::from("/tmp/memorizer-data"))
}

/// Application config and state directory.
///
/// Holds `config.toml`, the persisted schedule, the outstanding alarm handle,
/// the host instance lease and its control socket.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("MEMORIZER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("memorizer"))
        .unwrap_or_else(|| PathBuf::from("/tmp/memorizer-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Persisted schedule state (`config_dir()/schedule.json`).
#[must_use]
pub fn schedule_file() -> PathBuf {
    config_dir().join("schedule.json")
}

/// Outstanding safety-net alarm handle (`config_dir()/alarm.json`).
#[must_use]
pub fn alarm_file() -> PathBuf {
    config_dir().join("alarm.json")
}

/// Host instance lease (`config_dir()/host.lease`).
#[must_use]
pub fn lease_file() -> PathBuf {
    config_dir().join("host.lease")
}

/// Control socket of the running host (`config_dir()/control.sock`).
#[must_use]
pub fn control_socket() -> PathBuf {
    config_dir().join("control.sock")
}
