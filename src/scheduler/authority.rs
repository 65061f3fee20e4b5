//! Single-instance authority for the schedule host.
//!
//! Only one process may drive the schedule. A host launched by the safety-net
//! alarm while another instance is alive must step aside instead of playing
//! the same cycle a second time. The lease file also tells other invocations
//! how the owner was launched and where its control socket is, so commands
//! such as stop can still reach it.

use crate::error::{MemorizerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Lease timing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceLeaseConfig {
    /// Lease lifetime in seconds.
    pub ttl_secs: u64,
    /// Expected renewal interval in seconds.
    pub heartbeat_secs: u64,
}

impl Default for InstanceLeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 15,
            heartbeat_secs: 5,
        }
    }
}

impl InstanceLeaseConfig {
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

/// How the owning host was launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostMode {
    /// Driven by a client over stdin/stdout.
    Interactive,
    /// Relaunched by the safety-net alarm; runs until the schedule goes idle.
    Headless,
}

/// The lease file contents: who drives the schedule and until when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseHolder {
    pub instance_id: String,
    pub pid: u32,
    pub mode: HostMode,
    /// Where the holder accepts protocol connections.
    #[serde(default)]
    pub control_socket: Option<PathBuf>,
    pub expires_at_ms: u64,
}

/// Result of an acquire or renew attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseDecision {
    /// This instance owns the schedule.
    Owner {
        /// `true` when the lease was taken from an expired holder.
        takeover: bool,
    },
    /// Another live instance owns the schedule.
    Standby(LeaseHolder),
}

impl LeaseDecision {
    #[must_use]
    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Owner { .. })
    }
}

/// File-backed lease naming the one process allowed to drive the schedule.
pub struct InstanceLease {
    me: LeaseHolder,
    path: PathBuf,
    config: InstanceLeaseConfig,
}

impl InstanceLease {
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        pid: u32,
        mode: HostMode,
        path: PathBuf,
        config: InstanceLeaseConfig,
    ) -> Self {
        Self {
            me: LeaseHolder {
                instance_id: instance_id.into(),
                pid,
                mode,
                control_socket: None,
                expires_at_ms: 0,
            },
            path,
            config,
        }
    }

    /// Advertise `socket` to other invocations while this lease is held.
    #[must_use]
    pub fn with_control_socket(mut self, socket: PathBuf) -> Self {
        self.me.control_socket = Some(socket);
        self
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.me.instance_id
    }

    #[must_use]
    pub fn config(&self) -> InstanceLeaseConfig {
        self.config
    }

    /// Try to acquire or renew the lease at the given epoch-millisecond time.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::Persistence`] when the lease file cannot be
    /// read or written.
    pub fn try_acquire_or_renew_at(&self, now_ms: u64) -> Result<LeaseDecision> {
        let takeover = match read_lease_holder(&self.path)? {
            Some(holder) if holder.instance_id == self.me.instance_id => false,
            Some(holder) if holder.expires_at_ms > now_ms => {
                return Ok(LeaseDecision::Standby(holder));
            }
            Some(holder) => {
                info!(
                    previous = %holder.instance_id,
                    previous_pid = holder.pid,
                    previous_mode = ?holder.mode,
                    "taking over expired instance lease"
                );
                true
            }
            None => false,
        };

        let renewed = LeaseHolder {
            expires_at_ms: now_ms.saturating_add(self.config.ttl_secs.saturating_mul(1000)),
            ..self.me.clone()
        };
        write_lease_holder(&self.path, &renewed)?;
        Ok(LeaseDecision::Owner { takeover })
    }

    /// Give the lease up if this instance still holds it.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::Persistence`] when the lease file cannot be removed.
    pub fn release(&self) -> Result<()> {
        match read_lease_holder(&self.path)? {
            Some(holder) if holder.instance_id == self.me.instance_id => {
                match std::fs::remove_file(&self.path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(MemorizerError::Persistence(format!(
                        "failed to remove instance lease: {e}"
                    ))),
                }
            }
            _ => Ok(()),
        }
    }
}

/// The recorded holder, live or expired. A malformed file reads as absent.
///
/// # Errors
///
/// Returns [`MemorizerError::Persistence`] when the file exists but cannot be read.
pub fn read_lease_holder(path: &Path) -> Result<Option<LeaseHolder>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(MemorizerError::Persistence(format!(
                "failed to read instance lease: {e}"
            )));
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(holder) => Ok(Some(holder)),
        Err(e) => {
            warn!("ignoring malformed instance lease at {}: {e}", path.display());
            Ok(None)
        }
    }
}

fn write_lease_holder(path: &Path, holder: &LeaseHolder) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            MemorizerError::Persistence(format!("failed to create lease directory: {e}"))
        })?;
    }
    let json = serde_json::to_vec(holder)
        .map_err(|e| MemorizerError::Persistence(format!("failed to serialize lease: {e}")))?;
    let tmp_path = path.with_extension(format!("{}.tmp", holder.pid));
    std::fs::write(&tmp_path, json).map_err(|e| {
        MemorizerError::Persistence(format!("failed to write lease temp file: {e}"))
    })?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| MemorizerError::Persistence(format!("failed to finalize lease file: {e}")))
}

/// Current epoch time in milliseconds.
#[must_use]
pub fn now_epoch_millis() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}
