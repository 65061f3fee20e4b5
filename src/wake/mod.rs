//! CPU wake leases.
//!
//! A [`WakeGuard`] keeps the device from suspending while a cycle is doing
//! something observable (playing, computing the next delay, arming the next
//! wake). Every lease carries a hard ceiling so a skipped release costs at
//! most one ceiling of battery.

use crate::error::Result;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(target_os = "linux")]
mod inhibitor;
mod stub;

#[cfg(target_os = "linux")]
pub use inhibitor::InhibitorWakeLock;
pub use stub::NoopWakeLock;

/// OS primitive that prevents sleep.
pub trait WakeLock: Send {
    /// Take (or retake) the lock for at most `max`. Retaking extends the
    /// current hold rather than stacking a second one. Must not block.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::WakeLock`](crate::MemorizerError::WakeLock)
    /// when the request is refused up front. Backends that talk to the OS in
    /// the background log later failures instead.
    fn hold(&mut self, max: Duration) -> Result<()>;

    /// Drop the lock. Must be a no-op when nothing is held.
    fn release(&mut self);
}

/// Create the platform wake lock for the configured backend.
pub fn create_wake_lock(backend: crate::config::WakeBackend) -> Box<dyn WakeLock> {
    match backend {
        #[cfg(target_os = "linux")]
        crate::config::WakeBackend::Inhibitor => Box::new(InhibitorWakeLock::new()),
        #[cfg(not(target_os = "linux"))]
        crate::config::WakeBackend::Inhibitor => {
            warn!("sleep inhibitor unavailable on this platform; using no-op wake lock");
            Box::new(NoopWakeLock)
        }
        crate::config::WakeBackend::None => Box::new(NoopWakeLock),
    }
}

/// Scoped, non-reference-counted wake lease with an automatic ceiling.
///
/// `acquire_at` while held refreshes the deadline; `release` while not held
/// is a no-op. Dropping the guard releases the lease.
pub struct WakeGuard {
    lock: Box<dyn WakeLock>,
    ceiling: Duration,
    held_until_ms: Option<u64>,
}

impl WakeGuard {
    #[must_use]
    pub fn new(lock: Box<dyn WakeLock>, ceiling: Duration) -> Self {
        Self {
            lock,
            ceiling,
            held_until_ms: None,
        }
    }

    /// Take or refresh the lease so it lasts until `now_ms + ceiling`.
    ///
    /// A refused OS lock is logged and leaves the guard unheld; the cycle
    /// continues best-effort.
    pub fn acquire_at(&mut self, now_ms: u64) {
        match self.lock.hold(self.ceiling) {
            Ok(()) => {
                let until = now_ms.saturating_add(ceiling_ms(self.ceiling));
                if self.held_until_ms.is_none() {
                    debug!(until, "wake lease acquired");
                }
                self.held_until_ms = Some(until);
            }
            Err(e) => {
                warn!("wake lease refused, continuing without it: {e}");
                self.held_until_ms = None;
            }
        }
    }

    /// Release the lease if held.
    pub fn release(&mut self) {
        if self.held_until_ms.take().is_some() {
            self.lock.release();
            debug!("wake lease released");
        }
    }

    /// Forget a lease whose ceiling has passed.
    pub fn expire_at(&mut self, now_ms: u64) {
        if self.held_until_ms.is_some_and(|until| until <= now_ms) {
            debug!("wake lease reached its ceiling");
            self.release();
        }
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held_until_ms.is_some()
    }

    #[must_use]
    pub fn is_held_at(&self, now_ms: u64) -> bool {
        self.held_until_ms.is_some_and(|until| now_ms < until)
    }

    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    #[must_use]
    pub fn held_until_ms(&self) -> Option<u64> {
        self.held_until_ms
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn ceiling_ms(ceiling: Duration) -> u64 {
    u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX)
}
