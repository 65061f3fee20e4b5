//! No-op wake lock for platforms without a sleep inhibitor.

use super::WakeLock;
use crate::error::Result;
use std::time::Duration;

/// Wake lock that never touches the OS.
///
/// The [`WakeGuard`](super::WakeGuard) still tracks lease deadlines, so the
/// scheduling discipline is identical; only the OS effect is missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn hold(&mut self, _max: Duration) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) {}
}
