//! Alarm kept in memory only.

use super::{AlarmSafetyNet, SafetyAlarmHandle};
use crate::error::Result;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryAlarmState {
    generation: u64,
    current: Option<SafetyAlarmHandle>,
    arm_count: usize,
}

/// Alarm with no OS counterpart.
///
/// Used on hosts without a durable wake source: the bookkeeping (single
/// outstanding handle, atomic replace) is identical, but nothing fires if the
/// process dies. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryAlarm {
    inner: Arc<Mutex<MemoryAlarmState>>,
}

impl MemoryAlarm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times an alarm has been armed.
    #[must_use]
    pub fn arm_count(&self) -> usize {
        self.lock().arm_count
    }

    fn lock(&self) -> MutexGuard<'_, MemoryAlarmState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl AlarmSafetyNet for MemoryAlarm {
    fn arm(&mut self, fire_at_ms: u64) -> Result<SafetyAlarmHandle> {
        let mut state = self.lock();
        state.generation += 1;
        state.arm_count += 1;
        let handle = SafetyAlarmHandle {
            generation: state.generation,
            fire_at_ms,
        };
        state.current = Some(handle);
        Ok(handle)
    }

    fn cancel(&mut self) -> Result<()> {
        self.lock().current = None;
        Ok(())
    }

    fn outstanding(&self) -> Option<SafetyAlarmHandle> {
        self.lock().current
    }
}
