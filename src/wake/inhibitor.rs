//! Sleep inhibitor backed by `systemd-inhibit`.

use super::WakeLock;
use crate::error::Result;
use crate::worker::BlockingWorker;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

#[derive(Default)]
struct InhibitorState {
    child: Option<Child>,
    held_until: Option<Instant>,
    spawned: u64,
}

/// Holds a logind `sleep:idle` inhibitor through a `systemd-inhibit` child.
///
/// The child runs `sleep <ceiling>`, so the inhibitor disappears on its own
/// once the ceiling passes even if this process hangs or dies.
///
/// A refresh keeps the running child until less than half of its ceiling is
/// left. The replacement is started before the old child is killed, so the
/// inhibitor never lapses. Spawning and reaping happen on a worker thread.
pub struct InhibitorWakeLock {
    program: String,
    state: Arc<Mutex<InhibitorState>>,
    worker: BlockingWorker,
}

impl InhibitorWakeLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: "systemd-inhibit".to_owned(),
            state: Arc::default(),
            worker: BlockingWorker::spawn("memorizer-inhibitor"),
        }
    }

    /// Override the inhibitor executable (tests, non-standard installs).
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn state(&self) -> MutexGuard<'_, InhibitorState> {
        lock_state(&self.state)
    }
}

impl Default for InhibitorWakeLock {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeLock for InhibitorWakeLock {
    fn hold(&mut self, max: Duration) -> Result<()> {
        let now = Instant::now();
        {
            let mut state = self.state();
            if state
                .held_until
                .is_some_and(|until| until.saturating_duration_since(now) > max / 2)
            {
                return Ok(());
            }
            state.held_until = Some(now + max);
        }

        let program = self.program.clone();
        let shared = Arc::clone(&self.state);
        let secs = max.as_secs().max(1);
        self.worker.submit(move || {
            let spawned = Command::new(&program)
                .args([
                    "--what=sleep:idle",
                    "--who=memorizer",
                    "--why=interval playback cycle",
                    "--mode=block",
                    "sleep",
                ])
                .arg(secs.to_string())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
            let previous = {
                let mut state = lock_state(&shared);
                match spawned {
                    Ok(child) => {
                        state.spawned += 1;
                        debug!(pid = child.id(), secs, spawned = state.spawned, "sleep inhibitor started");
                        state.child.replace(child)
                    }
                    Err(e) => {
                        error!("failed to spawn {program}: {e}");
                        state.held_until = None;
                        None
                    }
                }
            };
            if let Some(previous) = previous {
                reap(previous);
            }
        });
        Ok(())
    }

    fn release(&mut self) {
        self.state().held_until = None;
        let shared = Arc::clone(&self.state);
        self.worker.submit(move || {
            let child = lock_state(&shared).child.take();
            if let Some(child) = child {
                reap(child);
            }
        });
    }
}

impl Drop for InhibitorWakeLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn reap(mut child: Child) {
    if let Err(e) = child.kill() {
        debug!("inhibitor already gone: {e}");
    }
    if let Err(e) = child.wait() {
        warn!("failed to reap inhibitor process: {e}");
    }
}

fn lock_state(state: &Mutex<InhibitorState>) -> MutexGuard<'_, InhibitorState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
