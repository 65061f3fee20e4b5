//! Safety-net alarm backed by transient systemd user timers.

use super::{AlarmSafetyNet, SafetyAlarmHandle};
use crate::error::{MemorizerError, Result};
use crate::scheduler::authority::now_epoch_millis;
use crate::worker::BlockingWorker;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Never schedule closer than this; systemd rounds tiny values up anyway.
const MIN_DELAY_MS: u64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AlarmRecord {
    unit: String,
    handle: SafetyAlarmHandle,
}

/// Everything the worker thread needs to talk to systemd.
struct SystemdTools {
    run_program: String,
    ctl_program: String,
    wake_system: bool,
    command: Vec<String>,
    record_path: PathBuf,
}

impl SystemdTools {
    fn start_timer(&self, record: &AlarmRecord) -> Result<u64> {
        let delay_ms = record
            .handle
            .fire_at_ms
            .saturating_sub(now_epoch_millis())
            .max(MIN_DELAY_MS);
        let mut cmd = Command::new(&self.run_program);
        cmd.args(["--user", "--collect", "--quiet"])
            .arg(format!("--unit={}", record.unit))
            .arg(format!("--on-active={delay_ms}ms"))
            .arg("--timer-property=AccuracySec=1s");
        if self.wake_system {
            cmd.arg("--timer-property=WakeSystem=true");
        }
        let status = cmd
            .arg("--")
            .args(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| MemorizerError::Alarm(format!("failed to run {}: {e}", self.run_program)))?;
        if !status.success() {
            return Err(MemorizerError::Alarm(format!(
                "{} exited with {status} while arming {}",
                self.run_program, record.unit
            )));
        }
        Ok(delay_ms)
    }

    fn stop_timer(&self, unit: &str) {
        let status = Command::new(&self.ctl_program)
            .args(["--user", "stop"])
            .arg(format!("{unit}.timer"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => debug!(%unit, "timer stopped"),
            // Already fired and collected, or never loaded.
            Ok(status) => debug!(%unit, %status, "timer stop reported failure; treating as gone"),
            Err(e) => warn!(%unit, "failed to run {}: {e}", self.ctl_program),
        }
    }

    fn persist(&self, record: &AlarmRecord) -> Result<()> {
        if let Some(parent) = self.record_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemorizerError::Alarm(format!("failed to create alarm directory: {e}"))
            })?;
        }
        let json = serde_json::to_vec(record)
            .map_err(|e| MemorizerError::Alarm(format!("failed to serialize alarm: {e}")))?;
        let tmp_path = self.record_path.with_extension("tmp");
        std::fs::write(&tmp_path, json)
            .map_err(|e| MemorizerError::Alarm(format!("failed to write alarm temp file: {e}")))?;
        std::fs::rename(&tmp_path, &self.record_path)
            .map_err(|e| MemorizerError::Alarm(format!("failed to finalize alarm file: {e}")))?;
        Ok(())
    }

    fn forget_record(&self) {
        match std::fs::remove_file(&self.record_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove alarm record: {e}"),
        }
    }
}

/// Arms `systemd-run --user --on-active=...` timers that relaunch the host.
///
/// Each arm creates a timer unit named `<base>-<generation>`; the previous
/// timer is stopped first, so at most one is ever outstanding. The current
/// unit and handle are kept in a small JSON file, which lets a restarted
/// process cancel or replace an alarm armed by its predecessor.
///
/// `arm` and `cancel` update the bookkeeping immediately and leave the
/// `systemctl`/`systemd-run` calls to a worker thread, in order. An arm that
/// systemd rejects is logged and withdrawn from [`outstanding`](AlarmSafetyNet::outstanding).
pub struct SystemdTimerAlarm {
    base_unit: String,
    tools: Arc<SystemdTools>,
    current: Arc<Mutex<Option<AlarmRecord>>>,
    worker: BlockingWorker,
}

impl SystemdTimerAlarm {
    #[must_use]
    pub fn new(
        base_unit: impl Into<String>,
        wake_system: bool,
        command: Vec<String>,
        record_path: PathBuf,
    ) -> Self {
        let current = read_record(&record_path);
        if let Some(record) = &current {
            debug!(unit = %record.unit, fire_at_ms = record.handle.fire_at_ms, "restored outstanding alarm");
        }
        Self {
            base_unit: base_unit.into(),
            tools: Arc::new(SystemdTools {
                run_program: "systemd-run".to_owned(),
                ctl_program: "systemctl".to_owned(),
                wake_system,
                command,
                record_path,
            }),
            current: Arc::new(Mutex::new(current)),
            worker: BlockingWorker::spawn("memorizer-alarm"),
        }
    }

    /// Override the `systemd-run` / `systemctl` executables.
    #[must_use]
    pub fn with_programs(self, run: impl Into<String>, ctl: impl Into<String>) -> Self {
        let tools = SystemdTools {
            run_program: run.into(),
            ctl_program: ctl.into(),
            wake_system: self.tools.wake_system,
            command: self.tools.command.clone(),
            record_path: self.tools.record_path.clone(),
        };
        Self {
            tools: Arc::new(tools),
            ..self
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<AlarmRecord>> {
        lock_record(&self.current)
    }
}

impl AlarmSafetyNet for SystemdTimerAlarm {
    fn arm(&mut self, fire_at_ms: u64) -> Result<SafetyAlarmHandle> {
        if self.tools.command.is_empty() {
            return Err(MemorizerError::Alarm("resume command is empty".to_owned()));
        }

        let (previous, record) = {
            let mut current = self.current();
            let previous = current.take();
            let floor = previous
                .as_ref()
                .map_or(0, |record| record.handle.generation.saturating_add(1));
            let generation = now_epoch_millis().max(floor);
            let record = AlarmRecord {
                unit: format!("{}-{generation}", self.base_unit),
                handle: SafetyAlarmHandle {
                    generation,
                    fire_at_ms,
                },
            };
            *current = Some(record.clone());
            (previous, record)
        };
        let handle = record.handle;

        let tools = Arc::clone(&self.tools);
        let shared = Arc::clone(&self.current);
        self.worker.submit(move || {
            if let Some(previous) = previous {
                tools.stop_timer(&previous.unit);
            }
            match tools.start_timer(&record) {
                Ok(delay_ms) => {
                    if let Err(e) = tools.persist(&record) {
                        warn!("alarm armed but handle not persisted: {e}");
                    }
                    info!(unit = %record.unit, delay_ms, "safety-net alarm armed");
                }
                Err(e) => {
                    error!("safety-net alarm not armed, relying on in-process timer: {e}");
                    let mut current = lock_record(&shared);
                    if current
                        .as_ref()
                        .is_some_and(|c| c.handle.generation == record.handle.generation)
                    {
                        *current = None;
                        tools.forget_record();
                    }
                }
            }
        });
        Ok(handle)
    }

    fn cancel(&mut self) -> Result<()> {
        let Some(record) = self.current().take() else {
            return Ok(());
        };
        let tools = Arc::clone(&self.tools);
        self.worker.submit(move || {
            tools.stop_timer(&record.unit);
            tools.forget_record();
            info!(unit = %record.unit, "safety-net alarm cancelled");
        });
        Ok(())
    }

    fn outstanding(&self) -> Option<SafetyAlarmHandle> {
        self.current().as_ref().map(|record| record.handle)
    }
}

fn lock_record(record: &Mutex<Option<AlarmRecord>>) -> MutexGuard<'_, Option<AlarmRecord>> {
    match record.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_record(path: &Path) -> Option<AlarmRecord> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("cannot read alarm record {}: {e}", path.display());
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("ignoring malformed alarm record at {}: {e}", path.display());
            None
        }
    }
}
