//! Scheduler background loop.
//!
//! Spawns a tokio task that owns the [`SchedulerCore`] and serializes every
//! input into it: commands from [`SchedulerHandle`]s, playback and focus
//! callbacks, the in-process timer, and the countdown tick.

use crate::error::{MemorizerError, Result};
use crate::scheduler::authority::{InstanceLease, LeaseDecision, now_epoch_millis};
use crate::scheduler::core::{Collaborators, CoreSettings, SchedulerCore};
use crate::scheduler::events::{ResourceReport, SchedulerEvent, SchedulerSnapshot, WakeSource};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the command queue shared by all handles.
const COMMAND_CAPACITY: usize = 32;

/// Default interval between countdown ticks.
const DEFAULT_TICK: Duration = Duration::from_secs(1);

enum Command {
    Event(SchedulerEvent),
    Start {
        items: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<SchedulerSnapshot>,
    },
    Outstanding {
        reply: oneshot::Sender<ResourceReport>,
    },
}

/// Cloneable front door to a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Start a fresh schedule.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::InvalidInput`] when the items are rejected,
    /// or [`MemorizerError::Channel`] when the scheduler is gone.
    pub async fn start(&self, items: Vec<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { items, reply }).await?;
        rx.await
            .map_err(|e| MemorizerError::Channel(format!("start reply dropped: {e}")))?
    }

    /// Stop the schedule and release everything.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::Channel`] when the scheduler is gone.
    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Event(SchedulerEvent::Stop)).await
    }

    /// Deliver an external wake (e.g. the safety-net alarm fired).
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::Channel`] when the scheduler is gone.
    pub async fn wake(&self, source: WakeSource) -> Result<()> {
        self.send(Command::Event(SchedulerEvent::Wake { source }))
            .await
    }

    /// # Errors
    ///
    /// Returns [`MemorizerError::Channel`] when the scheduler is gone.
    pub async fn snapshot(&self) -> Result<SchedulerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await
            .map_err(|e| MemorizerError::Channel(format!("snapshot reply dropped: {e}")))
    }

    /// # Errors
    ///
    /// Returns [`MemorizerError::Channel`] when the scheduler is gone.
    pub async fn outstanding(&self) -> Result<ResourceReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Outstanding { reply }).await?;
        rx.await
            .map_err(|e| MemorizerError::Channel(format!("resource reply dropped: {e}")))
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| MemorizerError::Channel("scheduler is not running".to_owned()))
    }
}

/// Owns the core until [`run`](Self::run) moves it onto a tokio task.
pub struct SchedulerRunner {
    core: SchedulerCore,
    commands_rx: mpsc::Receiver<Command>,
    events_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    tick: Duration,
    lease: Option<InstanceLease>,
}

impl SchedulerRunner {
    #[must_use]
    pub fn new(settings: CoreSettings, collaborators: Collaborators) -> (Self, SchedulerHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let core = SchedulerCore::new(settings, collaborators, events_tx);
        (
            Self {
                core,
                commands_rx,
                events_rx,
                tick: DEFAULT_TICK,
                lease: None,
            },
            SchedulerHandle { commands },
        )
    }

    /// Override the countdown / lease-refresh tick.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(10));
        self
    }

    /// Renew `lease` while running; stand down if another instance takes it.
    #[must_use]
    pub fn with_instance_lease(mut self, lease: InstanceLease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Start the scheduler loop. Cancelling `shutdown` runs the core's
    /// shutdown path (alarm kept armed) and ends the task.
    pub fn run(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let Self {
            mut core,
            mut commands_rx,
            mut events_rx,
            tick,
            lease,
        } = self;

        tokio::spawn(async move {
            info!("scheduler loop started");
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let heartbeat_every = lease
                .as_ref()
                .map_or(Duration::from_secs(5), |l| l.config().heartbeat());
            let mut heartbeat = tokio::time::interval(heartbeat_every);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

            dispatch(
                &mut core,
                SchedulerEvent::Wake {
                    source: WakeSource::Restart,
                },
            );

            loop {
                let timer = core.timer_due_ms();
                let timer_sleep = async move {
                    match timer {
                        Some(due) => {
                            let wait = due.saturating_sub(now_epoch_millis());
                            tokio::time::sleep(Duration::from_millis(wait)).await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    () = shutdown.cancelled() => {
                        core.shutdown_at(now_epoch_millis());
                        break;
                    }
                    Some(command) = commands_rx.recv() => handle_command(&mut core, command),
                    Some(event) = events_rx.recv() => dispatch(&mut core, event),
                    () = timer_sleep => {
                        dispatch(&mut core, SchedulerEvent::Wake { source: WakeSource::Timer });
                    }
                    _ = ticker.tick() => core.tick_at(now_epoch_millis()),
                    _ = heartbeat.tick(), if lease.is_some() => {
                        if !renew_lease(lease.as_ref()) {
                            core.shutdown_at(now_epoch_millis());
                            break;
                        }
                    }
                }
            }

            // Backends drain their worker threads on drop.
            if let Err(e) = tokio::task::spawn_blocking(move || drop(core)).await {
                warn!("scheduler teardown panicked: {e}");
            }
            if let Some(lease) = &lease {
                if let Err(e) = lease.release() {
                    warn!("failed to release instance lease: {e}");
                }
            }
            info!("scheduler loop stopped");
        })
    }
}

fn handle_command(core: &mut SchedulerCore, command: Command) {
    match command {
        Command::Event(event) => dispatch(core, event),
        Command::Start { items, reply } => {
            let result = core.handle_at(SchedulerEvent::Start { items }, now_epoch_millis());
            if let Err(e) = &result {
                warn!("start rejected: {e}");
            }
            let _ = reply.send(result);
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(core.snapshot());
        }
        Command::Outstanding { reply } => {
            let _ = reply.send(core.outstanding());
        }
    }
}

fn dispatch(core: &mut SchedulerCore, event: SchedulerEvent) {
    if let Err(e) = core.handle_at(event, now_epoch_millis()) {
        error!("scheduler event failed: {e}");
    }
}

/// Returns `false` when this instance must stand down.
fn renew_lease(lease: Option<&InstanceLease>) -> bool {
    let Some(lease) = lease else {
        return true;
    };
    match lease.try_acquire_or_renew_at(now_epoch_millis()) {
        Ok(LeaseDecision::Owner { takeover }) => {
            if takeover {
                warn!("instance lease had expired; re-acquired");
            }
            debug!("instance lease renewed");
            true
        }
        Ok(LeaseDecision::Standby(holder)) => {
            warn!(
                owner = %holder.instance_id,
                owner_pid = holder.pid,
                owner_mode = ?holder.mode,
                "another instance owns the schedule; standing down"
            );
            false
        }
        Err(e) => {
            warn!("instance lease renewal failed: {e}");
            true
        }
    }
}
