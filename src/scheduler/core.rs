//! The interval playback state machine.
//!
//! [`SchedulerCore`] is the single writer of the schedule. Commands, wakes,
//! playback callbacks and focus notifications all arrive as
//! [`SchedulerEvent`]s through [`SchedulerCore::handle_at`]; callbacks from
//! collaborators never touch the state directly, they enqueue an event on
//! the channel given to [`SchedulerCore::new`].
//!
//! Time is passed in explicitly as epoch milliseconds. The core never sleeps
//! and never blocks on playback.

use crate::alarm::AlarmSafetyNet;
use crate::audio::{PlaybackAdapter, PlaybackCallback, PlaybackOutcome, codes};
use crate::config::MemorizerConfig;
use crate::error::{MemorizerError, Result};
use crate::focus::{FocusArbiter, FocusChange, FocusDecision, FocusGrant, FocusListener, FocusPriority};
use crate::schedule::{IntervalTable, MediaRef, ScheduleState, ScheduleStatus, StateStore};
use crate::scheduler::events::{ResourceReport, SchedulerEvent, SchedulerSnapshot, WakeSource};
use crate::status::{StatusNotice, StatusSink};
use crate::wake::WakeGuard;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Timing policy of the core.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub table: IntervalTable,
    /// Fixed delay before retrying after a focus denial.
    pub focus_retry: Duration,
    /// A wake at most this early still counts as due.
    pub early_wake_tolerance_ms: u64,
    pub focus_priority: FocusPriority,
    /// A play with no terminal event after this long is cut off as failed.
    pub max_play: Duration,
    /// Delay of the resume alarm armed when the host exits mid-clip.
    pub shutdown_resume: Duration,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            table: IntervalTable::default(),
            focus_retry: Duration::from_secs(10),
            early_wake_tolerance_ms: 2_000,
            focus_priority: FocusPriority::Exclusive,
            max_play: Duration::from_secs(600),
            shutdown_resume: Duration::from_secs(10),
        }
    }
}

impl CoreSettings {
    /// # Errors
    ///
    /// Returns [`MemorizerError::Config`] for an invalid interval table.
    pub fn from_config(config: &MemorizerConfig) -> Result<Self> {
        Ok(Self {
            table: config.schedule.interval_table()?,
            focus_retry: config.schedule.focus_retry(),
            early_wake_tolerance_ms: config.schedule.early_wake_tolerance_ms,
            focus_priority: config.focus.priority,
            max_play: config.schedule.max_play(),
            shutdown_resume: config.schedule.shutdown_resume(),
        })
    }
}

/// Everything the core drives but does not implement.
pub struct Collaborators {
    pub store: Box<dyn StateStore>,
    pub playback: Box<dyn PlaybackAdapter>,
    pub arbiter: Arc<dyn FocusArbiter>,
    pub alarm: Box<dyn AlarmSafetyNet>,
    pub wake: WakeGuard,
    pub status: Box<dyn StatusSink>,
}

/// Single-writer interval playback scheduler.
pub struct SchedulerCore {
    settings: CoreSettings,
    store: Box<dyn StateStore>,
    playback: Box<dyn PlaybackAdapter>,
    arbiter: Arc<dyn FocusArbiter>,
    alarm: Box<dyn AlarmSafetyNet>,
    wake: WakeGuard,
    status: Box<dyn StatusSink>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    state: Option<ScheduleState>,
    cycle: u64,
    grant: Option<FocusGrant>,
    playing: bool,
    play_deadline_ms: Option<u64>,
    timer_due_ms: Option<u64>,
}

impl SchedulerCore {
    /// `events` is where playback callbacks and focus notifications are
    /// queued; the owner must feed them back through [`handle_at`](Self::handle_at).
    #[must_use]
    pub fn new(
        settings: CoreSettings,
        collaborators: Collaborators,
        events: mpsc::UnboundedSender<SchedulerEvent>,
    ) -> Self {
        let Collaborators {
            store,
            playback,
            arbiter,
            alarm,
            wake,
            status,
        } = collaborators;
        Self {
            settings,
            store,
            playback,
            arbiter,
            alarm,
            wake,
            status,
            events,
            state: None,
            cycle: 0,
            grant: None,
            playing: false,
            play_deadline_ms: None,
            timer_due_ms: None,
        }
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Only [`SchedulerEvent::Start`] can fail, with
    /// [`MemorizerError::InvalidInput`]; the schedule is then left untouched.
    /// Every other failure is handled here and logged.
    pub fn handle_at(&mut self, event: SchedulerEvent, now_ms: u64) -> Result<()> {
        debug!(event = event.kind(), now_ms, "scheduler event");
        match event {
            SchedulerEvent::Start { items } => self.start_at(items, now_ms)?,
            SchedulerEvent::Stop => self.stop(),
            SchedulerEvent::Wake { source } => self.wake_at(source, now_ms),
            SchedulerEvent::PlaybackFinished { cycle, outcome } => {
                if self.is_current_cycle(cycle) {
                    self.finish_at(outcome, now_ms);
                } else {
                    debug!(cycle, current = self.cycle, "ignoring stale playback result");
                }
            }
            SchedulerEvent::Focus { cycle, change } => {
                if self.is_current_cycle(cycle) {
                    self.focus_changed_at(change, now_ms);
                } else {
                    debug!(cycle, ?change, "ignoring focus change for another cycle");
                }
            }
        }
        Ok(())
    }

    /// Periodic housekeeping: keep the wake lease alive while a clip plays,
    /// let it lapse at its ceiling otherwise, and emit countdown notices.
    ///
    /// A clip past its play deadline is abandoned instead of refreshed.
    pub fn tick_at(&mut self, now_ms: u64) {
        if self.playing {
            if !self.abandon_overdue_play(now_ms) {
                self.wake.acquire_at(now_ms);
            }
            return;
        }
        self.wake.expire_at(now_ms);
        let due = self
            .state
            .as_ref()
            .filter(|s| s.status == ScheduleStatus::Waiting)
            .and_then(|s| s.next_due_at_ms);
        if let Some(due) = due {
            let remaining_secs = due.saturating_sub(now_ms).div_ceil(1000);
            self.status.notify(&StatusNotice::Countdown { remaining_secs });
        }
    }

    /// Epoch milliseconds at which the in-process timer should fire.
    #[must_use]
    pub fn timer_due_ms(&self) -> Option<u64> {
        self.timer_due_ms
    }

    /// Release everything held by this process without ending the schedule.
    ///
    /// The safety-net alarm stays armed so the schedule resumes in a later
    /// process. A clip cut off mid-play is replayed shortly after.
    pub fn shutdown_at(&mut self, now_ms: u64) {
        let was_playing = self.playing;
        self.release_local();
        if was_playing {
            let resume_at = now_ms.saturating_add(duration_ms(self.settings.shutdown_resume));
            if let Err(e) = self.alarm.arm(resume_at) {
                warn!("could not arm resume alarm on shutdown: {e}");
            }
        }
        info!(
            was_playing,
            alarm = self.alarm.outstanding().is_some(),
            "scheduler shut down"
        );
    }

    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        match &self.state {
            Some(state) => SchedulerSnapshot {
                status: state.status,
                items: state.items.iter().map(ToString::to_string).collect(),
                active_item_index: state.active_item_index,
                interval_index: state.interval_index,
                cycle: self.cycle,
                next_due_at_ms: state.next_due_at_ms,
            },
            None => SchedulerSnapshot {
                cycle: self.cycle,
                ..SchedulerSnapshot::default()
            },
        }
    }

    #[must_use]
    pub fn outstanding(&self) -> ResourceReport {
        ResourceReport {
            timer: self.timer_due_ms.is_some(),
            alarm: self.alarm.outstanding().is_some(),
            lease: self.wake.is_held(),
            grant: self.grant.is_some(),
            playback: self.playing,
        }
    }

    fn is_current_cycle(&self, cycle: u64) -> bool {
        cycle == self.cycle
            && self.playing
            && self
                .state
                .as_ref()
                .is_some_and(|s| s.status == ScheduleStatus::Playing)
    }

    fn start_at(&mut self, raw_items: Vec<String>, now_ms: u64) -> Result<()> {
        let items = raw_items
            .iter()
            .map(MediaRef::parse)
            .collect::<Result<Vec<_>>>()?;
        for item in &items {
            self.playback.validate(item)?;
        }
        let state = ScheduleState::new(items)?;

        self.release_local();
        info!(items = state.items.len(), "schedule started");
        self.state = Some(state);
        self.begin_play_at(now_ms);
        Ok(())
    }

    fn stop(&mut self) {
        self.release_local();
        if let Err(e) = self.alarm.cancel() {
            warn!("failed to cancel safety-net alarm: {e}");
        }

        let state = match self.state.take() {
            Some(state) => Some(state),
            None => self.load_persisted(),
        };
        if let Some(mut state) = state {
            state.status = ScheduleStatus::Stopped;
            state.next_due_at_ms = None;
            self.state = Some(state);
            self.persist();
        }
        self.status.notify(&StatusNotice::Stopped);
        info!("schedule stopped");
    }

    fn wake_at(&mut self, source: WakeSource, now_ms: u64) {
        if self.state.is_none() {
            self.state = self.load_persisted();
        }
        let Some((status, next_due)) = self.state.as_ref().map(|s| (s.status, s.next_due_at_ms))
        else {
            debug!(?source, "wake with no schedule; nothing to do");
            return;
        };

        match status {
            ScheduleStatus::Idle | ScheduleStatus::Stopped => {
                debug!(?source, ?status, "wake ignored");
            }
            ScheduleStatus::Playing if self.playing => {
                if !self.abandon_overdue_play(now_ms) {
                    debug!(?source, cycle = self.cycle, "duplicate wake while playing");
                }
            }
            ScheduleStatus::Playing => {
                info!(?source, "resuming an interrupted play");
                self.begin_play_at(now_ms);
            }
            ScheduleStatus::Waiting => {
                let due = next_due.unwrap_or(now_ms);
                if now_ms.saturating_add(self.settings.early_wake_tolerance_ms) >= due {
                    info!(?source, late_ms = now_ms.saturating_sub(due), "play due");
                    self.begin_play_at(now_ms);
                } else {
                    debug!(?source, remaining_ms = due - now_ms, "early wake; re-arming");
                    self.rearm_wait(due, now_ms);
                }
            }
        }
    }

    fn begin_play_at(&mut self, now_ms: u64) {
        self.wake.acquire_at(now_ms);
        self.timer_due_ms = None;
        self.cycle += 1;
        let cycle = self.cycle;

        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.status = ScheduleStatus::Playing;
        state.next_due_at_ms = None;
        let item = state.current_item().clone();
        self.persist();

        // Covers process death mid-play; replaced once the wait is armed.
        let watchdog_at = now_ms.saturating_add(duration_ms(self.wake.ceiling()));
        if let Err(e) = self.alarm.arm(watchdog_at) {
            warn!("could not arm playback watchdog alarm: {e}");
        }

        let events = self.events.clone();
        let listener: FocusListener = Arc::new(move |change| {
            let _ = events.send(SchedulerEvent::Focus { cycle, change });
        });
        match self.arbiter.request(self.settings.focus_priority, listener) {
            FocusDecision::Granted(grant) => self.grant = Some(grant),
            FocusDecision::Denied => {
                warn!(cycle, "{}", MemorizerError::FocusDenied);
                self.retry_focus_at(now_ms);
                return;
            }
        }

        let events = self.events.clone();
        let on_finish: PlaybackCallback = Box::new(move |outcome| {
            let _ = events.send(SchedulerEvent::PlaybackFinished { cycle, outcome });
        });
        self.playing = true;
        self.play_deadline_ms = Some(now_ms.saturating_add(duration_ms(self.settings.max_play)));
        match self.playback.play(&item, on_finish) {
            Ok(()) => {
                info!(cycle, %item, "playing");
                self.status.notify(&StatusNotice::Playing {
                    item: item.to_string(),
                });
            }
            Err(e) => {
                self.finish_at(PlaybackOutcome::failed(codes::STREAM, e.to_string()), now_ms);
            }
        }
    }

    fn retry_focus_at(&mut self, now_ms: u64) {
        let retry = self.settings.focus_retry;
        let due = now_ms.saturating_add(duration_ms(retry));
        self.arm_wait(due, now_ms);
        self.status
            .notify(&StatusNotice::RetryingFocus { secs: retry.as_secs() });
        self.wake.release();
    }

    fn finish_at(&mut self, outcome: PlaybackOutcome, now_ms: u64) {
        match &outcome {
            PlaybackOutcome::Completed => info!(cycle = self.cycle, "playback completed"),
            PlaybackOutcome::Failed { code, reason } => {
                let err = MemorizerError::PlaybackFailure {
                    code: *code,
                    reason: reason.clone(),
                };
                warn!(cycle = self.cycle, "{err}; advancing schedule anyway");
            }
        }
        self.playing = false;
        self.play_deadline_ms = None;
        if let Some(grant) = self.grant.take() {
            grant.abandon();
        }

        let table = &self.settings.table;
        let Some(state) = self.state.as_mut() else {
            self.wake.release();
            return;
        };
        state.flip_active();
        let delay = table.delay_for(state.interval_index);
        state.interval_index = table.next_index(state.interval_index);
        let due = now_ms.saturating_add(duration_ms(delay));

        self.arm_wait(due, now_ms);
        self.wake.release();
    }

    /// Cut off a play that outlived its deadline. Returns whether it did.
    fn abandon_overdue_play(&mut self, now_ms: u64) -> bool {
        let Some(deadline) = self.play_deadline_ms.filter(|d| now_ms >= *d) else {
            return false;
        };
        warn!(
            cycle = self.cycle,
            overdue_ms = now_ms - deadline,
            "playback never finished; abandoning it"
        );
        self.playback.stop();
        self.finish_at(
            PlaybackOutcome::failed(codes::TIMEOUT, "no terminal event before the play deadline"),
            now_ms,
        );
        true
    }

    fn focus_changed_at(&mut self, change: FocusChange, now_ms: u64) {
        match change {
            FocusChange::Ducked => {
                debug!(cycle = self.cycle, "output ducked");
                self.playback.set_ducked(true);
            }
            FocusChange::Restored => {
                debug!(cycle = self.cycle, "output restored");
                self.playback.set_ducked(false);
            }
            FocusChange::Lost => {
                warn!(cycle = self.cycle, "{}", MemorizerError::ResourceLoss);
                self.playback.stop();
                self.finish_at(
                    PlaybackOutcome::failed(codes::FOCUS_LOST, "output focus revoked"),
                    now_ms,
                );
            }
        }
    }

    /// Enter `Waiting` until `due` and arm both wake sources for it.
    fn arm_wait(&mut self, due: u64, now_ms: u64) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.status = ScheduleStatus::Waiting;
        state.next_due_at_ms = Some(due);
        self.persist();
        self.timer_due_ms = Some(due);
        match self.alarm.arm(due) {
            Ok(handle) => debug!(generation = handle.generation, due, "safety net armed"),
            Err(e) => error!("safety-net alarm not armed, relying on in-process timer: {e}"),
        }
        self.status.notify(&StatusNotice::NextIn {
            secs: due.saturating_sub(now_ms).div_ceil(1000),
            due_at_ms: due,
        });
    }

    /// Resume a wait that is not due yet without touching the schedule.
    fn rearm_wait(&mut self, due: u64, now_ms: u64) {
        self.timer_due_ms = Some(due);
        if self.alarm.outstanding().is_none_or(|h| h.fire_at_ms != due) {
            if let Err(e) = self.alarm.arm(due) {
                error!("safety-net alarm not armed, relying on in-process timer: {e}");
            }
        }
        self.status.notify(&StatusNotice::NextIn {
            secs: due.saturating_sub(now_ms).div_ceil(1000),
            due_at_ms: due,
        });
    }

    /// Teardown shared by stop, restart and shutdown. Leaves the alarm alone.
    fn release_local(&mut self) {
        self.timer_due_ms = None;
        if self.playing {
            self.playback.stop();
            self.playing = false;
        }
        self.play_deadline_ms = None;
        if let Some(grant) = self.grant.take() {
            grant.abandon();
        }
        self.wake.release();
    }

    fn load_persisted(&self) -> Option<ScheduleState> {
        match self.store.load() {
            Ok(Some(state)) => match state.validated(&self.settings.table) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("resume aborted: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("resume aborted: {e}");
                None
            }
        }
    }

    fn persist(&mut self) {
        let Some(state) = &self.state else {
            return;
        };
        if let Err(e) = self.store.save(state) {
            error!(status = ?state.status, "failed to persist schedule: {e}");
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
