//! Scripted collaborators and a harness that drives `SchedulerCore` by hand.
#![allow(dead_code)]

use memorizer::alarm::MemoryAlarm;
use memorizer::audio::{PlaybackAdapter, PlaybackCallback, PlaybackOutcome};
use memorizer::focus::{
    FocusArbiter, FocusChange, FocusDecision, FocusGrant, FocusListener, FocusPriority,
};
use memorizer::schedule::{IntervalTable, MediaRef, MemoryStateStore};
use memorizer::scheduler::{
    Collaborators, CoreSettings, SchedulerCore, SchedulerEvent, SchedulerSnapshot, WakeSource,
};
use memorizer::status::{BroadcastSink, StatusNotice};
use memorizer::wake::{WakeGuard, WakeLock};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub const T0: u64 = 1_700_000_000_000;
pub const SEC: u64 = 1_000;

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PlaybackLog {
    plays: Vec<String>,
    stops: usize,
    ducked: Vec<bool>,
    pending: Option<PlaybackCallback>,
    fail_next_play: bool,
}

/// Records plays and holds the completion callback until the test fires it.
#[derive(Clone, Default)]
pub struct ScriptedPlayback {
    log: Arc<Mutex<PlaybackLog>>,
}

impl ScriptedPlayback {
    pub fn plays(&self) -> Vec<String> {
        self.log.lock().unwrap().plays.clone()
    }

    pub fn stops(&self) -> usize {
        self.log.lock().unwrap().stops
    }

    pub fn ducked(&self) -> Vec<bool> {
        self.log.lock().unwrap().ducked.clone()
    }

    pub fn fail_next_play(&self) {
        self.log.lock().unwrap().fail_next_play = true;
    }

    /// Invoke the callback of the most recent play, if it is still held.
    pub fn finish(&self, outcome: PlaybackOutcome) -> bool {
        let callback = self.log.lock().unwrap().pending.take();
        match callback {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }
}

impl PlaybackAdapter for ScriptedPlayback {
    fn play(&mut self, media: &MediaRef, on_finish: PlaybackCallback) -> memorizer::Result<()> {
        let mut log = self.log.lock().unwrap();
        if std::mem::take(&mut log.fail_next_play) {
            return Err(memorizer::MemorizerError::Audio("device vanished".to_owned()));
        }
        log.plays.push(media.to_string());
        log.pending = Some(on_finish);
        Ok(())
    }

    // Keeps the pending callback so tests can deliver it late.
    fn stop(&mut self) {
        self.log.lock().unwrap().stops += 1;
    }

    fn set_ducked(&mut self, ducked: bool) {
        self.log.lock().unwrap().ducked.push(ducked);
    }
}

// ---------------------------------------------------------------------------
// Focus
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ArbiterLog {
    deny_remaining: usize,
    next_id: u64,
    granted: usize,
    released: Arc<Mutex<usize>>,
    listener: Option<FocusListener>,
    requests: Vec<FocusPriority>,
}

/// Grants by default; can be told to deny or to push focus changes.
#[derive(Clone, Default)]
pub struct ScriptedArbiter {
    log: Arc<Mutex<ArbiterLog>>,
}

impl ScriptedArbiter {
    pub fn deny_next(&self, count: usize) {
        self.log.lock().unwrap().deny_remaining = count;
    }

    /// Grants currently not released.
    pub fn outstanding(&self) -> usize {
        let log = self.log.lock().unwrap();
        let released = *log.released.lock().unwrap();
        log.granted - released
    }

    pub fn requests(&self) -> Vec<FocusPriority> {
        self.log.lock().unwrap().requests.clone()
    }

    /// Deliver `change` to the holder of the latest grant.
    pub fn push(&self, change: FocusChange) {
        let listener = self.log.lock().unwrap().listener.clone();
        if let Some(listener) = listener {
            listener(change);
        }
    }
}

impl FocusArbiter for ScriptedArbiter {
    fn request(&self, priority: FocusPriority, listener: FocusListener) -> FocusDecision {
        let mut log = self.log.lock().unwrap();
        log.requests.push(priority);
        if log.deny_remaining > 0 {
            log.deny_remaining -= 1;
            return FocusDecision::Denied;
        }
        log.next_id += 1;
        log.granted += 1;
        log.listener = Some(listener);
        let released = Arc::clone(&log.released);
        FocusDecision::Granted(FocusGrant::new(log.next_id, priority, move || {
            *released.lock().unwrap() += 1;
        }))
    }
}

// ---------------------------------------------------------------------------
// Wake lock
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct WakeLog {
    holds: usize,
    releases: usize,
    held: bool,
}

#[derive(Clone, Default)]
pub struct RecordingWakeLock {
    log: Arc<Mutex<WakeLog>>,
}

impl RecordingWakeLock {
    pub fn held(&self) -> bool {
        self.log.lock().unwrap().held
    }

    pub fn holds(&self) -> usize {
        self.log.lock().unwrap().holds
    }

    pub fn releases(&self) -> usize {
        self.log.lock().unwrap().releases
    }
}

impl WakeLock for RecordingWakeLock {
    fn hold(&mut self, _max: Duration) -> memorizer::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.holds += 1;
        log.held = true;
        Ok(())
    }

    fn release(&mut self) {
        let mut log = self.log.lock().unwrap();
        if log.held {
            log.releases += 1;
            log.held = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub core: SchedulerCore,
    pub events: mpsc::UnboundedReceiver<SchedulerEvent>,
    pub playback: ScriptedPlayback,
    pub arbiter: ScriptedArbiter,
    pub alarm: MemoryAlarm,
    pub store: MemoryStateStore,
    pub wake: RecordingWakeLock,
    pub notices: broadcast::Receiver<StatusNotice>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(MemoryStateStore::new(), MemoryAlarm::new())
    }

    /// A fresh process sharing durable state with an earlier one.
    pub fn with_parts(store: MemoryStateStore, alarm: MemoryAlarm) -> Self {
        Self::build(CoreSettings::default(), store, alarm)
    }

    pub fn with_table(secs: &[u64]) -> Self {
        let settings = CoreSettings {
            table: IntervalTable::from_secs(secs).expect("table"),
            ..CoreSettings::default()
        };
        Self::build(settings, MemoryStateStore::new(), MemoryAlarm::new())
    }

    pub fn with_settings(settings: CoreSettings) -> Self {
        Self::build(settings, MemoryStateStore::new(), MemoryAlarm::new())
    }

    fn build(settings: CoreSettings, store: MemoryStateStore, alarm: MemoryAlarm) -> Self {
        let playback = ScriptedPlayback::default();
        let arbiter = ScriptedArbiter::default();
        let wake = RecordingWakeLock::default();
        let sink = BroadcastSink::new(256);
        let notices = sink.subscribe();
        let (tx, events) = mpsc::unbounded_channel();

        let collaborators = Collaborators {
            store: Box::new(store.clone()),
            playback: Box::new(playback.clone()),
            arbiter: Arc::new(arbiter.clone()),
            alarm: Box::new(alarm.clone()),
            wake: WakeGuard::new(Box::new(wake.clone()), Duration::from_secs(120)),
            status: Box::new(sink),
        };

        Self {
            core: SchedulerCore::new(settings, collaborators, tx),
            events,
            playback,
            arbiter,
            alarm,
            store,
            wake,
            notices,
        }
    }

    pub fn start(&mut self, items: &[&str], now_ms: u64) -> memorizer::Result<()> {
        let items = items.iter().map(|s| (*s).to_owned()).collect();
        self.core.handle_at(SchedulerEvent::Start { items }, now_ms)
    }

    pub fn wake(&mut self, source: WakeSource, now_ms: u64) {
        self.core
            .handle_at(SchedulerEvent::Wake { source }, now_ms)
            .expect("wake never fails");
    }

    pub fn stop(&mut self, now_ms: u64) {
        self.core
            .handle_at(SchedulerEvent::Stop, now_ms)
            .expect("stop never fails");
    }

    /// Feed every queued callback event back into the core.
    pub fn drain(&mut self, now_ms: u64) {
        while let Ok(event) = self.events.try_recv() {
            self.core.handle_at(event, now_ms).expect("callback event");
        }
    }

    /// Finish the current clip successfully and process the result.
    pub fn complete(&mut self, now_ms: u64) {
        assert!(
            self.playback.finish(PlaybackOutcome::Completed),
            "no clip was playing"
        );
        self.drain(now_ms);
    }

    pub fn fail(&mut self, code: i32, now_ms: u64) {
        assert!(
            self.playback
                .finish(PlaybackOutcome::failed(code, "decoder gave up")),
            "no clip was playing"
        );
        self.drain(now_ms);
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.core.snapshot()
    }

    pub fn due(&self) -> u64 {
        self.snapshot().next_due_at_ms.expect("a wait is armed")
    }

    pub fn drain_notices(&mut self) -> Vec<StatusNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }
}
