//! A fresh scheduler picking up where a dead process left off.

use crate::helpers::{Harness, RecordingWakeLock, SEC, ScriptedArbiter, ScriptedPlayback, T0};
use memorizer::alarm::{AlarmSafetyNet, MemoryAlarm};
use memorizer::schedule::{
    JsonStateStore, MediaRef, MemoryStateStore, ScheduleState, ScheduleStatus, StateStore,
};
use memorizer::scheduler::{
    Collaborators, CoreSettings, SchedulerCore, SchedulerEvent, WakeSource,
};
use memorizer::status::NullSink;
use memorizer::wake::WakeGuard;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn waiting_state(items: &[&str], interval_index: usize, due: u64) -> ScheduleState {
    let items = items
        .iter()
        .map(|s| MediaRef::parse(s).expect("media"))
        .collect();
    let mut state = ScheduleState::new(items).expect("state");
    state.interval_index = interval_index;
    state.status = ScheduleStatus::Waiting;
    state.next_due_at_ms = Some(due);
    state
}

#[test]
fn early_restart_rearms_the_persisted_wait() {
    let store = MemoryStateStore::new();
    let mut first = Harness::with_parts(store.clone(), MemoryAlarm::new());
    first.start(&["a", "b"], T0).expect("start");
    first.complete(T0);
    let due = first.due();
    drop(first);

    let mut second = Harness::with_parts(store, MemoryAlarm::new());
    second.wake(WakeSource::Restart, T0 + 3 * SEC);

    assert!(second.playback.plays().is_empty());
    assert_eq!(second.core.timer_due_ms(), Some(due));
    assert_eq!(
        second.alarm.outstanding().map(|a| a.fire_at_ms),
        Some(due)
    );

    second.wake(WakeSource::SafetyNet, due);
    assert_eq!(second.playback.plays(), vec!["b"]);
    let snap = second.snapshot();
    assert_eq!(snap.interval_index, 1);
    assert_eq!(snap.active_item_index, 1);
}

#[test]
fn overdue_restart_plays_immediately() {
    let store = MemoryStateStore::new();
    let mut first = Harness::with_parts(store.clone(), MemoryAlarm::new());
    first.start(&["a"], T0).expect("start");
    first.complete(T0);
    drop(first);

    let mut second = Harness::with_parts(store, MemoryAlarm::new());
    second.wake(WakeSource::SafetyNet, T0 + 45 * SEC);
    assert_eq!(second.playback.plays(), vec!["a"]);

    second.complete(T0 + 46 * SEC);
    assert_eq!(second.due(), T0 + 106 * SEC);
}

#[test]
fn death_mid_play_replays_the_same_slot() {
    let store = MemoryStateStore::new();
    let alarm = MemoryAlarm::new();
    let mut first = Harness::with_parts(store.clone(), alarm.clone());
    first.start(&["a", "b"], T0).expect("start");
    assert!(alarm.outstanding().is_some(), "watchdog alarm armed");
    // Process dies: nothing is torn down.
    std::mem::forget(first.core);

    let mut second = Harness::with_parts(store, alarm);
    second.wake(WakeSource::SafetyNet, T0 + 120 * SEC);
    assert_eq!(second.playback.plays(), vec!["a"]);
    assert_eq!(second.snapshot().interval_index, 0);
}

#[test]
fn stop_in_a_fresh_process_ends_the_persisted_schedule() {
    let store = MemoryStateStore::new();
    let alarm = MemoryAlarm::new();
    let mut first = Harness::with_parts(store.clone(), alarm.clone());
    first.start(&["a"], T0).expect("start");
    first.complete(T0);
    drop(first);

    let mut second = Harness::with_parts(store.clone(), alarm.clone());
    second.stop(T0 + SEC);
    assert!(alarm.outstanding().is_none());
    assert_eq!(
        store.peek().map(|s| s.status),
        Some(ScheduleStatus::Stopped)
    );

    let mut third = Harness::with_parts(store, alarm);
    third.wake(WakeSource::SafetyNet, T0 + 10 * SEC);
    assert!(third.playback.plays().is_empty());
}

#[test]
fn inconsistent_state_aborts_resume_silently() {
    let mut store = MemoryStateStore::new();
    let mut bad = waiting_state(&["a"], 0, T0);
    bad.active_item_index = 5;
    store.save(&bad).expect("save");

    let mut h = Harness::with_parts(store, MemoryAlarm::new());
    h.wake(WakeSource::SafetyNet, T0);
    assert!(h.playback.plays().is_empty());
    assert!(h.core.outstanding().is_clear());
}

#[test]
fn stored_index_beyond_table_is_clamped() {
    let mut store = MemoryStateStore::new();
    store.save(&waiting_state(&["a"], 40, T0)).expect("save");

    let mut h = Harness::with_parts(store, MemoryAlarm::new());
    h.wake(WakeSource::Timer, T0);
    assert_eq!(h.playback.plays(), vec!["a"]);
    h.complete(T0);
    assert_eq!(h.due(), T0 + 600 * SEC);
}

fn json_core(path: std::path::PathBuf) -> (SchedulerCore, ScriptedPlayback) {
    let playback = ScriptedPlayback::default();
    let (tx, _rx) = mpsc::unbounded_channel();
    let collaborators = Collaborators {
        store: Box::new(JsonStateStore::new(path)),
        playback: Box::new(playback.clone()),
        arbiter: Arc::new(ScriptedArbiter::default()),
        alarm: Box::new(MemoryAlarm::new()),
        wake: WakeGuard::new(
            Box::new(RecordingWakeLock::default()),
            Duration::from_secs(120),
        ),
        status: Box::new(NullSink),
    };
    (
        SchedulerCore::new(CoreSettings::default(), collaborators, tx),
        playback,
    )
}

#[test]
fn json_store_carries_the_schedule_across_processes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("schedule.json");

    let (mut first, _) = json_core(path.clone());
    first
        .handle_at(
            SchedulerEvent::Start {
                items: vec!["a".to_owned(), "b".to_owned()],
            },
            T0,
        )
        .expect("start");
    first.shutdown_at(T0 + SEC);
    drop(first);

    let (mut second, playback) = json_core(path);
    second
        .handle_at(
            SchedulerEvent::Wake {
                source: WakeSource::Restart,
            },
            T0 + 11 * SEC,
        )
        .expect("wake");
    assert_eq!(playback.plays(), vec!["a"]);
    assert_eq!(second.snapshot().items, vec!["a", "b"]);
}

#[test]
fn undecodable_state_file_aborts_resume_silently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("schedule.json");
    std::fs::write(&path, b"{\"state\": 17").expect("write");

    let (mut core, playback) = json_core(path);
    core.handle_at(
        SchedulerEvent::Wake {
            source: WakeSource::SafetyNet,
        },
        T0,
    )
    .expect("wake never fails");
    assert!(playback.plays().is_empty());
    assert!(core.outstanding().is_clear());
}
