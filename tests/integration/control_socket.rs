//! A second invocation reaching the running host through its control socket.
#![cfg(unix)]

use crate::helpers::{RecordingWakeLock, ScriptedArbiter, ScriptedPlayback};
use memorizer::alarm::{AlarmSafetyNet, MemoryAlarm};
use memorizer::host::contract::{HostCommand, ReplyPayload};
use memorizer::host::control::{relay_control, send_control, serve_control};
use memorizer::host::router::ScheduleCommandRouter;
use memorizer::schedule::{MemoryStateStore, ScheduleStatus};
use memorizer::scheduler::{Collaborators, CoreSettings, SchedulerHandle, SchedulerRunner};
use memorizer::status::BroadcastSink;
use memorizer::wake::WakeGuard;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

struct ControlHarness {
    _dir: tempfile::TempDir,
    socket: PathBuf,
    handle: SchedulerHandle,
    alarm: MemoryAlarm,
    playback: ScriptedPlayback,
    shutdown: CancellationToken,
    scheduler: tokio::task::JoinHandle<()>,
    control: tokio::task::JoinHandle<memorizer::Result<()>>,
}

impl ControlHarness {
    async fn spawn() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("control.sock");
        let alarm = MemoryAlarm::new();
        let playback = ScriptedPlayback::default();
        let sink = BroadcastSink::new(64);
        let collaborators = Collaborators {
            store: Box::new(MemoryStateStore::new()),
            playback: Box::new(playback.clone()),
            arbiter: Arc::new(ScriptedArbiter::default()),
            alarm: Box::new(alarm.clone()),
            wake: WakeGuard::new(
                Box::new(RecordingWakeLock::default()),
                Duration::from_secs(120),
            ),
            status: Box::new(sink.clone()),
        };
        let (runner, handle) = SchedulerRunner::new(CoreSettings::default(), collaborators);
        let shutdown = CancellationToken::new();
        let scheduler = runner
            .with_tick(Duration::from_secs(3600))
            .run(shutdown.clone());
        let control = tokio::spawn({
            let socket = socket.clone();
            let router = ScheduleCommandRouter::new(handle.clone());
            let shutdown = shutdown.child_token();
            async move { serve_control(&socket, router, sink, shutdown).await }
        });
        wait_until_listening(&socket).await;

        Self {
            _dir: dir,
            socket,
            handle,
            alarm,
            playback,
            shutdown,
            scheduler,
            control,
        }
    }

    async fn close(self) {
        self.shutdown.cancel();
        let served = tokio::time::timeout(Duration::from_secs(5), self.control)
            .await
            .expect("control socket did not stop")
            .expect("control task panicked");
        assert!(served.is_ok(), "control socket ended with {served:?}");
        assert!(!self.socket.exists());
        tokio::time::timeout(Duration::from_secs(5), self.scheduler)
            .await
            .expect("scheduler did not stop")
            .expect("scheduler task panicked");
    }
}

async fn wait_until_listening(socket: &Path) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while send_control(socket, &HostCommand::Ping).await.is_err() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("control socket listening");
}

#[tokio::test]
async fn stop_reaches_the_running_host() {
    let h = ControlHarness::spawn().await;
    h.handle
        .start(vec!["/clips/a.mp3".to_owned()])
        .await
        .expect("start");
    assert_eq!(h.playback.plays(), vec!["/clips/a.mp3"]);

    let reply = send_control(&h.socket, &HostCommand::Stop)
        .await
        .expect("stop reply");
    assert!(reply.ok, "{reply:?}");
    assert_eq!(
        reply.payload,
        Some(ReplyPayload::Accepted { accepted: true })
    );

    let reply = send_control(&h.socket, &HostCommand::Status)
        .await
        .expect("status reply");
    match reply.payload {
        Some(ReplyPayload::Status {
            schedule,
            resources,
        }) => {
            assert_eq!(schedule.status, ScheduleStatus::Stopped);
            assert!(resources.is_clear(), "{resources:?}");
        }
        other => panic!("expected a status payload, got {other:?}"),
    }
    assert!(h.alarm.outstanding().is_none());
    assert_eq!(h.playback.stops(), 1);

    h.close().await;
}

#[tokio::test]
async fn relayed_session_speaks_the_line_protocol() {
    let h = ControlHarness::spawn().await;

    let (client, relay_end) = tokio::io::duplex(64 * 1024);
    let (relay_read, relay_write) = tokio::io::split(relay_end);
    let relay = tokio::spawn({
        let socket = h.socket.clone();
        async move { relay_control(&socket, relay_read, relay_write).await }
    });

    let (client_read, mut client_write) = tokio::io::split(client);
    client_write
        .write_all(b"{\"v\":1,\"request_id\":\"r-1\",\"command\":\"host.ping\",\"payload\":{}}\n")
        .await
        .expect("write");
    let mut lines = BufReader::new(client_read).lines();
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("reply in time")
        .expect("read")
        .expect("a line");
    let reply: Value = serde_json::from_str(&line).expect("json");
    assert_eq!(reply["request_id"], "r-1");
    assert_eq!(reply["payload"]["pong"], true);

    client_write.shutdown().await.expect("close input");
    let relayed = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay ended")
        .expect("relay task panicked");
    assert!(relayed.is_ok(), "relay ended with {relayed:?}");

    h.close().await;
}

#[tokio::test]
async fn nobody_listening_is_a_channel_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = send_control(&dir.path().join("control.sock"), &HostCommand::Stop)
        .await
        .expect_err("no host");
    assert!(
        matches!(err, memorizer::MemorizerError::Channel(_)),
        "{err:?}"
    );
}
