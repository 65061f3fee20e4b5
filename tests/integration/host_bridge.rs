//! The JSON line protocol driven end to end over in-memory pipes.

use crate::helpers::{RecordingWakeLock, ScriptedArbiter, ScriptedPlayback};
use memorizer::alarm::MemoryAlarm;
use memorizer::host::router::ScheduleCommandRouter;
use memorizer::host::stdio::run_bridge;
use memorizer::schedule::MemoryStateStore;
use memorizer::scheduler::{Collaborators, CoreSettings, SchedulerRunner};
use memorizer::status::BroadcastSink;
use memorizer::wake::WakeGuard;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Test harness
// ---------------------------------------------------------------------------

struct BridgeHarness {
    writer: WriteHalf<DuplexStream>,
    reader: Lines<BufReader<ReadHalf<DuplexStream>>>,
    playback: ScriptedPlayback,
    /// Events read while waiting for a response.
    events: Vec<Value>,
    shutdown: CancellationToken,
    scheduler: tokio::task::JoinHandle<()>,
    bridge: tokio::task::JoinHandle<memorizer::Result<()>>,
}

impl BridgeHarness {
    fn spawn() -> Self {
        let playback = ScriptedPlayback::default();
        let sink = BroadcastSink::new(64);
        let notices = sink.subscribe();
        let collaborators = Collaborators {
            store: Box::new(MemoryStateStore::new()),
            playback: Box::new(playback.clone()),
            arbiter: Arc::new(ScriptedArbiter::default()),
            alarm: Box::new(MemoryAlarm::new()),
            wake: WakeGuard::new(
                Box::new(RecordingWakeLock::default()),
                Duration::from_secs(120),
            ),
            status: Box::new(sink),
        };
        let (runner, handle) = SchedulerRunner::new(CoreSettings::default(), collaborators);
        let shutdown = CancellationToken::new();
        let scheduler = runner
            .with_tick(Duration::from_secs(3600))
            .run(shutdown.clone());

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let router = ScheduleCommandRouter::new(handle);
        let bridge = tokio::spawn(run_bridge(
            BufReader::new(server_read),
            server_write,
            router,
            notices,
        ));

        let (client_read, client_write) = tokio::io::split(client);
        Self {
            writer: client_write,
            reader: BufReader::new(client_read).lines(),
            playback,
            events: Vec::new(),
            shutdown,
            scheduler,
            bridge,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Send a command and return its response, skipping interleaved events.
    async fn send(&mut self, request_id: &str, command: &str, payload: Value) -> Value {
        let envelope = json!({
            "v": 1,
            "request_id": request_id,
            "command": command,
            "payload": payload,
        });
        self.send_raw(&envelope.to_string()).await;
        self.read_response().await
    }

    async fn read_line(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.reader.next_line())
            .await
            .expect("timeout reading from bridge")
            .expect("IO error reading from bridge")
            .expect("unexpected EOF from bridge");
        serde_json::from_str(&line)
            .unwrap_or_else(|e| panic!("invalid JSON from bridge: {e}\nraw line: {line}"))
    }

    async fn read_response(&mut self) -> Value {
        loop {
            let value = self.read_line().await;
            if value.get("ok").is_some() {
                return value;
            }
            self.events.push(value);
        }
    }

    /// Read lines until a `schedule.status` event of `kind` arrives.
    async fn read_status(&mut self, kind: &str) -> Value {
        let is_match =
            |v: &Value| v["event"] == "schedule.status" && v["payload"]["kind"] == kind;
        if let Some(pos) = self.events.iter().position(is_match) {
            return self.events.remove(pos);
        }
        loop {
            let value = self.read_line().await;
            if is_match(&value) {
                return value;
            }
        }
    }

    async fn close(self) {
        let Self {
            mut writer,
            bridge,
            shutdown,
            scheduler,
            ..
        } = self;
        writer.shutdown().await.unwrap();
        let bridge = tokio::time::timeout(Duration::from_secs(5), bridge)
            .await
            .expect("bridge did not stop")
            .expect("bridge task panicked");
        assert!(bridge.is_ok(), "bridge ended with {bridge:?}");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), scheduler)
            .await
            .expect("scheduler did not stop")
            .expect("scheduler task panicked");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_answers_pong() {
    let mut h = BridgeHarness::spawn();
    let resp = h.send("req-1", "host.ping", json!({})).await;
    assert_eq!(resp["ok"], true);
    assert_eq!(resp["request_id"], "req-1");
    assert_eq!(resp["payload"]["pong"], true);
    h.close().await;
}

#[tokio::test]
async fn start_plays_and_reports_status() {
    let mut h = BridgeHarness::spawn();

    let resp = h
        .send("req-start", "schedule.start", json!({"items": ["/clips/a.mp3"]}))
        .await;
    assert_eq!(resp["ok"], true, "{resp}");
    assert_eq!(resp["payload"]["items"], 1);

    let event = h.read_status("playing").await;
    assert_eq!(event["payload"]["item"], "/clips/a.mp3");
    assert_eq!(event["payload"]["text"], "Playing");
    assert_eq!(h.playback.plays(), vec!["/clips/a.mp3"]);

    let status = h.send("req-status", "schedule.status", Value::Null).await;
    assert_eq!(status["payload"]["schedule"]["status"], "playing");
    assert_eq!(status["payload"]["resources"]["playback"], true);

    h.close().await;
}

#[tokio::test]
async fn invalid_start_is_an_error_response() {
    let mut h = BridgeHarness::spawn();

    let resp = h
        .send("req-empty", "schedule.start", json!({"items": []}))
        .await;
    assert_eq!(resp["ok"], false);
    let error = resp["error"].as_str().expect("error text");
    assert!(error.contains("invalid input"), "{error}");

    let resp = h.send("req-shape", "schedule.start", json!("a.mp3")).await;
    assert_eq!(resp["ok"], false);

    let status = h.send("req-status", "schedule.status", Value::Null).await;
    assert_eq!(status["payload"]["schedule"]["status"], "idle");
    assert!(h.playback.plays().is_empty());

    h.close().await;
}

#[tokio::test]
async fn stop_clears_every_resource() {
    let mut h = BridgeHarness::spawn();
    h.send("req-start", "schedule.start", json!({"items": ["a", "b"]}))
        .await;

    let resp = h.send("req-stop", "schedule.stop", Value::Null).await;
    assert_eq!(resp["ok"], true);
    h.read_status("stopped").await;

    let status = h.send("req-status", "schedule.status", Value::Null).await;
    assert_eq!(status["payload"]["schedule"]["status"], "stopped");
    let resources = &status["payload"]["resources"];
    for key in ["timer", "alarm", "lease", "grant", "playback"] {
        assert_eq!(resources[key], false, "{key} still outstanding");
    }

    h.close().await;
}

#[tokio::test]
async fn wake_defaults_to_safety_net() {
    let mut h = BridgeHarness::spawn();
    let resp = h.send("req-wake", "schedule.wake", Value::Null).await;
    assert_eq!(resp["ok"], true);
    assert_eq!(resp["payload"]["source"], "safety_net");

    let resp = h
        .send("req-wake-2", "schedule.wake", json!({"source": "timer"}))
        .await;
    assert_eq!(resp["payload"]["source"], "timer");
    h.close().await;
}

#[tokio::test]
async fn malformed_lines_get_parse_errors() {
    let mut h = BridgeHarness::spawn();

    h.send_raw("{ definitely not json").await;
    let resp = h.read_response().await;
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["request_id"], "parse-error");

    h.send_raw(r#"{"v":1,"request_id":"x","command":"schedule.rewind","payload":null}"#)
        .await;
    let resp = h.read_response().await;
    assert_eq!(resp["request_id"], "parse-error");

    let resp = h.send("req-after", "host.ping", json!({})).await;
    assert_eq!(resp["ok"], true);
    h.close().await;
}

#[tokio::test]
async fn foreign_version_is_rejected() {
    let mut h = BridgeHarness::spawn();
    h.send_raw(r#"{"v":9,"request_id":"req-v9","command":"host.ping","payload":{}}"#)
        .await;
    let resp = h.read_response().await;
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["request_id"], "req-v9");
    h.close().await;
}
