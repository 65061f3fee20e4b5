//! One-way status notices for whatever presentation surface is attached.
//!
//! Notices are fire-and-forget. A missing, slow, or closed surface never
//! influences scheduling.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

/// Human-facing progress of the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusNotice {
    /// A clip started playing.
    Playing { item: String },
    /// The next play is armed.
    NextIn { secs: u64, due_at_ms: u64 },
    /// Periodic update while waiting.
    Countdown { remaining_secs: u64 },
    /// The output device was busy; trying again shortly.
    RetryingFocus { secs: u64 },
    /// The schedule was stopped.
    Stopped,
}

impl std::fmt::Display for StatusNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Playing { .. } => f.write_str("Playing"),
            Self::NextIn { secs, due_at_ms } => match wall_clock(*due_at_ms) {
                Some(at) => write!(f, "Next in {secs}s (at {at})"),
                None => write!(f, "Next in {secs}s"),
            },
            Self::Countdown { remaining_secs } => write!(f, "Next in {remaining_secs}s"),
            Self::RetryingFocus { secs } => write!(f, "Output busy, retrying in {secs}s"),
            Self::Stopped => f.write_str("Stopped"),
        }
    }
}

fn wall_clock(epoch_ms: u64) -> Option<String> {
    let ms = i64::try_from(epoch_ms).ok()?;
    let utc = chrono::DateTime::from_timestamp_millis(ms)?;
    Some(
        utc.with_timezone(&chrono::Local)
            .format("%H:%M:%S")
            .to_string(),
    )
}

/// Receiver of status notices.
pub trait StatusSink: Send {
    fn notify(&self, notice: &StatusNotice);
}

/// Discards every notice.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn notify(&self, _notice: &StatusNotice) {}
}

/// Mirrors notices into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn notify(&self, notice: &StatusNotice) {
        match notice {
            StatusNotice::Countdown { .. } => tracing::trace!(%notice, "status"),
            StatusNotice::Playing { item } => info!(%item, "status: {notice}"),
            _ => info!("status: {notice}"),
        }
    }
}

/// Publishes notices to any number of subscribers.
///
/// Sending with no subscribers, or to lagging ones, is silently ignored.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<StatusNotice>,
}

impl BroadcastSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusNotice> {
        self.tx.subscribe()
    }
}

impl StatusSink for BroadcastSink {
    fn notify(&self, notice: &StatusNotice) {
        let _ = self.tx.send(notice.clone());
    }
}

/// Forwards every notice to several sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn StatusSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: impl StatusSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl StatusSink for FanoutSink {
    fn notify(&self, notice: &StatusNotice) {
        for sink in &self.sinks {
            sink.notify(notice);
        }
    }
}
