//! Playback of the scheduled clips.
//!
//! The scheduler only sees [`PlaybackAdapter`]: start a clip, hear back once
//! through a callback, stop on demand. [`playback::CpalPlayback`] is the
//! default implementation on top of `symphonia` decoding and `cpal` output.

pub mod decode;
pub mod playback;

use crate::error::Result;
use crate::schedule::MediaRef;
use serde::{Deserialize, Serialize};

/// Failure codes carried by [`PlaybackOutcome::Failed`].
pub mod codes {
    /// The clip could not be opened or decoded.
    pub const DECODE: i32 = 1;
    /// No usable output device.
    pub const DEVICE: i32 = 2;
    /// The output stream failed to build or start.
    pub const STREAM: i32 = 3;
    /// Output focus was revoked mid-play; reported by the scheduler.
    pub const FOCUS_LOST: i32 = 4;
    /// The clip never reported an end before its play deadline.
    pub const TIMEOUT: i32 = 5;
}

/// How a playback ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlaybackOutcome {
    Completed,
    Failed { code: i32, reason: String },
}

impl PlaybackOutcome {
    #[must_use]
    pub fn failed(code: i32, reason: impl Into<String>) -> Self {
        Self::Failed {
            code,
            reason: reason.into(),
        }
    }
}

/// One-shot completion callback. May be invoked from any thread.
pub type PlaybackCallback = Box<dyn FnOnce(PlaybackOutcome) + Send>;

/// Starts and stops clips; reports how each one ended.
pub trait PlaybackAdapter: Send {
    /// Reject references this adapter can never play (checked at start).
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::InvalidInput`](crate::MemorizerError::InvalidInput).
    fn validate(&self, _media: &MediaRef) -> Result<()> {
        Ok(())
    }

    /// Begin playing `media` without blocking. `on_finish` is called at most
    /// once, unless playback is cut short by [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// An immediate failure; `on_finish` is then never called.
    fn play(&mut self, media: &MediaRef, on_finish: PlaybackCallback) -> Result<()>;

    /// Stop the current clip, if any.
    fn stop(&mut self);

    /// Lower or restore the output level while another source ducks us.
    fn set_ducked(&mut self, _ducked: bool) {}
}
