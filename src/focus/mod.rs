//! Arbitrated ownership of the shared audio output device.
//!
//! A play must hold a [`FocusGrant`] for as long as it emits sound. Owners
//! are told asynchronously when another source interrupts them: a
//! [`FocusChange::Ducked`] is a soft interruption that may be ridden out at
//! lower volume, a [`FocusChange::Lost`] means the device is gone and local
//! output must stop.

mod local;

pub use local::LocalFocusArbiter;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How strongly output ownership is requested.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusPriority {
    /// Other sources must pause.
    #[default]
    Exclusive,
    /// Other sources may keep playing at lower volume.
    Duck,
}

/// Asynchronous change delivered to a grant owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusChange {
    /// Another source is ducking us; playback may continue quietly.
    Ducked,
    /// The ducking source went away.
    Restored,
    /// Ownership was revoked; stop emitting.
    Lost,
}

/// Callback for focus changes. Must not block; forward into a queue.
pub type FocusListener = Arc<dyn Fn(FocusChange) + Send + Sync>;

/// Outcome of a focus request.
#[derive(Debug)]
pub enum FocusDecision {
    Granted(FocusGrant),
    Denied,
}

/// Token for current ownership of the output device.
///
/// Released exactly once: by [`abandon`](Self::abandon) or on drop.
pub struct FocusGrant {
    id: u64,
    priority: FocusPriority,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl FocusGrant {
    /// Grant that runs `release` when abandoned or dropped.
    pub fn new(id: u64, priority: FocusPriority, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            priority,
            release: Some(Box::new(release)),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn priority(&self) -> FocusPriority {
        self.priority
    }

    /// Give up ownership now.
    pub fn abandon(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for FocusGrant {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for FocusGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusGrant")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Negotiates temporary ownership of the output device.
pub trait FocusArbiter: Send + Sync {
    /// Ask for ownership. `listener` receives every later change for the
    /// returned grant until it is released.
    fn request(&self, priority: FocusPriority, listener: FocusListener) -> FocusDecision;
}
