//! In-process arbiter for a single shared output device.
//!
//! It only arbitrates between sources inside this process. The host binary
//! registers the scheduler as its sole participant, so in production the
//! scheduler is never denied, ducked or revoked. Those paths are reached only
//! when another in-process source (or a test) takes focus. Output from other
//! applications is not observed.

use super::{FocusArbiter, FocusChange, FocusDecision, FocusGrant, FocusListener, FocusPriority};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

struct Holder {
    id: u64,
    priority: FocusPriority,
    pinned: bool,
    ducked: bool,
    listener: Option<FocusListener>,
}

#[derive(Default)]
struct ArbiterState {
    next_id: u64,
    holders: Vec<Holder>,
}

type Notifications = Vec<(FocusListener, FocusChange)>;

/// Arbiter shared by every output source in the process.
///
/// - An exclusive request revokes every current holder ([`FocusChange::Lost`]).
/// - A duck request leaves holders in place and ducks them; they are
///   restored once the last ducking holder releases.
/// - While a *pinned* holder exists (a call, an alarm tone), every other
///   request is denied.
///
/// Listeners are invoked after the internal lock is dropped.
#[derive(Clone, Default)]
pub struct LocalFocusArbiter {
    inner: Arc<Mutex<ArbiterState>>,
}

impl LocalFocusArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the device for a source that cannot be interrupted.
    ///
    /// Pinned claims are always granted; they revoke or duck current holders
    /// like any other request.
    pub fn request_pinned(&self, priority: FocusPriority) -> FocusDecision {
        self.claim(priority, true, None)
    }

    /// Number of current holders.
    #[must_use]
    pub fn holder_count(&self) -> usize {
        self.lock().holders.len()
    }

    fn lock(&self) -> MutexGuard<'_, ArbiterState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn claim(
        &self,
        priority: FocusPriority,
        pinned: bool,
        listener: Option<FocusListener>,
    ) -> FocusDecision {
        let mut notify: Notifications = Vec::new();
        let id = {
            let mut state = self.lock();
            if !pinned && state.holders.iter().any(|h| h.pinned) {
                debug!(?priority, "focus denied: device pinned by another source");
                return FocusDecision::Denied;
            }

            match priority {
                FocusPriority::Exclusive => {
                    for holder in state.holders.drain(..) {
                        if let Some(listener) = holder.listener {
                            notify.push((listener, FocusChange::Lost));
                        }
                    }
                }
                FocusPriority::Duck => {
                    for holder in state.holders.iter_mut().filter(|h| !h.ducked) {
                        holder.ducked = true;
                        if let Some(listener) = &holder.listener {
                            notify.push((Arc::clone(listener), FocusChange::Ducked));
                        }
                    }
                }
            }

            state.next_id += 1;
            let id = state.next_id;
            state.holders.push(Holder {
                id,
                priority,
                pinned,
                ducked: false,
                listener,
            });
            id
        };

        deliver(notify);
        debug!(id, ?priority, pinned, "focus granted");

        let arbiter = self.clone();
        FocusDecision::Granted(FocusGrant::new(id, priority, move || arbiter.release(id)))
    }

    fn release(&self, id: u64) {
        let mut notify: Notifications = Vec::new();
        {
            let mut state = self.lock();
            let Some(pos) = state.holders.iter().position(|h| h.id == id) else {
                return;
            };
            let released = state.holders.remove(pos);
            let still_ducking = state
                .holders
                .iter()
                .any(|h| h.priority == FocusPriority::Duck);
            if released.priority == FocusPriority::Duck && !still_ducking {
                for holder in state.holders.iter_mut().filter(|h| h.ducked) {
                    holder.ducked = false;
                    if let Some(listener) = &holder.listener {
                        notify.push((Arc::clone(listener), FocusChange::Restored));
                    }
                }
            }
        }
        debug!(id, "focus released");
        deliver(notify);
    }
}

impl FocusArbiter for LocalFocusArbiter {
    fn request(&self, priority: FocusPriority, listener: FocusListener) -> FocusDecision {
        self.claim(priority, false, Some(listener))
    }
}

fn deliver(notify: Notifications) {
    for (listener, change) in notify {
        listener(change);
    }
}
