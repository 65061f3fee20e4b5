//! Interval playback scheduling.
//!
//! [`SchedulerCore`] is the synchronous state machine; [`SchedulerRunner`]
//! hosts it on a tokio task and [`SchedulerHandle`] talks to it.

pub mod authority;
pub mod core;
pub mod events;
pub mod runner;

pub use authority::{
    HostMode, InstanceLease, InstanceLeaseConfig, LeaseDecision, LeaseHolder, now_epoch_millis,
    read_lease_holder,
};
pub use core::{Collaborators, CoreSettings, SchedulerCore};
pub use events::{ResourceReport, SchedulerEvent, SchedulerSnapshot, WakeSource};
pub use runner::{SchedulerHandle, SchedulerRunner};
