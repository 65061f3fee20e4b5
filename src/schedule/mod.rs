//! Schedule data model: interval table, persisted state, and its store.

pub mod intervals;
pub mod state;
pub mod store;

pub use intervals::IntervalTable;
pub use state::{MediaRef, ScheduleState, ScheduleStatus};
pub use store::{JsonStateStore, MemoryStateStore, StateStore};
