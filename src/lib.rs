//! Execution engine for a single-user day planner: routines expand into a
//! daily pipeline, one timer runs at a time, closed intervals land in a
//! midnight-split ledger, and the read side projects expected start/end
//! windows over what actually happened.
//!
//! Embedders construct a [`Session`] over a [`KeyValueStore`] backend
//! ([`SqliteStore`] for durability, [`MemoryStore`] for tests) and drive it
//! through its async operations.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::session::{ManualTimes, NewTask, Session, Snapshot, TaskPatch};
pub use domain::models::{
    CurrentRun, DayAggregate, DayTask, ProjectMinutes, Routine, RunEntry, Section,
};
pub use domain::timeline::{ProjectedWindow, RowKind, TimelineRow};
pub use infrastructure::clock::{Clock, FixedClock, SystemClock};
pub use infrastructure::error::EngineError;
pub use infrastructure::reminders::{NoopReminders, RecordingReminders, ReminderService};
pub use infrastructure::repository::{ExportBundle, IntervalStore, BUNDLE_VERSION};
pub use infrastructure::store::{KeyValueStore, MemoryStore, SqliteStore};
