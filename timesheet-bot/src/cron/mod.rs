//! Periodic actions.
//!
//! A [`Period`] names recurring due points, a [`PeriodicScheduler`] fires once
//! per due point with catch-up after downtime, and the [`ActionRegistry`]
//! keeps one scheduler per persisted [`PeriodicAction`].

mod action;
mod executor;
mod period;
mod registry;
mod scheduler;

pub use action::{ActionKind, PeriodicAction};
pub use executor::{ActionExecutor, REPLACED_BY_REPOST, RepostExecutor};
pub use period::{Clock, ManualClock, Period, SystemClock};
pub use registry::{ActionRegistry, CATEGORY as ACTION_CATEGORY};
pub use scheduler::{
    DEFAULT_CHECK_INTERVAL, PeriodicScheduler, ScheduledAction, SchedulerBuilder, SchedulerHandle,
    WatermarkListener,
};
