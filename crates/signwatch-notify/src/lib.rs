//! Notification and reminder scheduling for detected traffic signs.
//!
//! The [`Scheduler`] is driven entirely by the caller: `on_detection` for each
//! qualifying detection, `tick` once per render cycle, and the `set_*`
//! mutators when the operator flips a control. State changes are reported as
//! [`SchedulerEvent`]s through `drain_events`.

pub mod config;
mod debounce;
mod scheduler;
pub mod state;
mod timers;

pub use config::{
    ConfigError, DebounceMode, NotifyConfig, ReminderInterval, DEFAULT_IMPORTANT_SIGNS, MAX_DURATION_S,
};
pub use scheduler::Scheduler;
pub use state::{Notification, Reminder, SchedulerEvent};
