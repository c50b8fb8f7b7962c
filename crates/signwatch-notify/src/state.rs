use crate::config::ReminderInterval;

/// Banner shown right after a detection.
#[derive(Debug, Clone)]
pub struct Notification<I> {
    pub label: String,
    pub image: I,
    pub shown_at: f64,
    pub duration: f64,
}

impl<I> Notification<I> {
    pub fn is_expired(&self, now: f64) -> bool {
        now - self.shown_at >= self.duration
    }

    pub fn expires_at(&self) -> f64 { self.shown_at + self.duration }
}

/// A reminder that has fired. `shown_at` is `None` while it waits in the queue
/// behind another visible reminder.
#[derive(Debug, Clone)]
pub struct Reminder<I> {
    pub label: String,
    pub image: I,
    pub armed_at: f64,
    pub interval: ReminderInterval,
    pub shown_at: Option<f64>,
    pub display_duration: f64,
}

impl<I> Reminder<I> {
    pub fn is_expired(&self, now: f64) -> bool {
        match self.shown_at {
            Some(t) => now - t >= self.display_duration,
            None => false,
        }
    }

    pub fn expires_at(&self) -> Option<f64> {
        self.shown_at.map(|t| t + self.display_duration)
    }
}

/// Observable changes, drained by the presentation and speech surfaces.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Speak { label: String },
    NotificationShown { label: String },
    NotificationCleared { label: String },
    ReminderArmed { label: String, due: f64 },
    ReminderShown { label: String },
    ReminderQueued { label: String, depth: usize },
    /// Queue overflow pushed out the oldest waiting reminder.
    ReminderDropped { label: String },
    /// An arming timer fired after it was invalidated.
    ReminderSuppressed { label: String },
    ReminderCleared { label: String },
}

impl SchedulerEvent {
    pub fn label(&self) -> &str {
        match self {
            SchedulerEvent::Speak { label }
            | SchedulerEvent::NotificationShown { label }
            | SchedulerEvent::NotificationCleared { label }
            | SchedulerEvent::ReminderArmed { label, .. }
            | SchedulerEvent::ReminderShown { label }
            | SchedulerEvent::ReminderQueued { label, .. }
            | SchedulerEvent::ReminderDropped { label }
            | SchedulerEvent::ReminderSuppressed { label }
            | SchedulerEvent::ReminderCleared { label } => label,
        }
    }
}
