use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};

use crate::config::{NotifyConfig, ReminderInterval};
use crate::debounce::Debouncer;
use crate::state::{Notification, Reminder, SchedulerEvent};
use crate::timers::{ArmTimer, TimerQueue};

/// Notification/reminder state machine. All times are seconds on the caller's
/// clock; the scheduler never reads a clock itself.
///
/// `I` is whatever the caller uses for the cropped sign image. It is cloned
/// once per accepted notification, so a cheap handle (`Arc<..>`) is expected.
pub struct Scheduler<I> {
    cfg: NotifyConfig,
    important: HashSet<String>,
    debounce: Debouncer,

    notification: Option<Notification<I>>,
    reminder: Option<Reminder<I>>,
    queued: VecDeque<Reminder<I>>,

    // label -> epoch of its pending timer
    scheduled: HashMap<String, u64>,
    timers: TimerQueue<I>,
    next_epoch: u64,

    events: Vec<SchedulerEvent>,
}

impl<I: Clone> Scheduler<I> {
    pub fn new(cfg: NotifyConfig) -> Self {
        let important = cfg.important_signs.iter().cloned().collect();
        let debounce = Debouncer::new(cfg.debounce_mode, cfg.debounce_window_s);
        Self {
            cfg,
            important,
            debounce,
            notification: None,
            reminder: None,
            queued: VecDeque::new(),
            scheduled: HashMap::new(),
            timers: TimerQueue::default(),
            next_epoch: 1,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &NotifyConfig { &self.cfg }

    pub fn is_important(&self, label: &str) -> bool { self.important.contains(label) }

    /// Handles one detection that already passed the confidence threshold.
    pub fn on_detection(&mut self, label: &str, confidence: f32, image: I, now: f64) {
        debug!("notify: detection label={} conf={:.2} t={:.3}", label, confidence, now);

        // audio and banner share one debounce decision
        let open = self.debounce.is_open(label, now);
        let mut accepted = false;

        if self.cfg.audio && open {
            self.events.push(SchedulerEvent::Speak { label: label.to_string() });
            accepted = true;
        }

        if self.cfg.notifications && open {
            self.notification = Some(Notification {
                label: label.to_string(),
                image: image.clone(),
                shown_at: now,
                duration: self.cfg.notification_duration_s,
            });
            self.events.push(SchedulerEvent::NotificationShown { label: label.to_string() });
            accepted = true;
        }

        if accepted {
            self.debounce.mark(label, now);
        }

        if self.cfg.reminders && self.is_important(label) && !self.scheduled.contains_key(label) {
            self.arm(label, image, now);
        }
    }

    fn arm(&mut self, label: &str, image: I, now: f64) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let due = now + self.cfg.reminder_interval.as_secs_f64();

        self.scheduled.insert(label.to_string(), epoch);
        self.timers.push(ArmTimer { due, label: label.to_string(), image, armed_at: now, epoch });

        info!("notify: reminder set for {} in {}", label, self.cfg.reminder_interval);
        self.events.push(SchedulerEvent::ReminderArmed { label: label.to_string(), due });
    }

    /// An arming timer came due. Only effective when its label is still
    /// scheduled under the same epoch and reminders are still enabled.
    fn fire(&mut self, timer: ArmTimer<I>, now: f64) {
        let live = self.scheduled.get(&timer.label) == Some(&timer.epoch);
        if live {
            self.scheduled.remove(&timer.label);
        }
        if !live || !self.cfg.reminders {
            debug!("notify: stale reminder timer for {}", timer.label);
            self.events.push(SchedulerEvent::ReminderSuppressed { label: timer.label });
            return;
        }

        let reminder = Reminder {
            label: timer.label,
            image: timer.image,
            armed_at: timer.armed_at,
            interval: self.cfg.reminder_interval,
            shown_at: None,
            display_duration: self.cfg.reminder_display_s,
        };
        self.present(reminder, now);
    }

    fn present(&mut self, mut reminder: Reminder<I>, now: f64) {
        let cap = self.cfg.reminder_queue_capacity;
        if self.reminder.is_some() && cap > 0 {
            if self.queued.len() >= cap {
                if let Some(old) = self.queued.pop_front() {
                    info!("notify: reminder queue full, dropping {}", old.label);
                    self.events.push(SchedulerEvent::ReminderDropped { label: old.label });
                }
            }
            let label = reminder.label.clone();
            self.queued.push_back(reminder);
            self.events.push(SchedulerEvent::ReminderQueued { label, depth: self.queued.len() });
            return;
        }

        if let Some(prev) = self.reminder.take() {
            self.events.push(SchedulerEvent::ReminderCleared { label: prev.label });
        }
        reminder.shown_at = Some(now);
        info!("notify: reminder shown: {}", reminder.label);
        self.events.push(SchedulerEvent::ReminderShown { label: reminder.label.clone() });
        self.reminder = Some(reminder);
    }

    /// Render-cycle hook: fires due arming timers and expires banners.
    pub fn tick(&mut self, now: f64) {
        while let Some(timer) = self.timers.pop_due(now) {
            self.fire(timer, now);
        }

        if self.notification.as_ref().is_some_and(|n| n.is_expired(now)) {
            if let Some(n) = self.notification.take() {
                self.events.push(SchedulerEvent::NotificationCleared { label: n.label });
            }
        }

        if self.reminder.as_ref().is_some_and(|r| r.is_expired(now)) {
            if let Some(r) = self.reminder.take() {
                self.events.push(SchedulerEvent::ReminderCleared { label: r.label });
            }
            if let Some(next) = self.queued.pop_front() {
                self.present(next, now);
            }
        }
    }

    pub fn set_notifications_enabled(&mut self, on: bool) {
        self.cfg.notifications = on;
        if !on {
            if let Some(n) = self.notification.take() {
                self.events.push(SchedulerEvent::NotificationCleared { label: n.label });
            }
        }
        info!("notify: notifications {}", on_off(on));
    }

    pub fn set_audio_enabled(&mut self, on: bool) {
        self.cfg.audio = on;
        info!("notify: audio {}", on_off(on));
    }

    pub fn set_reminders_enabled(&mut self, on: bool) {
        self.cfg.reminders = on;
        if !on {
            self.invalidate_reminders();
        }
        info!("notify: reminders {}", on_off(on));
    }

    /// Setting the current value again is a no-op; a real change drops every
    /// armed, queued and visible reminder.
    pub fn set_reminder_interval(&mut self, interval: ReminderInterval) {
        if interval == self.cfg.reminder_interval {
            return;
        }
        self.cfg.reminder_interval = interval;
        self.invalidate_reminders();
        info!("notify: reminder interval {}", interval);
    }

    pub fn toggle_notifications(&mut self) { self.set_notifications_enabled(!self.cfg.notifications) }

    pub fn toggle_audio(&mut self) { self.set_audio_enabled(!self.cfg.audio) }

    pub fn toggle_reminders(&mut self) { self.set_reminders_enabled(!self.cfg.reminders) }

    pub fn cycle_reminder_interval(&mut self) {
        self.set_reminder_interval(self.cfg.reminder_interval.toggled())
    }

    fn invalidate_reminders(&mut self) {
        // pending timers stay queued and are discarded when they fire
        self.scheduled.clear();
        self.queued.clear();
        if let Some(r) = self.reminder.take() {
            self.events.push(SchedulerEvent::ReminderCleared { label: r.label });
        }
    }

    pub fn notification(&self) -> Option<&Notification<I>> { self.notification.as_ref() }

    pub fn reminder(&self) -> Option<&Reminder<I>> { self.reminder.as_ref() }

    pub fn queued_reminders(&self) -> impl Iterator<Item = &Reminder<I>> { self.queued.iter() }

    pub fn is_scheduled(&self, label: &str) -> bool { self.scheduled.contains_key(label) }

    pub fn scheduled_labels(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.scheduled.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    pub fn pending_timers(&self) -> usize { self.timers.len() }

    /// Earliest time at which `tick` would change something.
    pub fn next_deadline(&self) -> Option<f64> {
        [
            self.timers.next_due(),
            self.notification.as_ref().map(|n| n.expires_at()),
            self.reminder.as_ref().and_then(|r| r.expires_at()),
        ]
        .into_iter()
        .flatten()
        .min_by(|a, b| a.total_cmp(b))
    }

    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        std::mem::take(&mut self.events)
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}
