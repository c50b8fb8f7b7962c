use anyhow::{Context, Result};
use image::RgbImage;
use signwatch_notify::{NotifyConfig, SchedulerEvent};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Terminal stand-in for the on-frame overlay: banners become log lines,
/// the settings panel is printed on request.
pub struct Hud {
    show_settings: bool,
    last_frame: Option<RgbImage>,
}

impl Hud {
    pub fn new(show_settings: bool) -> Self {
        Self { show_settings, last_frame: None }
    }

    pub fn on_event(&self, ev: &SchedulerEvent) {
        match ev {
            SchedulerEvent::NotificationShown { label } => info!("hud: [sign] {}", label),
            SchedulerEvent::ReminderShown { label } => info!("hud: [reminder] Reminder: {}", label),
            SchedulerEvent::ReminderQueued { label, depth } => {
                info!("hud: reminder for {} waiting ({} queued)", label, depth)
            }
            SchedulerEvent::ReminderDropped { label } => info!("hud: reminder for {} dropped", label),
            other => debug!("hud: {:?}", other),
        }
    }

    pub fn toggle_settings(&mut self, cfg: &NotifyConfig) {
        self.show_settings = !self.show_settings;
        if self.show_settings {
            self.print_settings(cfg);
        }
    }

    /// Reprints the panel after a setting changed, if it is shown.
    pub fn refresh(&self, cfg: &NotifyConfig) {
        if self.show_settings {
            self.print_settings(cfg);
        }
    }

    pub fn print_settings(&self, cfg: &NotifyConfig) {
        for line in settings_lines(cfg) {
            println!("{}", line);
        }
    }

    pub fn set_frame(&mut self, frame: RgbImage) {
        self.last_frame = Some(frame);
    }

    /// Saves the last annotated frame as `capture-<unix>.png` under `dir`.
    pub fn save_capture(&self, dir: &Path) -> Result<PathBuf> {
        let frame = self.last_frame.as_ref().context("no frame to capture yet")?;
        let ts = time::OffsetDateTime::now_utc().unix_timestamp();
        let path = dir.join(format!("capture-{}.png", ts));
        frame.save(&path).with_context(|| format!("save {}", path.display()))?;
        info!("hud: saved {}", path.display());
        Ok(path)
    }
}

pub fn settings_lines(cfg: &NotifyConfig) -> Vec<String> {
    let on = |b: bool| if b { "ON" } else { "OFF" };
    vec![
        format!("Notification: {} (Press 'N')", on(cfg.notifications)),
        format!("Audio: {} (Press 'A')", on(cfg.audio)),
        format!("Reminder: {} (Press 'R')", on(cfg.reminders)),
        format!("Reminder Time: {} (Press 'T')", cfg.reminder_interval),
        "Press 'H' to show/hide this panel".to_string(),
    ]
}
