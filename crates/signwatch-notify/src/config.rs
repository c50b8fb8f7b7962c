use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Signs that arm a delayed reminder unless the config says otherwise.
pub const DEFAULT_IMPORTANT_SIGNS: [&str; 2] = ["max speed 100km/h", "caution accident area"];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid reminder interval {0:?}: expected 15 or 30")]
    InvalidInterval(String),
    #[error("notify.{field} must be > 0 (got {value})")]
    NonPositive { field: &'static str, value: f64 },
    #[error("notify.{field} must be at most {max} seconds (got {value})")]
    OutOfRange { field: &'static str, value: f64, max: f64 },
    #[error("notify.important_signs contains an empty label")]
    EmptyLabel,
}

/// Upper bound for any configured duration: one day.
pub const MAX_DURATION_S: f64 = 86_400.0;

/// Delay between detecting an important sign and showing its reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u64")]
pub enum ReminderInterval {
    Fifteen,
    Thirty,
}

impl ReminderInterval {
    pub fn secs(self) -> u64 {
        match self {
            ReminderInterval::Fifteen => 15,
            ReminderInterval::Thirty => 30,
        }
    }

    pub fn as_secs_f64(self) -> f64 { self.secs() as f64 }

    /// The other allowed value (keyboard `t`).
    pub fn toggled(self) -> Self {
        match self {
            ReminderInterval::Fifteen => ReminderInterval::Thirty,
            ReminderInterval::Thirty => ReminderInterval::Fifteen,
        }
    }
}

impl Default for ReminderInterval {
    fn default() -> Self { ReminderInterval::Fifteen }
}

impl TryFrom<u64> for ReminderInterval {
    type Error = ConfigError;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        match v {
            15 => Ok(ReminderInterval::Fifteen),
            30 => Ok(ReminderInterval::Thirty),
            other => Err(ConfigError::InvalidInterval(other.to_string())),
        }
    }
}

impl FromStr for ReminderInterval {
    type Err = ConfigError;

    // accepts "15", "30" and the "15 seconds" form used by the settings buttons
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.split_whitespace().next().unwrap_or_default();
        let v: u64 = token.parse().map_err(|_| ConfigError::InvalidInterval(s.to_string()))?;
        ReminderInterval::try_from(v).map_err(|_| ConfigError::InvalidInterval(s.to_string()))
    }
}

impl fmt::Display for ReminderInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.secs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebounceMode {
    /// One shared window across all labels.
    #[default]
    Global,
    /// Each label keeps its own window.
    PerLabel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub notifications: bool,
    pub audio: bool,
    pub reminders: bool,
    pub reminder_interval: ReminderInterval,

    pub notification_duration_s: f64,
    pub reminder_display_s: f64,
    pub debounce_window_s: f64,
    pub debounce_mode: DebounceMode,

    /// 0 keeps the single-banner behavior: a new reminder replaces the visible one.
    pub reminder_queue_capacity: usize,
    pub important_signs: Vec<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            notifications: true,
            audio: true,
            reminders: true,
            reminder_interval: ReminderInterval::default(),
            notification_duration_s: 3.0,
            reminder_display_s: 5.0,
            debounce_window_s: 3.0,
            debounce_mode: DebounceMode::default(),
            reminder_queue_capacity: 4,
            important_signs: DEFAULT_IMPORTANT_SIGNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl NotifyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("notification_duration_s", self.notification_duration_s),
            ("reminder_display_s", self.reminder_display_s),
            ("debounce_window_s", self.debounce_window_s),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { field, value });
            }
            if !value.is_finite() || value > MAX_DURATION_S {
                return Err(ConfigError::OutOfRange { field, value, max: MAX_DURATION_S });
            }
        }
        if self.important_signs.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::EmptyLabel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parses_tokens() {
        assert_eq!("15".parse::<ReminderInterval>(), Ok(ReminderInterval::Fifteen));
        assert_eq!("30 seconds".parse::<ReminderInterval>(), Ok(ReminderInterval::Thirty));
        assert!(matches!("20".parse::<ReminderInterval>(), Err(ConfigError::InvalidInterval(_))));
        assert!("soon".parse::<ReminderInterval>().is_err());
        assert_eq!(ReminderInterval::Fifteen.toggled(), ReminderInterval::Thirty);
    }

    #[test]
    fn toml_defaults_and_overrides() {
        let cfg: NotifyConfig = toml::from_str(
            r#"
            audio = false
            reminder_interval = 30
            debounce_mode = "per_label"
            "#,
        )
        .unwrap();
        assert!(!cfg.audio);
        assert!(cfg.notifications);
        assert_eq!(cfg.reminder_interval, ReminderInterval::Thirty);
        assert_eq!(cfg.debounce_mode, DebounceMode::PerLabel);
        assert_eq!(cfg.important_signs.len(), 2);
        assert!(cfg.validate().is_ok());

        let bad = toml::from_str::<NotifyConfig>("reminder_interval = 20");
        assert!(bad.is_err());
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let cfg = NotifyConfig { debounce_window_s: 0.0, ..Default::default() };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonPositive { field: "debounce_window_s", value: 0.0 })
        );
    }

    #[test]
    fn validate_rejects_unbounded_durations() {
        let cfg = NotifyConfig { reminder_display_s: 1e20, ..Default::default() };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { field: "reminder_display_s", .. })
        ));

        let cfg = NotifyConfig { notification_duration_s: f64::INFINITY, ..Default::default() };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { field: "notification_duration_s", .. })
        ));

        let cfg = NotifyConfig { debounce_window_s: f64::NAN, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::NonPositive { .. })));

        let cfg = NotifyConfig { debounce_window_s: MAX_DURATION_S, ..Default::default() };
        assert!(cfg.validate().is_ok());
    }
}
