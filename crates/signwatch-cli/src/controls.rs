use signwatch_notify::ReminderInterval;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Operator input, one command per stdin line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    ToggleNotifications,
    ToggleAudio,
    ToggleReminders,
    CycleInterval,
    SetInterval(ReminderInterval),
    ToggleSettings,
    Capture,
    Pause,
    Quit,
    /// Empty line: advance to the next image.
    Next,
}

impl Control {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Some(Control::Next);
        }
        if let Ok(iv) = line.parse::<ReminderInterval>() {
            return Some(Control::SetInterval(iv));
        }
        match line.to_ascii_lowercase().as_str() {
            "n" => Some(Control::ToggleNotifications),
            "a" => Some(Control::ToggleAudio),
            "r" => Some(Control::ToggleReminders),
            "t" => Some(Control::CycleInterval),
            "h" => Some(Control::ToggleSettings),
            "p" => Some(Control::Capture),
            "s" => Some(Control::Pause),
            "q" => Some(Control::Quit),
            _ => None,
        }
    }
}

/// Forwards parsed stdin lines until stdin closes or the receiver is dropped.
pub fn spawn_stdin_reader(tx: mpsc::Sender<Control>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match Control::parse(&line) {
                    Some(c) => {
                        if tx.send(c).await.is_err() { break; }
                    }
                    None => warn!("controls: unknown command {:?} (n/a/r/t/h/p/s/q, 15/30, enter)", line.trim()),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("controls: stdin read failed: {}", e);
                    break;
                }
            }
        }
        debug!("controls: stdin closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_controls() {
        assert_eq!(Control::parse("N"), Some(Control::ToggleNotifications));
        assert_eq!(Control::parse(" a "), Some(Control::ToggleAudio));
        assert_eq!(Control::parse("t"), Some(Control::CycleInterval));
        assert_eq!(Control::parse("30"), Some(Control::SetInterval(ReminderInterval::Thirty)));
        assert_eq!(Control::parse(""), Some(Control::Next));
        assert_eq!(Control::parse("Q"), Some(Control::Quit));
        assert_eq!(Control::parse("20"), None);
        assert_eq!(Control::parse("zoom"), None);
    }
}
