use std::collections::HashMap;

use crate::config::DebounceMode;

/// Tracks the last accepted notification time, globally or per label.
#[derive(Debug, Clone)]
pub struct Debouncer {
    mode: DebounceMode,
    window: f64,
    last: Option<f64>,
    last_by_label: HashMap<String, f64>,
}

impl Debouncer {
    pub fn new(mode: DebounceMode, window: f64) -> Self {
        Self { mode, window, last: None, last_by_label: HashMap::new() }
    }

    pub fn last_for(&self, label: &str) -> Option<f64> {
        match self.mode {
            DebounceMode::Global => self.last,
            DebounceMode::PerLabel => self.last_by_label.get(label).copied(),
        }
    }

    /// Strictly greater than the window, so an event exactly `window` seconds
    /// after the last one is still suppressed.
    pub fn is_open(&self, label: &str, now: f64) -> bool {
        match self.last_for(label) {
            None => true,
            Some(t) => now - t > self.window,
        }
    }

    pub fn mark(&mut self, label: &str, now: f64) {
        match self.mode {
            DebounceMode::Global => self.last = Some(now),
            DebounceMode::PerLabel => {
                self.last_by_label.insert(label.to_string(), now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_window_is_shared_between_labels() {
        let mut d = Debouncer::new(DebounceMode::Global, 3.0);
        assert!(d.is_open("stop", 0.0));
        d.mark("stop", 0.0);
        assert!(!d.is_open("yield", 1.0));
        assert!(!d.is_open("stop", 3.0));
        assert!(d.is_open("yield", 3.5));
    }

    #[test]
    fn per_label_windows_are_independent() {
        let mut d = Debouncer::new(DebounceMode::PerLabel, 3.0);
        d.mark("stop", 0.0);
        assert!(d.is_open("yield", 1.0));
        assert!(!d.is_open("stop", 1.0));
    }

    #[test]
    fn earlier_clock_keeps_window_closed() {
        let mut d = Debouncer::new(DebounceMode::Global, 3.0);
        d.mark("stop", 10.0);
        assert!(!d.is_open("stop", 2.0));
    }
}
