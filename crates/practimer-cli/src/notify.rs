//! Terminal notifier.
//!
//! Beeps through the terminal bell according to the user's notification
//! preferences. System-notification and vibration toggles have no terminal
//! counterpart and are ignored here.

use std::io::Write;

use practimer_core::storage::NotificationsConfig;
use practimer_core::{Event, Notifier};

pub struct TerminalNotifier {
    prefs: NotificationsConfig,
}

impl TerminalNotifier {
    pub fn new(prefs: NotificationsConfig) -> Self {
        Self { prefs }
    }

    fn beep(&self, times: u32) {
        if !self.prefs.sound_enabled {
            return;
        }
        let mut out = std::io::stdout();
        for _ in 0..times {
            let _ = out.write_all(b"\x07");
        }
        let _ = out.flush();
    }
}

impl Notifier for TerminalNotifier {
    fn segment_completed(&self, _event: &Event) {
        self.beep(self.prefs.beep_count);
    }

    fn cycle_completed(&self, _event: &Event) {
        self.beep(self.prefs.beep_count + 1);
    }
}
