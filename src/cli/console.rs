use std::time::{Duration, Instant};

use ansi_term::{Colour, Style};

use crate::guard::{
    collection::snapshot::UsageSnapshot, session::GuardObserver, warning::WarningState,
};

use super::today::format_duration;

const SUMMARY_EVERY: Duration = Duration::from_secs(60);
const SUMMARY_APPS: usize = 3;

/// Prints guard output to the terminal. Usage is summarized once a minute, warnings are shown
/// as they change.
pub struct ConsoleObserver {
    last_summary: Option<Instant>,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self { last_summary: None }
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardObserver for ConsoleObserver {
    fn usage_changed(&mut self, snapshot: &UsageSnapshot) {
        if self
            .last_summary
            .is_some_and(|last| last.elapsed() < SUMMARY_EVERY)
        {
            return;
        }
        self.last_summary = Some(Instant::now());
        if let Some(line) = summary_line(snapshot) {
            println!("{}", Style::new().dimmed().paint(line));
        }
    }

    fn warning_changed(&mut self, warning: &WarningState) {
        if warning.active {
            println!("{} {}", Colour::Red.bold().paint("Off task:"), warning.label);
        } else {
            println!("{}", Colour::Green.paint("Back on task"));
        }
    }

    fn show_overlay(&mut self) {
        // Terminal bell stands in for the overlay window.
        print!("\x07");
    }
}

/// The most used applications, e.g. `Today 1h2m0s: Editor 50m0s, Chat 12m0s`.
pub fn summary_line(snapshot: &UsageSnapshot) -> Option<String> {
    if snapshot.is_empty() {
        return None;
    }
    let apps = snapshot
        .sorted()
        .into_iter()
        .take(SUMMARY_APPS)
        .map(|(_, usage)| {
            format!(
                "{} {}",
                usage.name,
                format_duration(chrono::Duration::seconds(usage.seconds() as i64))
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let total = chrono::Duration::seconds((snapshot.total_millis() / 1000) as i64);
    Some(format!("Today {}: {apps}", format_duration(total)))
}
