use std::path::Path;

use anyhow::Result;
use chrono::Duration;

use crate::{
    guard::{
        storage::{
            entities::{AppTotal, TotalsQuery},
            usage_store::{UsageStorage, UsageStore},
        },
        DATABASE_FILE,
    },
    utils::{
        clock::{Clock, DefaultClock},
        time::{day_bounds, retention_cutoff},
    },
};

/// Prints today's stored usage, either global or for a single task. Time still pending in a
/// running guard shows up once it is flushed.
pub fn process_today_command(app_dir: &Path, task_id: Option<String>) -> Result<()> {
    let store = UsageStore::open(&app_dir.join(DATABASE_FILE))?;
    let (from, to) = day_bounds(DefaultClock.local_time());
    let query = match task_id {
        Some(id) => TotalsQuery::task(id.into(), from, to),
        None => TotalsQuery::global(from, to),
    };

    let totals = store.totals(&query)?;
    if totals.is_empty() {
        println!("No usage recorded today");
    }
    for line in render_totals(&totals) {
        println!("{line}");
    }
    Ok(())
}

pub fn process_prune_command(app_dir: &Path) -> Result<()> {
    let store = UsageStore::open(&app_dir.join(DATABASE_FILE))?;
    let removed = store.prune_before(retention_cutoff(DefaultClock.local_time()))?;
    println!("Removed {removed} old rows");
    Ok(())
}

pub fn process_clear_command(app_dir: &Path) -> Result<()> {
    let store = UsageStore::open(&app_dir.join(DATABASE_FILE))?;
    store.clear()?;
    println!("Usage statistics cleared");
    Ok(())
}

/// One `share%  duration  name` line per application.
fn render_totals(totals: &[AppTotal]) -> Vec<String> {
    let sum: i64 = totals.iter().map(|v| v.duration_sec).sum();
    totals
        .iter()
        .map(|entry| {
            let share = if sum > 0 {
                entry.duration_sec * 100 / sum
            } else {
                0
            };
            format!(
                "{share}%\t{}\t{}",
                format_duration(Duration::seconds(entry.duration_sec)),
                entry.app_name
            )
        })
        .collect()
}

pub fn format_duration(v: Duration) -> String {
    if v.num_hours() > 0 {
        format!(
            "{}h{}m{}s",
            v.num_hours(),
            v.num_minutes() % 60,
            v.num_seconds() % 60
        )
    } else if v.num_minutes() > 0 {
        format!("{}m{}s", v.num_minutes() % 60, v.num_seconds() % 60)
    } else {
        format!("{}s", v.num_seconds() % 60)
    }
}
