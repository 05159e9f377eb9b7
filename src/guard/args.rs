use clap::Args;

use super::{
    config::GuardConfig,
    session::{Phase, SessionState, TaskRef},
};

/// Session and configuration overrides for a guard started from the terminal.
#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    #[arg(long, help = "Identifier of the task worked on. Without it only global usage is kept")]
    pub task_id: Option<String>,
    #[arg(long, requires = "task_id", help = "Task title used for page relevance checks. Defaults to the id")]
    pub task_title: Option<String>,
    #[arg(long, help = "Start with the session paused")]
    pub paused: bool,
    #[arg(long, help = "Seconds between samples. Only honoured with --no-global-stats")]
    pub interval: Option<u64>,
    #[arg(long, help = "Only sample while a session is running")]
    pub no_global_stats: bool,
    #[arg(long, help = "Never raise warnings")]
    pub no_warnings: bool,
    #[arg(long, help = "Application name fragment to warn about. Can be repeated")]
    pub blacklist: Vec<String>,
    #[arg(long, help = "Check whether browser pages belong to the task")]
    pub relevance: bool,
    #[arg(long, help = "Language model used for relevance checks")]
    pub model: Option<String>,
    #[arg(long, help = "Remote debugging port of the browser")]
    pub debug_port: Option<u16>,
    #[arg(long, help = "Application name fragment identifying the browser")]
    pub browser: Option<String>,
}

impl WatchArgs {
    /// Layers the flags over a loaded configuration.
    pub fn apply(&self, mut config: GuardConfig) -> GuardConfig {
        if let Some(interval) = self.interval {
            config.detection_interval_secs = interval;
        }
        if self.no_global_stats {
            config.global_stats_enabled = false;
        }
        if self.no_warnings {
            config.warnings_enabled = false;
        }
        config.blacklist.extend(self.blacklist.iter().cloned());
        if self.relevance {
            config.relevance_enabled = true;
        }
        if let Some(model) = &self.model {
            config.llm_model = model.clone();
        }
        if let Some(port) = self.debug_port {
            config.debug_port = port;
        }
        if let Some(browser) = &self.browser {
            config.browser_app = browser.clone();
        }
        config.normalized()
    }

    pub fn session(&self) -> SessionState {
        let task = self.task_id.as_deref().map(|id| TaskRef {
            id: id.into(),
            title: self.task_title.as_deref().unwrap_or(id).into(),
        });
        SessionState {
            active: !self.paused && task.is_some(),
            phase: Phase::Work,
            task,
        }
    }
}
