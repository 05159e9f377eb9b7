use std::{collections::HashSet, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_DEBUG_PORT: u16 = 9222;
pub const DEFAULT_LLM_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_BROWSER_APP: &str = "chromium";

/// Everything the guard can be configured with. Values coming from users should go through
/// [GuardConfig::normalized] before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub detection_interval_secs: u64,
    pub global_stats_enabled: bool,
    pub warnings_enabled: bool,
    pub blacklist: Vec<String>,
    pub relevance_enabled: bool,
    pub llm_model: String,
    pub llm_url: String,
    pub llm_timeout_secs: u64,
    pub debug_port: u16,
    /// Substring of the application key identifying the browser whose pages are checked.
    pub browser_app: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            detection_interval_secs: 1,
            global_stats_enabled: true,
            warnings_enabled: true,
            blacklist: vec![],
            relevance_enabled: false,
            llm_model: String::new(),
            llm_url: DEFAULT_LLM_URL.into(),
            llm_timeout_secs: 30,
            debug_port: DEFAULT_DEBUG_PORT,
            browser_app: DEFAULT_BROWSER_APP.into(),
        }
    }
}

impl GuardConfig {
    /// Reads a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<GuardConfig>(&content)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    /// Enforces the invariants the rest of the guard relies on.
    pub fn normalized(mut self) -> Self {
        self.detection_interval_secs = if self.global_stats_enabled {
            1
        } else {
            self.detection_interval_secs.max(1)
        };
        self.blacklist = normalize_blacklist(&self.blacklist);
        self.llm_model = self.llm_model.trim().to_string();
        self.llm_url = self.llm_url.trim().trim_end_matches('/').to_string();
        if self.llm_url.is_empty() {
            self.llm_url = DEFAULT_LLM_URL.into();
        }
        self.llm_timeout_secs = self.llm_timeout_secs.max(1);
        if self.debug_port == 0 {
            warn!("Debug port 0 is not usable, falling back to {DEFAULT_DEBUG_PORT}");
            self.debug_port = DEFAULT_DEBUG_PORT;
        }
        self.browser_app = self.browser_app.trim().to_lowercase();
        if self.browser_app.is_empty() {
            self.browser_app = DEFAULT_BROWSER_APP.into();
        }
        self
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs(self.detection_interval_secs.max(1))
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs.max(1))
    }
}

/// Lower-cases, trims and deduplicates patterns, keeping the first occurrence order.
pub fn normalize_blacklist(patterns: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    patterns
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
