pub mod aggregator;
pub mod snapshot;

use std::sync::Arc;

use crate::window_api::ActiveWindowData;

/// A focused application as seen by the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveApp {
    /// Lower-cased application name. Used for bucket keys and pattern matching.
    pub key: Arc<str>,
    pub name: Arc<str>,
    pub title: Arc<str>,
}

impl ActiveApp {
    pub fn new(name: &str, title: &str) -> Self {
        let name = name.trim();
        Self {
            key: name.to_lowercase().into(),
            name: name.into(),
            title: title.into(),
        }
    }
}

impl From<ActiveWindowData> for ActiveApp {
    fn from(value: ActiveWindowData) -> Self {
        ActiveApp::new(&value.app_name, &value.window_title)
    }
}
