use std::{collections::HashMap, sync::Arc};

/// Which usage the user interface is currently showing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DisplayScope {
    #[default]
    Global,
    Task(Arc<str>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppUsage {
    pub name: Arc<str>,
    pub millis: u64,
}

impl AppUsage {
    pub fn seconds(&self) -> u64 {
        self.millis / 1000
    }
}

/// Today's usage per application for one [DisplayScope]. Derived from the store and the pending
/// bucket, never persisted itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsageSnapshot {
    scope: DisplayScope,
    apps: HashMap<Arc<str>, AppUsage>,
}

impl UsageSnapshot {
    pub fn new(scope: DisplayScope) -> Self {
        Self {
            scope,
            apps: HashMap::new(),
        }
    }

    pub fn scope(&self) -> &DisplayScope {
        &self.scope
    }

    pub fn add(&mut self, key: Arc<str>, name: Arc<str>, millis: u64) {
        let usage = self.apps.entry(key).or_insert_with(|| AppUsage {
            name: name.clone(),
            millis: 0,
        });
        usage.name = name;
        usage.millis += millis;
    }

    pub fn get(&self, key: &str) -> Option<&AppUsage> {
        self.apps.get(key)
    }

    pub fn total_millis(&self) -> u64 {
        self.apps.values().map(|v| v.millis).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Entries with the most used application first.
    pub fn sorted(&self) -> Vec<(Arc<str>, AppUsage)> {
        let mut entries = self
            .apps
            .iter()
            .map(|(key, usage)| (key.clone(), usage.clone()))
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| b.1.millis.cmp(&a.1.millis).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_by_usage() {
        let mut snapshot = UsageSnapshot::new(DisplayScope::Global);
        snapshot.add("chat".into(), "Chat".into(), 1_000);
        snapshot.add("editor".into(), "Editor".into(), 5_000);
        snapshot.add("chat".into(), "Chat".into(), 500);
        snapshot.add("browser".into(), "Browser".into(), 1_500);

        let keys = snapshot
            .sorted()
            .into_iter()
            .map(|(key, _)| key.to_string())
            .collect::<Vec<_>>();
        assert_eq!(keys, ["editor", "browser", "chat"]);
        assert_eq!(snapshot.total_millis(), 8_000);
        assert_eq!(snapshot.get("chat").map(AppUsage::seconds), Some(1));
    }
}
