use std::{collections::HashMap, sync::Arc};

use crate::guard::storage::entities::{Scope, UsageIncrement};

use super::snapshot::DisplayScope;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub scope: Scope,
    pub task_id: Option<Arc<str>>,
    pub app_key: Arc<str>,
}

impl BucketKey {
    pub fn global(app_key: Arc<str>) -> Self {
        Self {
            scope: Scope::Global,
            task_id: None,
            app_key,
        }
    }

    pub fn task(task_id: Arc<str>, app_key: Arc<str>) -> Self {
        Self {
            scope: Scope::Task,
            task_id: Some(task_id),
            app_key,
        }
    }

    fn belongs_to(&self, scope: &DisplayScope) -> bool {
        match (scope, self.scope) {
            (DisplayScope::Global, Scope::Global) => true,
            (DisplayScope::Task(id), Scope::Task) => self.task_id.as_deref() == Some(&**id),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
struct BucketEntry {
    app_name: Arc<str>,
    millis: u64,
}

/// How sub-second leftovers are handled when the pending window is written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Whole seconds are written, the remainder stays pending for the next window.
    CarryRemainder,
    /// Everything is written, rounded to the nearest second.
    RoundRemainder,
}

/// In-memory usage for the current bucket window. Time is kept in milliseconds and written out
/// in whole seconds.
#[derive(Debug, Default)]
pub struct UsageAggregator {
    window_start: Option<i64>,
    entries: HashMap<BucketKey, BucketEntry>,
}

impl UsageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn window_start(&self) -> Option<i64> {
        self.window_start
    }

    /// Switches to the window starting at `bucket_start`. When this leaves a previous window, its
    /// totals are returned so they can be flushed before anything new is recorded.
    pub fn rotate(&mut self, bucket_start: i64) -> Vec<UsageIncrement> {
        let flushed = match self.window_start {
            Some(current) if current != bucket_start => self.drain(FlushMode::CarryRemainder),
            _ => vec![],
        };
        self.window_start = Some(bucket_start);
        flushed
    }

    pub fn record(&mut self, key: BucketKey, app_name: Arc<str>, millis: u64) {
        let entry = self.entries.entry(key).or_insert_with(|| BucketEntry {
            app_name: app_name.clone(),
            millis: 0,
        });
        entry.app_name = app_name;
        entry.millis += millis;
    }

    /// Produces increments for the pending window. Draining twice in a row yields nothing the
    /// second time.
    pub fn drain(&mut self, mode: FlushMode) -> Vec<UsageIncrement> {
        let Some(bucket_start) = self.window_start else {
            self.entries.clear();
            return vec![];
        };

        let mut increments = vec![];
        for (key, entry) in self.entries.iter_mut() {
            let seconds = match mode {
                FlushMode::CarryRemainder => entry.millis / 1000,
                FlushMode::RoundRemainder => (entry.millis + 500) / 1000,
            };
            entry.millis = entry.millis.saturating_sub(seconds * 1000);
            if seconds > 0 {
                increments.push(UsageIncrement {
                    bucket_start,
                    scope: key.scope,
                    task_id: key.task_id.clone(),
                    app_key: key.app_key.clone(),
                    app_name: entry.app_name.clone(),
                    duration_sec: seconds as i64,
                });
            }
        }

        match mode {
            FlushMode::CarryRemainder => self.entries.retain(|_, entry| entry.millis > 0),
            FlushMode::RoundRemainder => self.entries.clear(),
        }
        increments
    }

    /// Unflushed usage belonging to `scope`, as `(app key, app name, millis)`.
    pub fn pending_for<'a>(
        &'a self,
        scope: &'a DisplayScope,
    ) -> impl Iterator<Item = (&'a Arc<str>, &'a Arc<str>, u64)> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.belongs_to(scope))
            .map(|(key, entry)| (&key.app_key, &entry.app_name, entry.millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_seconds(increments: &[UsageIncrement], scope: Scope) -> i64 {
        increments
            .iter()
            .filter(|v| v.scope == scope)
            .map(|v| v.duration_sec)
            .sum()
    }

    #[test]
    fn test_rotation_flushes_previous_window() {
        let mut aggregator = UsageAggregator::new();
        assert!(aggregator.rotate(0).is_empty());
        aggregator.record(BucketKey::global("chat".into()), "Chat".into(), 65_000);
        aggregator.record(
            BucketKey::task("t1".into(), "chat".into()),
            "Chat".into(),
            65_000,
        );

        assert!(aggregator.rotate(0).is_empty());
        let flushed = aggregator.rotate(300);
        assert_eq!(flushed.len(), 2);
        assert!(flushed.iter().all(|v| v.bucket_start == 0));
        assert_eq!(total_seconds(&flushed, Scope::Global), 65);
        assert_eq!(total_seconds(&flushed, Scope::Task), 65);
        assert_eq!(aggregator.window_start(), Some(300));
    }

    #[test]
    fn test_second_drain_is_empty() {
        let mut aggregator = UsageAggregator::new();
        aggregator.rotate(0);
        aggregator.record(BucketKey::global("chat".into()), "Chat".into(), 3_000);
        assert_eq!(aggregator.drain(FlushMode::CarryRemainder).len(), 1);
        assert!(aggregator.drain(FlushMode::CarryRemainder).is_empty());
        assert!(aggregator.drain(FlushMode::RoundRemainder).is_empty());
    }

    #[test]
    fn test_remainder_is_carried_then_rounded() {
        let mut aggregator = UsageAggregator::new();
        aggregator.rotate(0);
        aggregator.record(BucketKey::global("chat".into()), "Chat".into(), 1_700);

        let flushed = aggregator.rotate(300);
        assert_eq!(flushed[0].duration_sec, 1);

        aggregator.record(BucketKey::global("chat".into()), "Chat".into(), 100);
        let pending = aggregator
            .pending_for(&DisplayScope::Global)
            .map(|(_, _, millis)| millis)
            .sum::<u64>();
        assert_eq!(pending, 800);

        let flushed = aggregator.drain(FlushMode::RoundRemainder);
        assert_eq!(flushed[0].duration_sec, 1);
        assert_eq!(flushed[0].bucket_start, 300);
    }

    #[test]
    fn test_pending_filtered_by_scope() {
        let mut aggregator = UsageAggregator::new();
        aggregator.rotate(0);
        aggregator.record(BucketKey::global("chat".into()), "Chat".into(), 1_000);
        aggregator.record(BucketKey::task("t1".into(), "editor".into()), "Editor".into(), 2_000);
        aggregator.record(BucketKey::task("t2".into(), "editor".into()), "Editor".into(), 4_000);

        let task = DisplayScope::Task("t1".into());
        let pending = aggregator.pending_for(&task).collect::<Vec<_>>();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].2, 2_000);

        let global = aggregator.pending_for(&DisplayScope::Global).collect::<Vec<_>>();
        assert_eq!(global.len(), 1);
        assert_eq!(&**global[0].0, "chat");
    }
}
