use std::{ops::Deref, path::Path, sync::Mutex, sync::MutexGuard};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use tracing::{debug, instrument};

use super::entities::{AppTotal, TotalsQuery, UsageIncrement};

const SCHEMA_VERSION: i64 = 1;

/// Interface for abstracting storage of usage buckets.
pub trait UsageStorage: Send + Sync {
    /// Adds every increment to its bucket, creating missing rows. The display name of a touched
    /// row is replaced with the incoming one.
    fn add(&self, increments: &[UsageIncrement]) -> Result<()>;

    /// Sums usage per application for the query, largest total first.
    fn totals(&self, query: &TotalsQuery) -> Result<Vec<AppTotal>>;

    /// Removes rows whose bucket starts before `cutoff`. Returns the amount of removed rows.
    fn prune_before(&self, cutoff: i64) -> Result<usize>;

    /// Removes all usage.
    fn clear(&self) -> Result<()>;
}

impl<T: Deref + Send + Sync> UsageStorage for T
where
    T::Target: UsageStorage,
{
    fn add(&self, increments: &[UsageIncrement]) -> Result<()> {
        self.deref().add(increments)
    }

    fn totals(&self, query: &TotalsQuery) -> Result<Vec<AppTotal>> {
        self.deref().totals(query)
    }

    fn prune_before(&self, cutoff: i64) -> Result<usize> {
        self.deref().prune_before(cutoff)
    }

    fn clear(&self) -> Result<()> {
        self.deref().clear()
    }
}

/// The main realization of [UsageStorage], backed by SQLite. Access to the connection is
/// serialized, so concurrent writers queue up instead of interleaving transactions.
pub struct UsageStore {
    conn: Mutex<Connection>,
}

impl UsageStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open usage database {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        run_migrations(&conn).context("failed to prepare usage schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("usage store connection is poisoned"))
    }
}

fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }
    conn.execute_batch(
        "
CREATE TABLE IF NOT EXISTS usage_buckets (
    bucket_start INTEGER NOT NULL,
    scope TEXT NOT NULL,
    task_id TEXT,
    app_key TEXT NOT NULL,
    app_name TEXT NOT NULL,
    duration_sec INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (bucket_start, scope, task_id, app_key)
);
CREATE INDEX IF NOT EXISTS usage_buckets_scope_idx
    ON usage_buckets (scope, task_id, bucket_start);
PRAGMA user_version = 1;
",
    )
}

impl UsageStorage for UsageStore {
    #[instrument(skip_all, fields(count = increments.len()))]
    fn add(&self, increments: &[UsageIncrement]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            // SQLite treats NULLs in a primary key as distinct, so ON CONFLICT never fires for
            // global rows. Matching with `IS` handles both scopes.
            let mut update = tx.prepare_cached(
                "UPDATE usage_buckets
                 SET duration_sec = duration_sec + ?1, app_name = ?2
                 WHERE bucket_start = ?3 AND scope = ?4 AND task_id IS ?5 AND app_key = ?6",
            )?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO usage_buckets
                     (bucket_start, scope, task_id, app_key, app_name, duration_sec)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for increment in increments.iter().filter(|v| v.duration_sec > 0) {
                let updated = update.execute(params![
                    increment.duration_sec,
                    &*increment.app_name,
                    increment.bucket_start,
                    increment.scope.as_str(),
                    increment.task_id.as_deref(),
                    &*increment.app_key,
                ])?;
                if updated == 0 {
                    insert.execute(params![
                        increment.bucket_start,
                        increment.scope.as_str(),
                        increment.task_id.as_deref(),
                        &*increment.app_key,
                        &*increment.app_name,
                        increment.duration_sec,
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn totals(&self, query: &TotalsQuery) -> Result<Vec<AppTotal>> {
        let conn = self.lock()?;
        // With a single MAX() aggregate SQLite takes bare columns from the row holding the
        // maximum, which yields the most recent display name.
        let mut stmt = conn.prepare_cached(
            "SELECT app_key, app_name, MAX(bucket_start), SUM(duration_sec) AS total
             FROM usage_buckets
             WHERE scope = ?1 AND task_id IS ?2 AND bucket_start >= ?3 AND bucket_start < ?4
             GROUP BY app_key
             ORDER BY total DESC, app_key ASC",
        )?;
        let totals = stmt
            .query_map(
                params![
                    query.scope.as_str(),
                    query.task_id.as_deref(),
                    query.from,
                    query.to
                ],
                |row| {
                    Ok(AppTotal {
                        app_key: row.get::<_, String>(0)?.into(),
                        app_name: row.get::<_, String>(1)?.into(),
                        duration_sec: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(totals)
    }

    fn prune_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM usage_buckets WHERE bucket_start < ?1",
            params![cutoff],
        )?;
        debug!("Pruned {removed} usage rows older than {cutoff}");
        Ok(removed)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM usage_buckets", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use tempfile::tempdir;

    use crate::guard::storage::entities::{Scope, TotalsQuery, UsageIncrement};

    use super::{UsageStorage, UsageStore};

    const DAY_START: i64 = 1_530_662_400;
    const DAY_END: i64 = DAY_START + 86_400;

    fn increment(bucket_start: i64, task_id: Option<&str>, app: &str, duration_sec: i64) -> UsageIncrement {
        UsageIncrement {
            bucket_start,
            scope: if task_id.is_some() { Scope::Task } else { Scope::Global },
            task_id: task_id.map(Arc::from),
            app_key: app.to_lowercase().into(),
            app_name: app.into(),
            duration_sec,
        }
    }

    fn global_totals(store: &impl UsageStorage) -> Result<Vec<(String, i64)>> {
        Ok(store
            .totals(&TotalsQuery::global(DAY_START, DAY_END))?
            .into_iter()
            .map(|v| (v.app_key.to_string(), v.duration_sec))
            .collect())
    }

    #[test]
    fn test_add_accumulates_global_rows() -> Result<()> {
        let store = UsageStore::in_memory()?;
        store.add(&[increment(DAY_START, None, "Chat", 30)])?;
        store.add(&[increment(DAY_START, None, "Chat", 35)])?;
        store.add(&[increment(DAY_START + 300, None, "Chat", 5)])?;

        assert_eq!(global_totals(&store)?, vec![("chat".into(), 70)]);
        Ok(())
    }

    #[test]
    fn test_add_refreshes_display_name() -> Result<()> {
        let store = UsageStore::in_memory()?;
        store.add(&[increment(DAY_START, None, "chat", 10)])?;
        store.add(&[increment(DAY_START, None, "Chat", 10)])?;

        let totals = store.totals(&TotalsQuery::global(DAY_START, DAY_END))?;
        assert_eq!(&*totals[0].app_name, "Chat");
        assert_eq!(totals[0].duration_sec, 20);
        Ok(())
    }

    #[test]
    fn test_add_is_order_independent() -> Result<()> {
        let increments = [
            increment(DAY_START, None, "Chat", 12),
            increment(DAY_START, None, "Editor", 40),
            increment(DAY_START, None, "Chat", 3),
            increment(DAY_START + 600, None, "Editor", 7),
            increment(DAY_START, Some("t1"), "Editor", 9),
        ];

        let forward = UsageStore::in_memory()?;
        for v in &increments {
            forward.add(std::slice::from_ref(v))?;
        }

        let backward = UsageStore::in_memory()?;
        for v in increments.iter().rev() {
            backward.add(std::slice::from_ref(v))?;
        }

        let batched = UsageStore::in_memory()?;
        batched.add(&increments)?;

        let expected = vec![("editor".to_string(), 47), ("chat".to_string(), 15)];
        assert_eq!(global_totals(&forward)?, expected);
        assert_eq!(global_totals(&backward)?, expected);
        assert_eq!(global_totals(&batched)?, expected);
        Ok(())
    }

    #[test]
    fn test_empty_flush_changes_nothing() -> Result<()> {
        let store = UsageStore::in_memory()?;
        store.add(&[increment(DAY_START, None, "Chat", 30)])?;
        store.add(&[])?;
        store.add(&[increment(DAY_START, None, "Chat", 0)])?;

        assert_eq!(global_totals(&store)?, vec![("chat".into(), 30)]);
        Ok(())
    }

    #[test]
    fn test_task_scope_is_separate() -> Result<()> {
        let store = UsageStore::in_memory()?;
        store.add(&[
            increment(DAY_START, None, "Editor", 60),
            increment(DAY_START, Some("t1"), "Editor", 20),
            increment(DAY_START, Some("t2"), "Editor", 5),
        ])?;

        let task = store.totals(&TotalsQuery::task("t1".into(), DAY_START, DAY_END))?;
        assert_eq!(task.len(), 1);
        assert_eq!(task[0].duration_sec, 20);
        assert_eq!(global_totals(&store)?, vec![("editor".into(), 60)]);
        Ok(())
    }

    #[test]
    fn test_totals_respect_range_and_order() -> Result<()> {
        let store = UsageStore::in_memory()?;
        store.add(&[
            increment(DAY_START - 300, None, "Yesterday", 500),
            increment(DAY_START, None, "Small", 10),
            increment(DAY_START + 300, None, "Large", 100),
            increment(DAY_END, None, "Tomorrow", 500),
        ])?;

        assert_eq!(
            global_totals(&store)?,
            vec![("large".into(), 100), ("small".into(), 10)]
        );
        Ok(())
    }

    #[test]
    fn test_prune_removes_only_older_rows() -> Result<()> {
        let store = UsageStore::in_memory()?;
        store.add(&[
            increment(DAY_START - 600, None, "Old", 10),
            increment(DAY_START - 300, None, "Old", 10),
            increment(DAY_START, None, "Kept", 10),
            increment(DAY_START + 300, None, "Kept", 10),
        ])?;

        assert_eq!(store.prune_before(DAY_START)?, 2);
        assert_eq!(store.prune_before(DAY_START)?, 0);
        let remaining = store.totals(&TotalsQuery::global(0, i64::MAX))?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(&*remaining[0].app_key, "kept");
        assert_eq!(remaining[0].duration_sec, 20);
        Ok(())
    }

    #[test]
    fn test_clear() -> Result<()> {
        let store = UsageStore::in_memory()?;
        store.add(&[increment(DAY_START, None, "Chat", 30)])?;
        store.clear()?;
        assert!(global_totals(&store)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_store_survives_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("usage.sqlite");
        {
            let store = UsageStore::open(&path)?;
            store.add(&[increment(DAY_START, None, "Chat", 42)])?;
        }
        let store = Arc::new(UsageStore::open(&path)?);
        assert_eq!(global_totals(&store)?, vec![("chat".into(), 42)]);
        Ok(())
    }
}
