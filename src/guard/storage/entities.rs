use std::sync::Arc;

/// Whether usage applies to all activity or to one specific task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Global,
    Task,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Task => "task",
        }
    }
}

/// Amount of time to add to a stored bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageIncrement {
    pub bucket_start: i64,
    pub scope: Scope,
    /// Always `None` for [Scope::Global].
    pub task_id: Option<Arc<str>>,
    pub app_key: Arc<str>,
    pub app_name: Arc<str>,
    pub duration_sec: i64,
}

/// Summed usage of one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTotal {
    pub app_key: Arc<str>,
    pub app_name: Arc<str>,
    pub duration_sec: i64,
}

/// Selects rows of one scope with `bucket_start` inside `[from, to)`.
#[derive(Debug, Clone)]
pub struct TotalsQuery {
    pub scope: Scope,
    pub task_id: Option<Arc<str>>,
    pub from: i64,
    pub to: i64,
}

impl TotalsQuery {
    pub fn global(from: i64, to: i64) -> Self {
        Self {
            scope: Scope::Global,
            task_id: None,
            from,
            to,
        }
    }

    pub fn task(task_id: Arc<str>, from: i64, to: i64) -> Self {
        Self {
            scope: Scope::Task,
            task_id: Some(task_id),
            from,
            to,
        }
    }
}
