//! Contracts with the rest of the application: where session information comes from and where
//! guard output goes.

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use super::{collection::snapshot::UsageSnapshot, warning::WarningState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Work,
    Break,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    pub id: Arc<str>,
    pub title: Arc<str>,
}

/// What the timer and the task list currently say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub active: bool,
    pub phase: Phase,
    pub task: Option<TaskRef>,
}

impl SessionState {
    pub fn idle() -> Self {
        Self {
            active: false,
            phase: Phase::Work,
            task: None,
        }
    }

    pub fn working_on(task: TaskRef) -> Self {
        Self {
            active: true,
            phase: Phase::Work,
            task: Some(task),
        }
    }

    /// Task-scoped tracking only happens during the work phase of a running session.
    pub fn tracked_task(&self) -> Option<&TaskRef> {
        if self.active && self.phase == Phase::Work {
            self.task.as_ref()
        } else {
            None
        }
    }
}

#[cfg_attr(test, automock)]
pub trait SessionSource: Send {
    fn session(&self) -> SessionState;
}

/// Receives everything the guard publishes. Called from the guard loop only.
#[cfg_attr(test, automock)]
pub trait GuardObserver: Send {
    fn usage_changed(&mut self, snapshot: &UsageSnapshot);

    fn warning_changed(&mut self, warning: &WarningState);

    /// Makes sure the warning overlay is visible. Called when a warning becomes active.
    fn show_overlay(&mut self);
}

/// Session that never changes, used by the command line host.
pub struct FixedSession(pub SessionState);

impl SessionSource for FixedSession {
    fn session(&self) -> SessionState {
        self.0.clone()
    }
}
