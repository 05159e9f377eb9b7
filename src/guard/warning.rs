use std::sync::Arc;

use tracing::info;

use super::{
    collection::ActiveApp,
    relevance::{RelevanceState, Verdict},
    session::GuardObserver,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WarningState {
    pub active: bool,
    pub label: Arc<str>,
}

impl WarningState {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn active(label: Arc<str>) -> Self {
        Self {
            active: true,
            label,
        }
    }
}

/// Everything a warning decision depends on.
pub struct WarningInputs<'a> {
    pub tracking: bool,
    pub warnings_enabled: bool,
    pub active_app: Option<&'a ActiveApp>,
    pub blacklist: &'a [String],
    pub browser_app: &'a str,
    pub relevance: &'a RelevanceState,
}

/// Blacklisted applications win over page relevance.
pub fn evaluate(inputs: &WarningInputs<'_>) -> WarningState {
    if !inputs.tracking || !inputs.warnings_enabled {
        return WarningState::inactive();
    }
    let Some(app) = inputs.active_app else {
        return WarningState::inactive();
    };

    if inputs
        .blacklist
        .iter()
        .any(|pattern| app.key.contains(pattern.as_str()))
    {
        return WarningState::active(app.name.clone());
    }

    if app.key.contains(inputs.browser_app) && inputs.relevance.verdict == Verdict::Irrelevant {
        if let Some(label) = &inputs.relevance.label {
            return WarningState::active(label.clone());
        }
    }

    WarningState::inactive()
}

/// Holds the published warning and reports transitions to the observer.
#[derive(Debug, Default)]
pub struct WarningSignal {
    current: WarningState,
}

impl WarningSignal {
    pub fn current(&self) -> &WarningState {
        &self.current
    }

    /// Returns whether anything was published.
    pub fn update(&mut self, next: WarningState, observer: &mut dyn GuardObserver) -> bool {
        if next == self.current {
            return false;
        }
        let was_active = self.current.active;
        self.current = next;

        if self.current.active && !was_active {
            info!("Warning raised for {}", self.current.label);
            observer.show_overlay();
        } else if !self.current.active {
            info!("Warning cleared");
        }
        observer.warning_changed(&self.current);
        true
    }
}
