//! Contains logic for finding out which application currently holds input focus.
//! [GenericWindowManager] is the main artifact of this module that abstracts
//! the operations.

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use std::sync::Arc;

use anyhow::Result;
#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWindowData {
    /// Application the window belongs to. For example 'Discord' or 'Chromium'. Falls back to the
    /// window title when the window manager knows nothing better.
    pub app_name: Arc<str>,
    /// Name of the window. For example 'Budget - Chromium'
    pub window_title: Arc<str>,
}

/// Intended to serve as a contract windows and linux systems must implement.
#[cfg_attr(test, automock)]
pub trait WindowManager: Send {
    /// `Ok(None)` means the desktop has no focused window, which is a normal state.
    fn get_active_window_data(&mut self) -> Result<Option<ActiveWindowData>>;
}

/// Picks the application name through the usual fallback chain: class hint, instance name,
/// then the window title itself. Blank values are skipped.
pub fn resolve_app_name(
    class: Option<&str>,
    instance: Option<&str>,
    title: Option<&str>,
) -> Option<String> {
    [class, instance, title]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Serves as a cross-compatible WindowManager implementation.
pub struct GenericWindowManager {
    inner: Box<dyn WindowManager>,
}

impl GenericWindowManager {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsWindowManager;
                Ok(Self {
                    inner: Box::new(WindowsWindowManager::new()),
                })
            }
            else if #[cfg(feature = "x11")] {
                use x11::LinuxWindowManager;
                Ok(Self {
                    inner: Box::new(LinuxWindowManager::new()?),
                })
            }
            else {
                tracing::warn!("No window system backend compiled in, focus sampling is disabled");
                Ok(Self {
                    inner: Box::new(NoWindowManager),
                })
            }
        }
    }
}

impl WindowManager for GenericWindowManager {
    fn get_active_window_data(&mut self) -> Result<Option<ActiveWindowData>> {
        self.inner.get_active_window_data()
    }
}

/// Used when no window system API is available. Reports an empty desktop.
pub struct NoWindowManager;

impl WindowManager for NoWindowManager {
    fn get_active_window_data(&mut self) -> Result<Option<ActiveWindowData>> {
        Ok(None)
    }
}
