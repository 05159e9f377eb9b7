//! Focus guard: tracks which application has the focus during work sessions, keeps daily usage
//! statistics and warns when the user drifts to blacklisted applications or off-task pages.
//!

pub mod cli;
pub mod guard;
pub mod utils;
pub mod window_api;
