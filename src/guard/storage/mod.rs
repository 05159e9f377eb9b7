//!  Storage is organized through [usage_store::UsageStore].
//!  The basic idea is:
//!   - Usage is kept in a single SQLite table of 5 minute buckets.
//!   - Every row belongs to a scope: all activity (global) or one task.
//!   - Writes add to existing rows, so a bucket can be flushed in pieces.

pub mod entities;
pub mod usage_store;
