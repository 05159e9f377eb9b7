use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use tokio::time::Instant;

/// Represents an entity responsible for providing time across the guard. Wall time is used for
/// bucket alignment and day boundaries, monotonic time for measuring elapsed durations.
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    fn time(&self) -> DateTime<Utc>;

    fn instant(&self) -> Instant;

    /// Wall time in the zone that defines the user's calendar day.
    fn local_time(&self) -> DateTime<FixedOffset> {
        self.time().with_timezone(&Local).fixed_offset()
    }

    async fn sleep_until(&self, instant: Instant);
}

pub struct DefaultClock;

#[async_trait]
impl Clock for DefaultClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, instant: Instant) {
        tokio::time::sleep_until(instant).await;
    }
}

#[cfg(test)]
pub use manual::ManualClock;
