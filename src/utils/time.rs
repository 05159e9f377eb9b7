use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone};

/// Width of a usage bucket in seconds.
pub const BUCKET_SECONDS: i64 = 300;

/// Usage older than this is removed by retention pruning.
pub const RETENTION_DAYS: i64 = 35;

/// Start of the bucket window containing `timestamp` (unix seconds). Windows are aligned to the
/// unix epoch so every process agrees on the boundaries.
pub fn bucket_start(timestamp: i64) -> i64 {
    timestamp.div_euclid(BUCKET_SECONDS) * BUCKET_SECONDS
}

/// Returns start of the day containing `date`.
pub fn day_start(date: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let midnight = date.date_naive().and_time(NaiveTime::MIN);
    date.offset()
        .from_local_datetime(&midnight)
        .single()
        .unwrap_or(date)
}

/// Returns start of the next day.
pub fn next_day_start(date: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    day_start(date + Duration::days(1))
}

/// Unix-second range `[start, end)` covering the calendar day of `date`.
pub fn day_bounds(date: DateTime<FixedOffset>) -> (i64, i64) {
    (day_start(date).timestamp(), next_day_start(date).timestamp())
}

/// Bucket starts strictly below the returned value are past the retention horizon.
pub fn retention_cutoff(now: DateTime<FixedOffset>) -> i64 {
    day_start(now - Duration::days(RETENTION_DAYS)).timestamp()
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};

    use super::*;

    #[test]
    fn test_bucket_alignment() {
        assert_eq!(bucket_start(0), 0);
        assert_eq!(bucket_start(299), 0);
        assert_eq!(bucket_start(300), 300);
        assert_eq!(bucket_start(1_530_662_461), 1_530_662_400);
        assert_eq!(bucket_start(-1), -300);
    }

    #[test]
    fn test_day_bounds_respect_offset() {
        let zone = FixedOffset::east_opt(2 * 3600).unwrap();
        let date = zone.with_ymd_and_hms(2018, 7, 4, 1, 30, 0).unwrap();
        let (start, end) = day_bounds(date);
        assert_eq!(start, zone.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap().timestamp());
        assert_eq!(end - start, 24 * 3600);
    }

    #[test]
    fn test_retention_cutoff_is_day_aligned() {
        let zone = FixedOffset::east_opt(0).unwrap();
        let now = zone.with_ymd_and_hms(2018, 7, 4, 15, 0, 0).unwrap();
        let cutoff = retention_cutoff(now);
        assert_eq!(cutoff, zone.with_ymd_and_hms(2018, 5, 30, 0, 0, 0).unwrap().timestamp());
    }
}
