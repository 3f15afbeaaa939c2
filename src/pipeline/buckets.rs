// Bucket arithmetic. Buckets are aligned to the Unix epoch, so an hourly
// bucket always starts on the hour regardless of where a range begins.

use chrono::{DateTime, Duration, Utc};

/// Start of the bucket containing `ts`.
pub fn align_to_bucket(ts: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let width_secs = width.num_seconds();
    if width_secs <= 0 {
        return ts;
    }
    let offset = ts.timestamp().rem_euclid(width_secs);
    ts - Duration::seconds(offset) - Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos()))
}

/// Starts of every bucket overlapping `[start, end)`, oldest first.
///
/// The first bucket is the one containing `start`; the last is the one
/// containing the instant just before `end`.
pub fn bucket_starts(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    width: Duration,
) -> Vec<DateTime<Utc>> {
    if width <= Duration::zero() || end <= start {
        return Vec::new();
    }
    let mut starts = Vec::new();
    let mut current = align_to_bucket(start, width);
    while current < end {
        starts.push(current);
        current += width;
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_align_floors_to_the_hour() {
        assert_eq!(align_to_bucket(at(14, 37, 12), Duration::hours(1)), at(14, 0, 0));
        assert_eq!(align_to_bucket(at(14, 0, 0), Duration::hours(1)), at(14, 0, 0));
    }

    #[test]
    fn test_align_drops_subseconds() {
        let ts = at(9, 59, 59) + Duration::milliseconds(999);
        assert_eq!(align_to_bucket(ts, Duration::minutes(15)), at(9, 45, 0));
    }

    #[test]
    fn test_bucket_starts_half_open() {
        let starts = bucket_starts(at(10, 0, 0), at(13, 0, 0), Duration::hours(1));
        assert_eq!(starts, vec![at(10, 0, 0), at(11, 0, 0), at(12, 0, 0)]);
    }

    #[test]
    fn test_bucket_starts_partial_edges() {
        let starts = bucket_starts(at(10, 30, 0), at(12, 10, 0), Duration::hours(1));
        assert_eq!(starts, vec![at(10, 0, 0), at(11, 0, 0), at(12, 0, 0)]);
    }

    #[test]
    fn test_bucket_starts_empty_range() {
        assert!(bucket_starts(at(12, 0, 0), at(12, 0, 0), Duration::hours(1)).is_empty());
        assert!(bucket_starts(at(12, 0, 0), at(11, 0, 0), Duration::hours(1)).is_empty());
    }
}
