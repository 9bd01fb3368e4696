use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// Half-open: ranges that only touch do not overlap.
pub fn overlaps<T: PartialOrd>(a_start: &T, a_end: &T, b_start: &T, b_end: &T) -> bool {
    a_start < b_end && a_end > b_start
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    /// Cuts the range at `limit`. Returns `None` when nothing remains before it.
    pub fn clip_end(self, limit: DateTime<Utc>) -> Option<Self> {
        Self::new(self.start, self.end.min(limit))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryInstant {
    /// Wall-clock time, read as already being in the reference zone.
    Naive(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
}

impl EntryInstant {
    /// Parses RFC 3339 text, falling back to an offset-less `YYYY-MM-DDTHH:MM[:SS]`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(zoned) = DateTime::parse_from_rfc3339(value) {
            return Some(Self::Zoned(zoned));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
            .map(Self::Naive)
    }

    pub fn normalize(&self, zone: &Tz) -> DateTime<Tz> {
        match self {
            Self::Zoned(value) => value.with_timezone(zone),
            // Local times skipped by a DST gap are read as UTC wall-clock.
            Self::Naive(value) => zone
                .from_local_datetime(value)
                .earliest()
                .unwrap_or_else(|| zone.from_utc_datetime(value)),
        }
    }

    pub fn to_utc(&self, zone: &Tz) -> DateTime<Utc> {
        self.normalize(zone).with_timezone(&Utc)
    }

    pub fn plus_minutes(self, minutes: i64) -> Self {
        let offset = Duration::minutes(minutes);
        match self {
            Self::Naive(value) => Self::Naive(value + offset),
            Self::Zoned(value) => Self::Zoned(value + offset),
        }
    }
}

impl From<DateTime<Utc>> for EntryInstant {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Zoned(value.fixed_offset())
    }
}

impl From<NaiveDateTime> for EntryInstant {
    fn from(value: NaiveDateTime) -> Self {
        Self::Naive(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn touching_ranges_do_not_overlap() {
        let morning = TimeRange::new(
            fixed_time("2026-02-16T09:00:00Z"),
            fixed_time("2026-02-16T10:00:00Z"),
        )
        .expect("valid range");
        let late_morning = TimeRange::new(
            fixed_time("2026-02-16T10:00:00Z"),
            fixed_time("2026-02-16T11:00:00Z"),
        )
        .expect("valid range");
        assert!(!overlaps(&morning.start, &morning.end, &late_morning.start, &late_morning.end));
        assert!(!overlaps(&late_morning.start, &late_morning.end, &morning.start, &morning.end));
    }

    #[test]
    fn range_requires_positive_length() {
        let at = fixed_time("2026-02-16T09:00:00Z");
        assert!(TimeRange::new(at, at).is_none());
        assert!(TimeRange::new(at, at - Duration::minutes(1)).is_none());
    }

    #[test]
    fn clip_end_truncates_or_drops() {
        let range = TimeRange::new(
            fixed_time("2026-02-16T09:00:00Z"),
            fixed_time("2026-02-16T10:30:00Z"),
        )
        .expect("valid range");
        let clipped = range
            .clip_end(fixed_time("2026-02-16T10:00:00Z"))
            .expect("partially inside");
        assert_eq!(clipped.end, fixed_time("2026-02-16T10:00:00Z"));
        assert!(range.clip_end(fixed_time("2026-02-16T09:00:00Z")).is_none());
    }

    #[test]
    fn naive_instants_are_read_in_the_reference_zone() {
        let naive = EntryInstant::parse("2026-02-16T09:00:00").expect("naive instant");
        assert!(matches!(naive, EntryInstant::Naive(_)));
        assert_eq!(
            naive.to_utc(&chrono_tz::Europe::Warsaw),
            fixed_time("2026-02-16T08:00:00Z")
        );
        assert_eq!(naive.to_utc(&Tz::UTC), fixed_time("2026-02-16T09:00:00Z"));
    }

    #[test]
    fn zoned_instants_keep_their_absolute_time() {
        let zoned = EntryInstant::parse("2026-02-16T10:00:00+01:00").expect("zoned instant");
        assert_eq!(
            zoned.to_utc(&chrono_tz::America::New_York),
            fixed_time("2026-02-16T09:00:00Z")
        );
    }

    #[test]
    fn unparseable_instant_is_rejected() {
        assert!(EntryInstant::parse("tomorrow").is_none());
    }

    // Feature: study-planner, Property 2: the overlap test is symmetric
    proptest! {
        #[test]
        fn property2_overlap_is_symmetric(
            a_start in 0i64..10_000,
            a_len in 1i64..500,
            b_start in 0i64..10_000,
            b_len in 1i64..500
        ) {
            let a_end = a_start + a_len;
            let b_end = b_start + b_len;
            prop_assert_eq!(
                overlaps(&a_start, &a_end, &b_start, &b_end),
                overlaps(&b_start, &b_end, &a_start, &a_end)
            );
            prop_assert!(!overlaps(&a_start, &a_end, &a_end, &(a_end + b_len)));
        }
    }
}
