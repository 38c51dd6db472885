//! Query date-range parsing.
//!
//! Calendar dates (`YYYY-MM-DD`) are interpreted in the website's timezone:
//! a start bound means local midnight, an end bound means the last
//! millisecond of that local day. Timestamps containing `T` are parsed as
//! RFC 3339 instants and used as-is.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

pub const MAX_DATE_RANGE_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

enum Bound {
    Day(NaiveDate),
    Instant(DateTime<Utc>),
}

fn parse_bound(raw: &str) -> Option<Bound> {
    if raw.contains('T') {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| Bound::Instant(dt.with_timezone(&Utc)))
    } else {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().map(Bound::Day)
    }
}

/// Local midnight of `date`, as a UTC instant. During a DST gap the naive
/// midnight does not exist; the UTC reading is close enough for bucketing.
fn local_midnight(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}

fn end_of_day(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    local_midnight(date, tz) + Duration::days(1) - Duration::milliseconds(1)
}

fn start_instant(bound: &Bound, tz: &Tz) -> DateTime<Utc> {
    match bound {
        Bound::Day(date) => local_midnight(*date, tz),
        Bound::Instant(ts) => *ts,
    }
}

fn end_instant(bound: &Bound, tz: &Tz) -> DateTime<Utc> {
    match bound {
        Bound::Day(date) => end_of_day(*date, tz),
        Bound::Instant(ts) => *ts,
    }
}

fn clamp(mut start: DateTime<Utc>, mut end: DateTime<Utc>, now: DateTime<Utc>) -> DateRange {
    if end - start > Duration::days(MAX_DATE_RANGE_DAYS) {
        start = end - Duration::days(MAX_DATE_RANGE_DAYS);
    }
    if end > now {
        end = now;
    }
    DateRange { start, end }
}

/// Trailing 7 local days ending with today.
fn default_range(tz: &Tz, now: DateTime<Utc>) -> DateRange {
    let today = now.with_timezone(tz).date_naive();
    DateRange {
        start: local_midnight(today - Duration::days(6), tz),
        end: end_of_day(today, tz),
    }
}

/// Resolve the `startDate`/`endDate` query parameters. A missing bound is
/// filled so the range spans 7 days; both missing means the trailing week.
/// Ranges are capped at [`MAX_DATE_RANGE_DAYS`], explicit ends at `now`, and
/// an inverted or unparsable range falls back to the default.
pub fn parse_date_range(
    start_raw: Option<&str>,
    end_raw: Option<&str>,
    tz: &Tz,
    now: DateTime<Utc>,
) -> DateRange {
    let start_bound = start_raw.filter(|r| !r.is_empty()).and_then(parse_bound);
    let end_bound = end_raw.filter(|r| !r.is_empty()).and_then(parse_bound);

    let range = match (start_bound, end_bound) {
        (Some(s), Some(e)) => clamp(start_instant(&s, tz), end_instant(&e, tz), now),
        (Some(s), None) => {
            let start = start_instant(&s, tz);
            clamp(start, start + Duration::days(7) - Duration::milliseconds(1), now)
        }
        (None, Some(e)) => {
            let end = end_instant(&e, tz);
            let start = match &e {
                Bound::Day(date) => local_midnight(*date - Duration::days(6), tz),
                Bound::Instant(ts) => *ts - Duration::days(6),
            };
            clamp(start, end, now)
        }
        (None, None) => return default_range(tz, now),
    };

    if range.start > range.end {
        return default_range(tz, now);
    }
    range
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn tz(name: &str) -> Tz {
        name.parse().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn explicit_calendar_range_uses_local_day_bounds() {
        let tz = tz("America/New_York");
        let range = parse_date_range(Some("2024-06-01"), Some("2024-06-07"), &tz, now());
        // Local midnight June 1 in New York is 04:00 UTC (EDT).
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap());
        assert_eq!(
            range.end,
            Utc.with_ymd_and_hms(2024, 6, 8, 3, 59, 59).unwrap()
                + Duration::milliseconds(999)
        );
    }

    #[test]
    fn rfc3339_bounds_are_exact_instants() {
        let tz = tz("UTC");
        let range = parse_date_range(
            Some("2024-06-01T06:30:00Z"),
            Some("2024-06-02T18:00:00Z"),
            &tz,
            now(),
        );
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 6, 1, 6, 30, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 6, 2, 18, 0, 0).unwrap());
    }

    #[test]
    fn start_only_spans_seven_days() {
        let tz = tz("UTC");
        let range = parse_date_range(Some("2024-06-01"), None, &tz, now());
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(
            range.end,
            Utc.with_ymd_and_hms(2024, 6, 7, 23, 59, 59).unwrap()
                + Duration::milliseconds(999)
        );
    }

    #[test]
    fn end_only_spans_seven_days() {
        let tz = tz("UTC");
        let range = parse_date_range(None, Some("2024-06-10"), &tz, now());
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap());
        assert_eq!(
            range.end,
            Utc.with_ymd_and_hms(2024, 6, 10, 23, 59, 59).unwrap()
                + Duration::milliseconds(999)
        );
    }

    #[test]
    fn default_is_trailing_week() {
        let tz = tz("UTC");
        let range = parse_date_range(None, None, &tz, now());
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 6, 9, 0, 0, 0).unwrap());
        assert!(range.end > now());
    }

    #[test]
    fn oversized_range_is_clamped() {
        let tz = tz("UTC");
        let range = parse_date_range(Some("2020-01-01"), Some("2024-01-01"), &tz, now());
        assert_eq!(range.end - range.start, Duration::days(MAX_DATE_RANGE_DAYS));
    }

    #[test]
    fn future_end_is_clamped_to_now() {
        let tz = tz("UTC");
        let range = parse_date_range(Some("2024-06-10"), Some("2030-01-01"), &tz, now());
        assert_eq!(range.end, now());
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let tz = tz("UTC");
        let fallback = parse_date_range(None, None, &tz, now());
        assert_eq!(parse_date_range(Some("yesterday"), Some("06/01"), &tz, now()), fallback);
    }

    #[test]
    fn inverted_range_falls_back_to_default() {
        let tz = tz("UTC");
        let fallback = parse_date_range(None, None, &tz, now());
        assert_eq!(
            parse_date_range(Some("2024-06-10"), Some("2024-06-01"), &tz, now()),
            fallback
        );
    }
}
