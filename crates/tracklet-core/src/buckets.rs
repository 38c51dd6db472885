//! Timezone-aware time-series bucketing.
//!
//! Bucket keys are computed from the event timestamp's wall-clock components
//! in the website's configured timezone, so a pageview at 23:30 local time
//! lands in the local day even when that is "tomorrow" in UTC. Weeks start
//! on Monday.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    /// Parse a query-string granularity; anything unrecognized is daily.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|r| r.to_lowercase()).as_deref() {
            Some("hourly") => Self::Hourly,
            Some("weekly") => Self::Weekly,
            Some("monthly") => Self::Monthly,
            _ => Self::Daily,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

fn local_date(ts: DateTime<Utc>, tz: &Tz) -> NaiveDate {
    ts.with_timezone(tz).date_naive()
}

pub fn hour_key(ts: DateTime<Utc>, tz: &Tz) -> String {
    let local = ts.with_timezone(tz);
    format!(
        "{:04}-{:02}-{:02}T{:02}:00",
        local.year(),
        local.month(),
        local.day(),
        local.hour()
    )
}

pub fn day_key(ts: DateTime<Utc>, tz: &Tz) -> String {
    local_date(ts, tz).format("%Y-%m-%d").to_string()
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

pub fn week_key(ts: DateTime<Utc>, tz: &Tz) -> String {
    monday_of(local_date(ts, tz)).format("%Y-%m-%d").to_string()
}

pub fn month_key(ts: DateTime<Utc>, tz: &Tz) -> String {
    let date = local_date(ts, tz);
    format!("{:04}-{:02}-01", date.year(), date.month())
}

pub fn bucket_key(ts: DateTime<Utc>, tz: &Tz, granularity: Granularity) -> String {
    match granularity {
        Granularity::Hourly => hour_key(ts, tz),
        Granularity::Daily => day_key(ts, tz),
        Granularity::Weekly => week_key(ts, tz),
        Granularity::Monthly => month_key(ts, tz),
    }
}

/// Every bucket key covering `[start, end]`, in order, each exactly once.
/// The aggregation layer zero-fills these to produce a gapless series.
pub fn dense_buckets(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tz: &Tz,
    granularity: Granularity,
) -> Vec<String> {
    let mut buckets: Vec<String> = Vec::new();
    let mut push = |key: String| {
        if buckets.last() != Some(&key) {
            buckets.push(key);
        }
    };

    match granularity {
        Granularity::Hourly => {
            let mut current = start;
            while current <= end {
                push(hour_key(current, tz));
                current += Duration::hours(1);
            }
        }
        Granularity::Daily => {
            let mut current = start;
            while current <= end {
                push(day_key(current, tz));
                current += Duration::days(1);
            }
            push(day_key(end, tz));
        }
        Granularity::Weekly => {
            let mut monday = monday_of(local_date(start, tz));
            let last = local_date(end, tz);
            while monday <= last {
                push(monday.format("%Y-%m-%d").to_string());
                monday += Duration::days(7);
            }
        }
        Granularity::Monthly => {
            let first = local_date(start, tz);
            let last = local_date(end, tz);
            let (mut year, mut month) = (first.year(), first.month());
            loop {
                push(format!("{year:04}-{month:02}-01"));
                if year > last.year() || (year == last.year() && month >= last.month()) {
                    break;
                }
                month += 1;
                if month > 12 {
                    month = 1;
                    year += 1;
                }
            }
        }
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use std::collections::HashSet;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn day_key_respects_timezone() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 02:30 UTC is still the previous day in New York (UTC-5).
        assert_eq!(day_key(utc(2024, 3, 2, 2, 30), &tz), "2024-03-01");
        assert_eq!(day_key(utc(2024, 3, 2, 12, 0), &tz), "2024-03-02");
    }

    #[test]
    fn hour_key_format() {
        let tz: Tz = "UTC".parse().unwrap();
        assert_eq!(hour_key(utc(2024, 1, 2, 5, 59), &tz), "2024-01-02T05:00");
    }

    #[test]
    fn week_key_is_monday() {
        let tz: Tz = "UTC".parse().unwrap();
        // 2024-06-13 is a Thursday; week starts Monday 2024-06-10.
        assert_eq!(week_key(utc(2024, 6, 13, 10, 0), &tz), "2024-06-10");
        // A Sunday belongs to the preceding Monday's week.
        assert_eq!(week_key(utc(2024, 6, 16, 10, 0), &tz), "2024-06-10");
        // Monday itself keys to itself.
        assert_eq!(week_key(utc(2024, 6, 10, 0, 0), &tz), "2024-06-10");
    }

    #[test]
    fn month_key_first_of_month() {
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        // 2024-05-31 23:00 UTC is already June 1st in Tokyo.
        assert_eq!(month_key(utc(2024, 5, 31, 23, 0), &tz), "2024-06-01");
    }

    #[test]
    fn dense_daily_buckets_have_no_gaps_or_duplicates() {
        let tz: Tz = "UTC".parse().unwrap();
        let buckets = dense_buckets(
            utc(2024, 2, 26, 0, 0),
            utc(2024, 3, 3, 23, 59),
            &tz,
            Granularity::Daily,
        );
        assert_eq!(buckets.len(), 7);
        assert_eq!(buckets.first().map(String::as_str), Some("2024-02-26"));
        assert_eq!(buckets.last().map(String::as_str), Some("2024-03-03"));
        let unique: HashSet<&String> = buckets.iter().collect();
        assert_eq!(unique.len(), buckets.len());
    }

    #[test]
    fn dense_hourly_buckets_cover_range() {
        let tz: Tz = "UTC".parse().unwrap();
        let buckets = dense_buckets(
            utc(2024, 1, 1, 0, 0),
            utc(2024, 1, 1, 23, 59),
            &tz,
            Granularity::Hourly,
        );
        assert_eq!(buckets.len(), 24);
    }

    #[test]
    fn dense_weekly_buckets_step_mondays() {
        let tz: Tz = "UTC".parse().unwrap();
        let buckets = dense_buckets(
            utc(2024, 6, 5, 0, 0),
            utc(2024, 6, 25, 0, 0),
            &tz,
            Granularity::Weekly,
        );
        assert_eq!(buckets, vec!["2024-06-03", "2024-06-10", "2024-06-17", "2024-06-24"]);
    }

    #[test]
    fn dense_monthly_buckets_cross_year() {
        let tz: Tz = "UTC".parse().unwrap();
        let buckets = dense_buckets(
            utc(2023, 11, 15, 0, 0),
            utc(2024, 2, 1, 0, 0),
            &tz,
            Granularity::Monthly,
        );
        assert_eq!(
            buckets,
            vec!["2023-11-01", "2023-12-01", "2024-01-01", "2024-02-01"]
        );
    }
}
