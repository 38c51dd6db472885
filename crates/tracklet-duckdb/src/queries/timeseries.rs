use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono_tz::Tz;
use serde::Serialize;

use tracklet_core::buckets::{bucket_key, dense_buckets, Granularity};

use crate::backend::parse_ts;
use crate::queries::{param_refs, push_filter_conditions, window_params, QueryWindow};
use crate::DuckDbBackend;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimePoint {
    pub date: String,
    pub visitors: i64,
    pub pageviews: i64,
    /// Minor currency units.
    pub revenue: i64,
}

impl DuckDbBackend {
    /// Dense zero-filled series over the window, bucketed by the site's
    /// local wall clock. Visitors count distinct per bucket.
    pub async fn time_series(
        &self,
        window: &QueryWindow,
        tz: &Tz,
        granularity: Granularity,
    ) -> Result<Vec<TimePoint>> {
        let conn = self.conn.lock().await;

        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT CAST(p.ts AS VARCHAR), s.visitor_id FROM pageviews p \
             JOIN sessions s ON p.session_id = s.id \
             WHERE p.website_id = ?1 \
             AND p.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, Some("p"));

        let mut pageview_counts: HashMap<String, i64> = HashMap::new();
        let mut bucket_visitors: HashMap<String, HashSet<String>> = HashMap::new();
        {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(param_refs(&params).as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (ts_raw, visitor_id) = row?;
                let key = bucket_key(parse_ts(&ts_raw)?, tz, granularity);
                *pageview_counts.entry(key.clone()).or_insert(0) += 1;
                bucket_visitors.entry(key).or_default().insert(visitor_id);
            }
        }

        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT CAST(pay.ts AS VARCHAR), pay.amount FROM payments pay \
             JOIN sessions s ON pay.session_id = s.id \
             WHERE pay.website_id = ?1 \
             AND pay.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);

        let mut revenue: HashMap<String, i64> = HashMap::new();
        {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(param_refs(&params).as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (ts_raw, amount) = row?;
                let key = bucket_key(parse_ts(&ts_raw)?, tz, granularity);
                *revenue.entry(key).or_insert(0) += amount;
            }
        }

        let series = dense_buckets(window.range.start, window.range.end, tz, granularity)
            .into_iter()
            .map(|date| TimePoint {
                visitors: bucket_visitors.get(&date).map_or(0, |set| set.len() as i64),
                pageviews: pageview_counts.get(&date).copied().unwrap_or(0),
                revenue: revenue.get(&date).copied().unwrap_or(0),
                date,
            })
            .collect();
        Ok(series)
    }
}
