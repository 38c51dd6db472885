use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::backend::sql_ts;
use crate::queries::{
    param_refs, push_filter_conditions, window_params, LabelValue, QueryWindow,
};
use crate::DuckDbBackend;

/// How many recent sessions the duration average samples.
const DURATION_SAMPLE: i64 = 500;
const ONLINE_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsScalars {
    pub visitors: i64,
    pub pageviews: i64,
    pub sessions: i64,
    /// Mean of (last pageview − first pageview) over multi-pageview
    /// sessions, in milliseconds.
    pub avg_session_duration: i64,
    pub online: i64,
    /// Minor currency units.
    pub revenue: i64,
    pub customers: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentSession {
    pub id: String,
    pub visitor_id: String,
    pub visitor_name: Option<String>,
    pub avatar: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device_type: Option<String>,
    pub referrer: Option<String>,
    pub started_at: String,
    pub last_activity_at: String,
    pub pageviews: i64,
}

impl DuckDbBackend {
    pub async fn stats_scalars(
        &self,
        window: &QueryWindow,
        now: DateTime<Utc>,
    ) -> Result<StatsScalars> {
        let conn = self.conn.lock().await;

        // Sessions started in range, and the distinct visitors behind them.
        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT COUNT(*), COUNT(DISTINCT s.visitor_id) FROM sessions s \
             WHERE s.website_id = ?1 \
             AND s.started_at BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);
        let (sessions, visitors): (i64, i64) = conn
            .prepare(&sql)?
            .query_row(param_refs(&params).as_slice(), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT COUNT(*) FROM pageviews p \
             JOIN sessions s ON p.session_id = s.id \
             WHERE p.website_id = ?1 \
             AND p.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, Some("p"));
        let pageviews: i64 = conn
            .prepare(&sql)?
            .query_row(param_refs(&params).as_slice(), |row| row.get(0))?;

        let online_after = sql_ts(now - Duration::minutes(ONLINE_WINDOW_MINUTES));
        let online: i64 = conn
            .prepare(
                "SELECT COUNT(*) FROM sessions s \
                 WHERE s.website_id = ?1 AND s.last_activity_at > CAST(?2 AS TIMESTAMP)",
            )?
            .query_row(duckdb::params![window.website_id, online_after], |row| {
                row.get(0)
            })?;

        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT COALESCE(SUM(pay.amount), 0), COUNT(DISTINCT pay.visitor_id) \
             FROM payments pay JOIN sessions s ON pay.session_id = s.id \
             WHERE pay.website_id = ?1 \
             AND pay.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);
        let (revenue, customers): (i64, i64) = conn
            .prepare(&sql)?
            .query_row(param_refs(&params).as_slice(), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        // Bounded sample of the most recently finished multi-pageview
        // sessions; single-pageview sessions carry no duration signal.
        let (mut params, mut idx) = window_params(window);
        let mut inner = "SELECT EXTRACT(EPOCH FROM (MAX(p.ts) - MIN(p.ts))) * 1000 AS dur_ms \
             FROM pageviews p JOIN sessions s ON p.session_id = s.id \
             WHERE p.website_id = ?1 \
             AND p.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
            .to_string();
        push_filter_conditions(&window.filters, &mut inner, &mut params, &mut idx, Some("p"));
        inner.push_str(&format!(
            " GROUP BY p.session_id HAVING COUNT(*) > 1 \
             ORDER BY MAX(p.ts) DESC LIMIT ?{idx}"
        ));
        params.push(Box::new(DURATION_SAMPLE));
        let sql = format!("SELECT COALESCE(AVG(dur_ms), 0) FROM ({inner})");
        let avg_ms: f64 = conn
            .prepare(&sql)?
            .query_row(param_refs(&params).as_slice(), |row| row.get(0))?;

        Ok(StatsScalars {
            visitors,
            pageviews,
            sessions,
            avg_session_duration: avg_ms.round() as i64,
            online,
            revenue,
            customers,
        })
    }

    /// Entry pages: each session's earliest pageview. When several
    /// pageviews share the minimum timestamp, all of them count.
    pub async fn entry_pages(
        &self,
        window: &QueryWindow,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;

        let (mut params, mut idx) = window_params(window);
        let mut firsts = "SELECT p.session_id AS session_id, MIN(p.ts) AS first_ts \
             FROM pageviews p JOIN sessions s ON p.session_id = s.id \
             WHERE p.website_id = ?1 \
             AND p.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
            .to_string();
        push_filter_conditions(&window.filters, &mut firsts, &mut params, &mut idx, Some("p"));
        firsts.push_str(" GROUP BY p.session_id");

        let sql = format!(
            "WITH firsts AS ({firsts}) \
             SELECT p.pathname, COUNT(*) AS hits FROM pageviews p \
             JOIN firsts f ON p.session_id = f.session_id AND p.ts = f.first_ts \
             GROUP BY p.pathname"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs(&params).as_slice(), |row| {
            Ok(LabelValue {
                label: row.get(0)?,
                value: row.get(1)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(super::finish_breakdown(out, search, limit))
    }

    pub async fn recent_sessions(
        &self,
        window: &QueryWindow,
        limit: usize,
    ) -> Result<Vec<RecentSession>> {
        let conn = self.conn.lock().await;

        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT s.id, s.visitor_id, v.name, v.avatar, \
                 s.country, s.city, s.browser, s.os, s.device_type, s.referrer, \
                 CAST(s.started_at AS VARCHAR), CAST(s.last_activity_at AS VARCHAR), \
                 (SELECT COUNT(*) FROM pageviews p WHERE p.session_id = s.id) \
             FROM sessions s \
             LEFT JOIN visitors v ON v.website_id = s.website_id AND v.id = s.visitor_id \
             WHERE s.website_id = ?1 \
             AND s.started_at BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);
        sql.push_str(&format!(" ORDER BY s.last_activity_at DESC LIMIT ?{idx}"));
        params.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs(&params).as_slice(), |row| {
            Ok(RecentSession {
                id: row.get(0)?,
                visitor_id: row.get(1)?,
                visitor_name: row.get(2)?,
                avatar: row.get(3)?,
                country: row.get(4)?,
                city: row.get(5)?,
                browser: row.get(6)?,
                os: row.get(7)?,
                device_type: row.get(8)?,
                referrer: row.get(9)?,
                started_at: row.get(10)?,
                last_activity_at: row.get(11)?,
                pageviews: row.get(12)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
