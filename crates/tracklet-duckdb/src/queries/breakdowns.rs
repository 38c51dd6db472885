use std::collections::BTreeMap;

use anyhow::Result;
use url::Url;

use tracklet_core::channel::classify_channel;
use tracklet_core::urls::{is_internal_referrer, strip_www};

use crate::queries::{
    finish_breakdown, param_refs, push_filter_conditions, window_params, LabelValue, QueryWindow,
};
use crate::DuckDbBackend;

/// Session columns that break down 1:1 into a label.
#[derive(Debug, Clone, Copy)]
pub enum SessionField {
    Browser,
    Os,
    DeviceType,
    Country,
    Region,
    City,
}

impl SessionField {
    fn column(&self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Os => "os",
            Self::DeviceType => "device_type",
            Self::Country => "country",
            Self::Region => "region",
            Self::City => "city",
        }
    }
}

fn collect_rows(
    stmt: &mut duckdb::Statement<'_>,
    params: &super::SqlParams,
) -> Result<Vec<LabelValue>> {
    let rows = stmt.query_map(param_refs(params).as_slice(), |row| {
        Ok(LabelValue {
            label: row.get(0)?,
            value: row.get(1)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

impl DuckDbBackend {
    pub async fn pages_breakdown(
        &self,
        window: &QueryWindow,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT p.pathname, COUNT(*) FROM pageviews p \
             JOIN sessions s ON p.session_id = s.id \
             WHERE p.website_id = ?1 \
             AND p.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, Some("p"));
        sql.push_str(" GROUP BY p.pathname");
        let rows = collect_rows(&mut conn.prepare(&sql)?, &params)?;
        Ok(finish_breakdown(rows, search, limit))
    }

    pub async fn session_field_breakdown(
        &self,
        window: &QueryWindow,
        field: SessionField,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let column = field.column();
        let (mut params, mut idx) = window_params(window);
        let mut sql = format!(
            "SELECT s.{column}, COUNT(*) FROM sessions s \
             WHERE s.website_id = ?1 \
             AND s.started_at BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP) \
             AND s.{column} IS NOT NULL AND s.{column} != ''"
        );
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);
        sql.push_str(&format!(" GROUP BY s.{column}"));
        let rows = collect_rows(&mut conn.prepare(&sql)?, &params)?;
        Ok(finish_breakdown(rows, search, limit))
    }

    pub async fn screens_breakdown(
        &self,
        window: &QueryWindow,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT CAST(s.screen_width AS VARCHAR) || 'x' || CAST(s.screen_height AS VARCHAR), \
                 COUNT(*) FROM sessions s \
             WHERE s.website_id = ?1 \
             AND s.started_at BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP) \
             AND s.screen_width > 0"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);
        sql.push_str(" GROUP BY 1");
        let rows = collect_rows(&mut conn.prepare(&sql)?, &params)?;
        Ok(finish_breakdown(rows, search, limit))
    }

    pub async fn custom_events_breakdown(
        &self,
        window: &QueryWindow,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT e.name, COUNT(*) FROM events e \
             JOIN sessions s ON e.session_id = s.id \
             WHERE e.website_id = ?1 \
             AND e.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP) \
             AND e.event_type = 'custom' AND e.name IS NOT NULL"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);
        sql.push_str(" GROUP BY e.name");
        let rows = collect_rows(&mut conn.prepare(&sql)?, &params)?;
        Ok(finish_breakdown(rows, search, limit))
    }

    /// Outbound clicks: custom events named `external_link`, labeled by the
    /// clicked URL (falling back to the link text) from the event data.
    pub async fn exit_links_breakdown(
        &self,
        window: &QueryWindow,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT e.data FROM events e \
             JOIN sessions s ON e.session_id = s.id \
             WHERE e.website_id = ?1 \
             AND e.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP) \
             AND e.name = 'external_link'"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs(&params).as_slice(), |row| {
            row.get::<_, Option<String>>(0)
        })?;

        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for row in rows {
            let data = row?.unwrap_or_default();
            let parsed: serde_json::Value = serde_json::from_str(&data).unwrap_or_default();
            let label = parsed
                .get("url")
                .and_then(|v| v.as_str())
                .or_else(|| parsed.get("text").and_then(|v| v.as_str()))
                .unwrap_or("unknown")
                .to_string();
            *counts.entry(label).or_insert(0) += 1;
        }
        let rows = counts
            .into_iter()
            .map(|(label, value)| LabelValue { label, value })
            .collect();
        Ok(finish_breakdown(rows, search, limit))
    }

    /// External referrer hostnames. Internal referrers (localhost and
    /// friends) are filtered out; sessions sharing a hostname merge.
    pub async fn referrers_breakdown(
        &self,
        window: &QueryWindow,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT s.referrer, COUNT(*) FROM sessions s \
             WHERE s.website_id = ?1 \
             AND s.started_at BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP) \
             AND s.referrer IS NOT NULL AND s.referrer != ''"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);
        sql.push_str(" GROUP BY s.referrer");

        let grouped = collect_rows(&mut conn.prepare(&sql)?, &params)?;
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for row in grouped {
            if is_internal_referrer(&row.label) {
                continue;
            }
            let label = Url::parse(&row.label)
                .ok()
                .and_then(|u| {
                    u.host_str().map(|h| {
                        let host = h.to_lowercase();
                        strip_www(&host).to_string()
                    })
                })
                .unwrap_or_else(|| row.label.clone());
            *counts.entry(label).or_insert(0) += row.value;
        }
        let rows = counts
            .into_iter()
            .map(|(label, value)| LabelValue { label, value })
            .collect();
        Ok(finish_breakdown(rows, search, limit))
    }

    /// Marketing channels, classified post-hoc over the grouped session
    /// attribution rows.
    pub async fn channels_breakdown(
        &self,
        window: &QueryWindow,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT s.referrer, s.utm_source, s.utm_medium, COUNT(*) FROM sessions s \
             WHERE s.website_id = ?1 \
             AND s.started_at BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);
        sql.push_str(" GROUP BY 1, 2, 3");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs(&params).as_slice(), |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for row in rows {
            let (referrer, source, medium, count) = row?;
            let channel =
                classify_channel(referrer.as_deref(), source.as_deref(), medium.as_deref());
            *counts.entry(channel).or_insert(0) += count;
        }
        let rows = counts
            .into_iter()
            .map(|(label, value)| LabelValue { label, value })
            .collect();
        Ok(finish_breakdown(rows, search, limit))
    }

    /// UTM campaigns, labeled as the query string that produced them.
    pub async fn campaigns_breakdown(
        &self,
        window: &QueryWindow,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT s.utm_source, s.utm_medium, s.utm_campaign, COUNT(*) FROM sessions s \
             WHERE s.website_id = ?1 \
             AND s.started_at BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP) \
             AND s.utm_source IS NOT NULL"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);
        sql.push_str(" GROUP BY 1, 2, 3");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs(&params).as_slice(), |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for row in rows {
            let (source, medium, campaign, count) = row?;
            let mut parts = Vec::new();
            if let Some(source) = source.filter(|v| !v.is_empty()) {
                parts.push(format!("utm_source={source}"));
            }
            if let Some(medium) = medium.filter(|v| !v.is_empty()) {
                parts.push(format!("utm_medium={medium}"));
            }
            if let Some(campaign) = campaign.filter(|v| !v.is_empty()) {
                parts.push(format!("utm_campaign={campaign}"));
            }
            if parts.is_empty() {
                continue;
            }
            let label = format!("?{}", parts.join("&"));
            *counts.entry(label).or_insert(0) += count;
        }
        let rows = counts
            .into_iter()
            .map(|(label, value)| LabelValue { label, value })
            .collect();
        Ok(finish_breakdown(rows, search, limit))
    }

    /// Hostnames served, extracted from the stored page URL.
    pub async fn hostnames_breakdown(
        &self,
        window: &QueryWindow,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT lower(regexp_extract(p.url, '^https?://([^/?#]+)', 1)) AS host, COUNT(*) \
             FROM pageviews p JOIN sessions s ON p.session_id = s.id \
             WHERE p.website_id = ?1 \
             AND p.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
            .to_string();
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, Some("p"));
        sql.push_str(" GROUP BY host");
        let mut rows = collect_rows(&mut conn.prepare(&sql)?, &params)?;
        rows.retain(|row| !row.label.is_empty());
        Ok(finish_breakdown(rows, search, limit))
    }
}
