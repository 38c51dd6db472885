use std::collections::BTreeMap;

use anyhow::Result;

use tracklet_core::channel::classify_channel;

use crate::queries::breakdowns::SessionField;
use crate::queries::{
    finish_breakdown, param_refs, push_filter_conditions, window_params, LabelValue, QueryWindow,
};
use crate::DuckDbBackend;

/// Revenue breakdowns sum payment amounts (minor units) instead of counting
/// rows; the session joined through the payment supplies the dimension.
impl DuckDbBackend {
    pub async fn revenue_by_session_field(
        &self,
        window: &QueryWindow,
        field: SessionField,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let column = match field {
            SessionField::Browser => "browser",
            SessionField::Os => "os",
            SessionField::DeviceType => "device_type",
            SessionField::Country => "country",
            SessionField::Region => "region",
            SessionField::City => "city",
        };
        let (mut params, mut idx) = window_params(window);
        let mut sql = format!(
            "SELECT COALESCE(s.{column}, 'Unknown'), SUM(pay.amount) \
             FROM payments pay JOIN sessions s ON pay.session_id = s.id \
             WHERE pay.website_id = ?1 \
             AND pay.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
        );
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);
        sql.push_str(" GROUP BY 1");

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
        Ok(finish_breakdown(out, None, limit))
    }

    pub async fn revenue_by_channel(
        &self,
        window: &QueryWindow,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let (mut params, mut idx) = window_params(window);
        let mut sql = "SELECT s.referrer, s.utm_source, s.utm_medium, SUM(pay.amount) \
             FROM payments pay JOIN sessions s ON pay.session_id = s.id \
             WHERE pay.website_id = ?1 \
             AND pay.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
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

        let mut sums: BTreeMap<String, i64> = BTreeMap::new();
        for row in rows {
            let (referrer, source, medium, amount) = row?;
            let channel =
                classify_channel(referrer.as_deref(), source.as_deref(), medium.as_deref());
            *sums.entry(channel).or_insert(0) += amount;
        }
        let rows = sums
            .into_iter()
            .map(|(label, value)| LabelValue { label, value })
            .collect();
        Ok(finish_breakdown(rows, None, limit))
    }

    /// Revenue attributed to the paying session's entry pageview, labeled
    /// either by pathname or by full URL.
    pub async fn revenue_by_entry(
        &self,
        window: &QueryWindow,
        by_url: bool,
        limit: usize,
    ) -> Result<Vec<LabelValue>> {
        let conn = self.conn.lock().await;
        let label_column = if by_url { "pv.url" } else { "pv.pathname" };

        let (mut params, mut idx) = window_params(window);
        let mut sql = format!(
            "WITH firsts AS ( \
                SELECT pv.session_id AS session_id, MIN(pv.ts) AS first_ts \
                FROM pageviews pv WHERE pv.website_id = ?1 GROUP BY pv.session_id \
             ) \
             SELECT {label_column}, SUM(pay.amount) \
             FROM payments pay \
             JOIN sessions s ON pay.session_id = s.id \
             JOIN firsts f ON pay.session_id = f.session_id \
             JOIN pageviews pv ON pv.session_id = f.session_id AND pv.ts = f.first_ts \
             WHERE pay.website_id = ?1 \
             AND pay.ts BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"
        );
        push_filter_conditions(&window.filters, &mut sql, &mut params, &mut idx, None);
        sql.push_str(&format!(" GROUP BY {label_column}"));

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
        Ok(finish_breakdown(out, None, limit))
    }
}
