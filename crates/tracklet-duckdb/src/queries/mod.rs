//! Aggregation query layer.
//!
//! Every query is scoped to one website and one resolved date range, with
//! the dashboard filters ANDed in. Conditions on session columns reference
//! the `s` alias; pageview conditions use the in-scope pageview alias when
//! the query has one and an EXISTS subquery otherwise.

use serde::Serialize;

use tracklet_core::filters::{Filter, FilterField};
use tracklet_core::range::DateRange;

pub mod breakdowns;
pub mod revenue;
pub mod stats;
pub mod timeseries;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LabelValue {
    pub label: String,
    pub value: i64,
}

/// The common scope of one aggregation request.
#[derive(Debug, Clone)]
pub struct QueryWindow {
    pub website_id: String,
    pub range: DateRange,
    pub filters: Vec<Filter>,
}

pub(crate) type SqlParams = Vec<Box<dyn duckdb::types::ToSql>>;

/// Seed the parameter list with the window scope (?1 website, ?2/?3 range)
/// and return the next free placeholder index.
pub(crate) fn window_params(window: &QueryWindow) -> (SqlParams, usize) {
    let params: SqlParams = vec![
        Box::new(window.website_id.clone()),
        Box::new(crate::backend::sql_ts(window.range.start)),
        Box::new(crate::backend::sql_ts(window.range.end)),
    ];
    (params, 4)
}

fn push_like(
    sql: &mut String,
    params: &mut SqlParams,
    idx: &mut usize,
    column: &str,
    value: &str,
) {
    sql.push_str(&format!(" AND {column} ILIKE ?{idx} ESCAPE '\\'"));
    params.push(Box::new(format!("%{value}%")));
    *idx += 1;
}

/// Append the dashboard-filter conditions. `pageview_alias` names the
/// pageview table alias when the query already joins pageviews.
pub(crate) fn push_filter_conditions(
    filters: &[Filter],
    sql: &mut String,
    params: &mut SqlParams,
    idx: &mut usize,
    pageview_alias: Option<&str>,
) {
    for filter in filters {
        match filter.field {
            FilterField::Referrer => push_like(sql, params, idx, "s.referrer", &filter.value),
            FilterField::Country => push_like(sql, params, idx, "s.country", &filter.value),
            FilterField::Region => push_like(sql, params, idx, "s.region", &filter.value),
            FilterField::City => push_like(sql, params, idx, "s.city", &filter.value),
            FilterField::Browser => push_like(sql, params, idx, "s.browser", &filter.value),
            FilterField::Os => push_like(sql, params, idx, "s.os", &filter.value),
            FilterField::Device => push_like(sql, params, idx, "s.device_type", &filter.value),
            FilterField::Campaign => {
                sql.push_str(&format!(
                    " AND (s.utm_source ILIKE ?{} ESCAPE '\\' OR s.utm_campaign ILIKE ?{} ESCAPE '\\')",
                    *idx,
                    *idx + 1
                ));
                params.push(Box::new(format!("%{}%", filter.value)));
                params.push(Box::new(format!("%{}%", filter.value)));
                *idx += 2;
            }
            FilterField::Goal => {
                sql.push_str(&format!(
                    " AND EXISTS (SELECT 1 FROM events ev \
                     WHERE ev.session_id = s.id AND ev.name ILIKE ?{idx} ESCAPE '\\')"
                ));
                params.push(Box::new(format!("%{}%", filter.value)));
                *idx += 1;
            }
            FilterField::Hostname | FilterField::Page | FilterField::EntryPage => {
                match pageview_alias {
                    Some(alias) => {
                        push_like(sql, params, idx, &format!("{alias}.pathname"), &filter.value)
                    }
                    None => {
                        sql.push_str(&format!(
                            " AND EXISTS (SELECT 1 FROM pageviews pv \
                             WHERE pv.session_id = s.id AND pv.pathname ILIKE ?{idx} ESCAPE '\\')"
                        ));
                        params.push(Box::new(format!("%{}%", filter.value)));
                        *idx += 1;
                    }
                }
            }
        }
    }
}

pub(crate) fn param_refs(params: &SqlParams) -> Vec<&dyn duckdb::types::ToSql> {
    params.iter().map(|p| p.as_ref()).collect()
}

/// Case-insensitive label search, then descending sort and truncation.
pub(crate) fn finish_breakdown(
    mut rows: Vec<LabelValue>,
    search: Option<&str>,
    limit: usize,
) -> Vec<LabelValue> {
    if let Some(query) = search.filter(|q| !q.is_empty()) {
        let query = query.to_lowercase();
        rows.retain(|row| row.label.to_lowercase().contains(&query));
    }
    rows.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    rows.truncate(limit);
    rows
}
