//! GET /api/websites/{id}/metrics: one breakdown at a time, with search.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;

use tracklet_core::filters::parse_filters;
use tracklet_core::range::parse_date_range;
use tracklet_duckdb::queries::breakdowns::SessionField;
use tracklet_duckdb::queries::QueryWindow;

use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    #[serde(rename = "type")]
    pub metric_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub filters: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
}

pub async fn metrics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let site = state
        .db
        .get_website(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Website not found".to_string()))?;

    let tz: Tz = site.timezone.parse().unwrap_or(chrono_tz::UTC);
    let range = parse_date_range(
        query.start_date.as_deref(),
        query.end_date.as_deref(),
        &tz,
        Utc::now(),
    );
    let window = QueryWindow {
        website_id: site.id.clone(),
        range,
        filters: parse_filters(query.filters.as_deref()),
    };
    let search = query.search.as_deref();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let db = &state.db;
    let metric_type = query.metric_type.as_deref().unwrap_or("pages");
    let data = match metric_type {
        "pages" => db.pages_breakdown(&window, search, limit).await?,
        "entry_pages" => db.entry_pages(&window, search, limit).await?,
        "exit_links" => db.exit_links_breakdown(&window, search, limit).await?,
        "referrers" => db.referrers_breakdown(&window, search, limit).await?,
        "channels" => db.channels_breakdown(&window, search, limit).await?,
        "campaigns" => db.campaigns_breakdown(&window, search, limit).await?,
        "custom_events" => db.custom_events_breakdown(&window, search, limit).await?,
        "screens" => db.screens_breakdown(&window, search, limit).await?,
        "hostnames" => db.hostnames_breakdown(&window, search, limit).await?,
        "browsers" => {
            db.session_field_breakdown(&window, SessionField::Browser, search, limit)
                .await?
        }
        "os" => {
            db.session_field_breakdown(&window, SessionField::Os, search, limit)
                .await?
        }
        "devices" => {
            db.session_field_breakdown(&window, SessionField::DeviceType, search, limit)
                .await?
        }
        "countries" => {
            db.session_field_breakdown(&window, SessionField::Country, search, limit)
                .await?
        }
        "regions" => {
            db.session_field_breakdown(&window, SessionField::Region, search, limit)
                .await?
        }
        "cities" => {
            db.session_field_breakdown(&window, SessionField::City, search, limit)
                .await?
        }
        other => {
            return Err(AppError::BadRequest(format!(
                "unknown metric type: {other}"
            )))
        }
    };

    Ok(Json(json!({ "data": data })))
}
