//! GET /api/websites/{id}/stats: the full dashboard bundle.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;

use tracklet_core::buckets::Granularity;
use tracklet_core::filters::parse_filters;
use tracklet_core::range::parse_date_range;
use tracklet_duckdb::queries::breakdowns::SessionField;
use tracklet_duckdb::queries::QueryWindow;

use crate::error::AppError;
use crate::state::AppState;

const BREAKDOWN_LIMIT: usize = 10;
const RECENT_SESSIONS_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub filters: Option<String>,
    pub granularity: Option<String>,
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let site = state
        .db
        .get_website(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Website not found".to_string()))?;

    let tz: Tz = site.timezone.parse().unwrap_or(chrono_tz::UTC);
    let now = Utc::now();
    let range = parse_date_range(
        query.start_date.as_deref(),
        query.end_date.as_deref(),
        &tz,
        now,
    );
    let granularity = Granularity::parse(query.granularity.as_deref());
    let window = QueryWindow {
        website_id: site.id.clone(),
        range,
        filters: parse_filters(query.filters.as_deref()),
    };

    let db = &state.db;
    let limit = BREAKDOWN_LIMIT;
    let scalars = db.stats_scalars(&window, now).await?;
    let top_pages = db.pages_breakdown(&window, None, limit).await?;
    let entry_pages = db.entry_pages(&window, None, limit).await?;
    let exit_links = db.exit_links_breakdown(&window, None, limit).await?;
    let top_referrers = db.referrers_breakdown(&window, None, limit).await?;
    let channel_data = db.channels_breakdown(&window, None, limit).await?;
    let campaign_data = db.campaigns_breakdown(&window, None, limit).await?;
    let custom_events = db.custom_events_breakdown(&window, None, limit).await?;
    let screens = db.screens_breakdown(&window, None, limit).await?;
    let browsers = db
        .session_field_breakdown(&window, SessionField::Browser, None, limit)
        .await?;
    let os = db
        .session_field_breakdown(&window, SessionField::Os, None, limit)
        .await?;
    let device_types = db
        .session_field_breakdown(&window, SessionField::DeviceType, None, limit)
        .await?;
    let countries = db
        .session_field_breakdown(&window, SessionField::Country, None, limit)
        .await?;
    let regions = db
        .session_field_breakdown(&window, SessionField::Region, None, limit)
        .await?;
    let cities = db
        .session_field_breakdown(&window, SessionField::City, None, limit)
        .await?;
    let revenue_by_channel = db.revenue_by_channel(&window, limit).await?;
    let revenue_by_country = db
        .revenue_by_session_field(&window, SessionField::Country, limit)
        .await?;
    let revenue_by_region = db
        .revenue_by_session_field(&window, SessionField::Region, limit)
        .await?;
    let revenue_by_city = db
        .revenue_by_session_field(&window, SessionField::City, limit)
        .await?;
    let revenue_by_browser = db
        .revenue_by_session_field(&window, SessionField::Browser, limit)
        .await?;
    let revenue_by_os = db
        .revenue_by_session_field(&window, SessionField::Os, limit)
        .await?;
    let revenue_by_device = db
        .revenue_by_session_field(&window, SessionField::DeviceType, limit)
        .await?;
    let revenue_by_url = db.revenue_by_entry(&window, true, limit).await?;
    let revenue_by_page = db.revenue_by_entry(&window, false, limit).await?;
    let recent_sessions = db.recent_sessions(&window, RECENT_SESSIONS_LIMIT).await?;
    let time_series = db.time_series(&window, &tz, granularity).await?;

    Ok(Json(json!({
        "stats": scalars,
        "topPages": top_pages,
        "entryPages": entry_pages,
        "exitLinks": exit_links,
        "topReferrers": top_referrers,
        "channelData": channel_data,
        "campaignData": campaign_data,
        "customEvents": custom_events,
        "deviceStats": screens,
        "browserStats": browsers,
        "osStats": os,
        "deviceTypeStats": device_types,
        "countryStats": countries,
        "regionStats": regions,
        "cityStats": cities,
        "revenueByChannel": revenue_by_channel,
        "revenueByCountry": revenue_by_country,
        "revenueByRegion": revenue_by_region,
        "revenueByCity": revenue_by_city,
        "revenueByBrowser": revenue_by_browser,
        "revenueByOs": revenue_by_os,
        "revenueByDevice": revenue_by_device,
        "revenueByUrl": revenue_by_url,
        "revenueByPage": revenue_by_page,
        "recentSessions": recent_sessions,
        "timeSeries": time_series,
        "timezone": site.timezone,
        "dateRange": {
            "startDate": range.start.to_rfc3339(),
            "endDate": range.end.to_rfc3339(),
        },
    })))
}
