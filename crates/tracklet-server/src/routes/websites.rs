//! Website management endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer};
use serde_json::json;

use tracklet_core::urls::normalize_domain;
use tracklet_duckdb::website::{CreateWebsiteParams, UpdateWebsiteParams, Website};

use crate::error::AppError;
use crate::mailer::is_valid_email;
use crate::state::AppState;

/// Distinguishes an absent `notifyEmail` key from an explicit null: absent
/// leaves the column alone, null clears it.
fn double_option<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebsiteBody {
    pub domain: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateWebsiteBody {
    pub timezone: Option<String>,
    pub excluded_ips: Option<Vec<String>>,
    pub excluded_paths: Option<Vec<String>>,
    pub excluded_countries: Option<Vec<String>>,
    pub spike_enabled: Option<bool>,
    pub spike_threshold: Option<i64>,
    pub spike_window_seconds: Option<i64>,
    pub weekly_summary: Option<bool>,
    #[serde(deserialize_with = "double_option")]
    pub notify_email: Option<Option<String>>,
}

/// Normalize user-entered domains: scheme and path stripped, lowercased,
/// `www.` and port removed.
fn clean_domain(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme);
    normalize_domain(host)
}

fn validate_timezone(timezone: &str) -> Result<(), AppError> {
    timezone
        .parse::<Tz>()
        .map(|_| ())
        .map_err(|_| AppError::BadRequest(format!("unknown timezone: {timezone}")))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Website>>, AppError> {
    Ok(Json(state.db.list_websites().await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateWebsiteBody>,
) -> Result<Json<Website>, AppError> {
    let domain = body
        .domain
        .as_deref()
        .map(clean_domain)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| AppError::BadRequest("domain is required".to_string()))?;
    if let Some(ref timezone) = body.timezone {
        validate_timezone(timezone)?;
    }
    if state.db.get_website_by_domain(&domain).await?.is_some() {
        return Err(AppError::BadRequest(
            "A website with this domain already exists".to_string(),
        ));
    }
    let site = state
        .db
        .create_website(CreateWebsiteParams {
            domain,
            timezone: body.timezone,
        })
        .await?;
    Ok(Json(site))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Website>, AppError> {
    let site = state
        .db
        .get_website(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Website not found".to_string()))?;
    Ok(Json(site))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateWebsiteBody>,
) -> Result<Json<Website>, AppError> {
    if let Some(ref timezone) = body.timezone {
        validate_timezone(timezone)?;
    }
    if let Some(threshold) = body.spike_threshold {
        if threshold < 1 {
            return Err(AppError::BadRequest(
                "spikeThreshold must be at least 1".to_string(),
            ));
        }
    }
    if let Some(window) = body.spike_window_seconds {
        if window < 1 {
            return Err(AppError::BadRequest(
                "spikeWindowSeconds must be at least 1".to_string(),
            ));
        }
    }
    if let Some(Some(ref email)) = body.notify_email {
        if !is_valid_email(email) {
            return Err(AppError::BadRequest(
                "notifyEmail is not a valid address".to_string(),
            ));
        }
    }

    let site = state
        .db
        .update_website(
            &id,
            UpdateWebsiteParams {
                timezone: body.timezone,
                excluded_ips: body.excluded_ips,
                excluded_paths: body.excluded_paths,
                excluded_countries: body.excluded_countries,
                spike_enabled: body.spike_enabled,
                spike_threshold: body.spike_threshold,
                spike_window_seconds: body.spike_window_seconds,
                weekly_summary: body.weekly_summary,
                notify_email: body.notify_email,
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Website not found".to_string()))?;
    Ok(Json(site))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.db.delete_website(&id).await? {
        return Err(AppError::NotFound("Website not found".to_string()));
    }
    Ok(Json(json!({ "success": true })))
}
