//! POST /api/track: the ingestion pipeline.
//!
//! Order matters: the payload is validated and the website resolved before
//! any quota is spent; rate limiting and the domain check run before geo
//! resolution so rejected traffic never triggers an outbound lookup; the
//! domain check also precedes the exclusion filter, so a request claiming
//! the wrong domain is rejected with 403 even when it would match an
//! exclusion rule; geo runs before exclusion only when the site actually
//! has country rules.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    Json,
};
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use tracklet_core::payload::{EventType, TrackEvent, TrackingPayload};
use tracklet_core::urls::{extract_pathname, extract_utm_params, is_local_domain, normalize_domain};
use tracklet_duckdb::events::{EventRow, PageviewRow, PaymentRow};
use tracklet_duckdb::identity::SessionAttribution;
use tracklet_duckdb::website::Website;

use crate::clientip::client_ip;
use crate::error::AppError;
use crate::exclusion::should_exclude;
use crate::geoip::GeoData;
use crate::identity::resolve_identity;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

async fn lookup_website(
    state: &AppState,
    event: &TrackEvent,
) -> Result<Website, AppError> {
    let site = match &event.website_id {
        Some(id) => state.db.get_website(id).await?,
        None => {
            state
                .db
                .get_website_by_domain(&normalize_domain(&event.domain))
                .await?
        }
    };
    site.ok_or_else(|| AppError::NotFound("Website not found".to_string()))
}

fn domain_matches(site: &Website, event: &TrackEvent) -> bool {
    let claimed = normalize_domain(&event.domain);
    if is_local_domain(&claimed) {
        return true;
    }
    let registered = normalize_domain(&site.domain);
    claimed == registered || claimed.ends_with(&format!(".{registered}"))
}

fn maybe_notify_spike(state: &Arc<AppState>, site: &Website) {
    let Some(email) = site.notify_email.clone() else {
        return;
    };
    let mailer = state.mailer.clone();
    let domain = site.domain.clone();
    let threshold = site.spike_threshold;
    let window = site.spike_window_seconds;
    tokio::spawn(async move {
        let subject = format!("Traffic spike on {domain}");
        let body = format!(
            "More than {threshold} sessions started within {window} seconds on {domain}."
        );
        if let Err(e) = mailer.send(&email, &subject, &body).await {
            warn!(domain = %domain, error = %e, "spike notification failed");
        }
    });
}

pub async fn track(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<serde_json::Value>, AppError> {
    let socket = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let headers = request.headers().clone();
    let body = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|_| AppError::BadRequest("request body too large".to_string()))?;

    let payload: TrackingPayload = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("invalid JSON body".to_string()))?;
    let event = payload
        .validate()
        .map_err(|errors| AppError::Validation { errors })?;

    let site = lookup_website(&state, &event).await?;
    let ip = client_ip(&headers, socket);

    let rate_key = format!("{}:{}", site.id, ip.as_deref().unwrap_or("unknown"));
    if !state.rate_limiter.allow(&rate_key).await {
        return Err(AppError::RateLimited);
    }

    if !domain_matches(&site, &event) {
        return Err(AppError::DomainMismatch);
    }

    let pathname = extract_pathname(&event.href);

    // Country rules force an early geo resolution; without them the lookup
    // is deferred until the event is known to be stored.
    let country_rules = !site.excluded_countries.is_empty();
    let mut geo = if country_rules {
        state.geo.resolve(ip.as_deref()).await
    } else {
        GeoData::default()
    };
    if let Some(reason) = should_exclude(
        &site,
        ip.as_deref(),
        Some(&pathname),
        geo.country.as_deref(),
    ) {
        info!(
            website = %site.id,
            reason = reason.as_str(),
            "event excluded by privacy rules"
        );
        return Ok(Json(json!({ "success": true, "excluded": true })));
    }
    if !country_rules {
        geo = state.geo.resolve(ip.as_deref()).await;
    }

    let utm = extract_utm_params(&event.href, event.referrer.as_deref());
    let attribution = SessionAttribution {
        referrer: event.referrer.clone(),
        utm_source: utm.source,
        utm_medium: utm.medium,
        utm_campaign: utm.campaign,
        country: geo.country,
        region: geo.region,
        city: geo.city,
    };

    let now = Utc::now();
    let expiry = Duration::minutes(state.config.session_expiry_minutes);
    let outcome = resolve_identity(&state.db, &site, &event, attribution, now, expiry).await?;

    match event.event_type {
        EventType::Pageview => {
            state
                .db
                .insert_pageview(&PageviewRow {
                    session_id: outcome.session_id.clone(),
                    website_id: site.id.clone(),
                    url: event.href.clone(),
                    pathname,
                    referrer: event.referrer.clone(),
                    title: event.title.clone(),
                    viewport_width: event.viewport_width,
                    viewport_height: event.viewport_height,
                    ts: now,
                })
                .await?;
        }
        EventType::Heartbeat => {
            // Identity resolution already extended the session.
        }
        EventType::Custom | EventType::Identify => {
            state
                .db
                .insert_event(&EventRow {
                    session_id: outcome.session_id.clone(),
                    website_id: site.id.clone(),
                    event_type: event.event_type.as_str().to_string(),
                    name: event.name.clone(),
                    data: event.data.as_ref().map(|v| v.to_string()),
                    ts: now,
                })
                .await?;
        }
        EventType::Payment => {
            let Some(amount) = event.amount else {
                return Err(AppError::BadRequest(
                    "amount: is required for payment events".to_string(),
                ));
            };
            state
                .db
                .insert_payment(&PaymentRow {
                    website_id: site.id.clone(),
                    visitor_id: event.visitor_id.clone(),
                    session_id: outcome.session_id.clone(),
                    amount,
                    currency: event.currency.clone(),
                    transaction_id: event.transaction_id.clone(),
                    ts: now,
                })
                .await?;
        }
    }

    if outcome.session_started && site.spike_enabled {
        let fired = state
            .spike
            .record_start(&site.id, site.spike_threshold, site.spike_window_seconds, now)
            .await;
        if fired {
            maybe_notify_spike(&state, &site);
        }
    }

    Ok(Json(json!({ "success": true })))
}
