//! Identity resolution policy for the ingest pipeline.
//!
//! The client proposes visitor and session ids; the server decides whether
//! the proposed session is still usable. An expired or foreign session id is
//! replaced by a server-generated one so stale snippets cannot resurrect or
//! cross-link sessions.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use tracklet_core::payload::TrackEvent;
use tracklet_duckdb::identity::{NewSession, SessionAttribution, SessionInsert};
use tracklet_duckdb::website::Website;
use tracklet_duckdb::DuckDbBackend;

#[derive(Debug, Clone)]
pub struct IdentityOutcome {
    pub session_id: String,
    /// True when this event opened a new session row.
    pub session_started: bool,
}

fn new_session_row(
    event: &TrackEvent,
    site: &Website,
    session_id: String,
    attribution: SessionAttribution,
    now: DateTime<Utc>,
    expiry: Duration,
) -> NewSession {
    NewSession {
        id: session_id,
        visitor_id: event.visitor_id.clone(),
        website_id: site.id.clone(),
        started_at: now,
        expires_at: now + expiry,
        attribution,
        screen_width: event.screen_width,
        screen_height: event.screen_height,
        language: event.language.clone(),
        timezone: event.timezone.clone(),
        browser: event.browser.clone(),
        browser_version: event.browser_version.clone(),
        os: event.os.clone(),
        os_version: event.os_version.clone(),
        device_type: event.device_type.clone(),
        is_pwa: event.is_pwa,
    }
}

/// Resolve the visitor and session for one event.
///
/// The visitor row is upserted first so every session always has a parent.
/// Then, in order: an active session belonging to this website is extended;
/// an expired or foreign session is replaced with a server-generated id; an
/// unknown session id is inserted as-is, falling back to a touch when a
/// concurrent request inserted it first.
pub async fn resolve_identity(
    db: &DuckDbBackend,
    site: &Website,
    event: &TrackEvent,
    attribution: SessionAttribution,
    now: DateTime<Utc>,
    expiry: Duration,
) -> Result<IdentityOutcome> {
    db.upsert_visitor(&site.id, &event.visitor_id, now).await?;

    match db.get_session(&event.session_id).await? {
        Some(existing) if existing.website_id == site.id && existing.expires_at > now => {
            db.touch_session(&existing.id, now, now + expiry, &attribution)
                .await?;
            Ok(IdentityOutcome {
                session_id: existing.id,
                session_started: false,
            })
        }
        Some(_) => {
            let replacement = Uuid::new_v4().to_string();
            db.insert_session_if_absent(&new_session_row(
                event,
                site,
                replacement.clone(),
                attribution,
                now,
                expiry,
            ))
            .await?;
            Ok(IdentityOutcome {
                session_id: replacement,
                session_started: true,
            })
        }
        None => {
            let inserted = db
                .insert_session_if_absent(&new_session_row(
                    event,
                    site,
                    event.session_id.clone(),
                    attribution.clone(),
                    now,
                    expiry,
                ))
                .await?;
            match inserted {
                SessionInsert::Inserted => Ok(IdentityOutcome {
                    session_id: event.session_id.clone(),
                    session_started: true,
                }),
                SessionInsert::AlreadyExists => {
                    db.touch_session(&event.session_id, now, now + expiry, &attribution)
                        .await?;
                    Ok(IdentityOutcome {
                        session_id: event.session_id.clone(),
                        session_started: false,
                    })
                }
            }
        }
    }
}
