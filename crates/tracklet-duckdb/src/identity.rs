//! Visitor and session persistence primitives.
//!
//! The identity *policy* (when to rotate a session, which id is
//! authoritative) lives in the server; this module supplies the typed
//! datastore operations it is built on.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use tracklet_core::visitor::{generate_avatar_url, generate_visitor_name};

use crate::backend::{optional_row, parse_ts, sql_ts};
use crate::DuckDbBackend;

/// Outcome of an insert-if-absent on the sessions table. A concurrent
/// duplicate surfaces as `AlreadyExists`, never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInsert {
    Inserted,
    AlreadyExists,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub visitor_id: String,
    pub website_id: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Attribution snapshot written on session creation and backfilled
/// (null-only, first write wins) on session touch.
#[derive(Debug, Clone, Default)]
pub struct SessionAttribution {
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: String,
    pub visitor_id: String,
    pub website_id: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attribution: SessionAttribution,
    pub screen_width: i64,
    pub screen_height: i64,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<String>,
    pub is_pwa: bool,
}

/// Minimum staleness before a visitor's last_seen is rewritten.
const LAST_SEEN_COALESCE_SECS: i64 = 60;

impl DuckDbBackend {
    /// Ensure a visitor row exists and is current.
    ///
    /// New visitors get a deterministic display name and avatar derived from
    /// their id. Existing visitors only have missing name/avatar backfilled,
    /// and last_seen rewritten when it is more than 60s stale, so a burst of
    /// events costs one visitor write at most.
    pub async fn upsert_visitor(
        &self,
        website_id: &str,
        visitor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;

        let existing: Option<(Option<String>, Option<String>, String)> = optional_row(
            conn.prepare(
                "SELECT name, avatar, CAST(last_seen AS VARCHAR) \
                 FROM visitors WHERE website_id = ?1 AND id = ?2",
            )?
            .query_row(duckdb::params![website_id, visitor_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            }),
        )?;

        match existing {
            None => {
                let name = generate_visitor_name(visitor_id);
                let avatar = generate_avatar_url(visitor_id);
                conn.execute(
                    "INSERT OR IGNORE INTO visitors \
                     (id, website_id, name, avatar, first_seen, last_seen) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    duckdb::params![visitor_id, website_id, name, avatar, sql_ts(now)],
                )?;
            }
            Some((name, avatar, last_seen_raw)) => {
                if name.is_none() || avatar.is_none() {
                    conn.execute(
                        "UPDATE visitors SET \
                         name = COALESCE(name, ?1), avatar = COALESCE(avatar, ?2) \
                         WHERE website_id = ?3 AND id = ?4",
                        duckdb::params![
                            generate_visitor_name(visitor_id),
                            generate_avatar_url(visitor_id),
                            website_id,
                            visitor_id
                        ],
                    )?;
                }
                let last_seen = parse_ts(&last_seen_raw)?;
                if now - last_seen > Duration::seconds(LAST_SEEN_COALESCE_SECS) {
                    conn.execute(
                        "UPDATE visitors SET last_seen = ?1 \
                         WHERE website_id = ?2 AND id = ?3",
                        duckdb::params![sql_ts(now), website_id, visitor_id],
                    )?;
                }
            }
        }
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock().await;
        let row: Option<(String, String, String, String, String)> = optional_row(
            conn.prepare(
                "SELECT id, visitor_id, website_id, \
                 CAST(started_at AS VARCHAR), CAST(expires_at AS VARCHAR) \
                 FROM sessions WHERE id = ?1",
            )?
            .query_row(duckdb::params![session_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            }),
        )?;

        match row {
            None => Ok(None),
            Some((id, visitor_id, website_id, started_raw, expires_raw)) => {
                Ok(Some(SessionRecord {
                    id,
                    visitor_id,
                    website_id,
                    started_at: parse_ts(&started_raw)?,
                    expires_at: parse_ts(&expires_raw)?,
                }))
            }
        }
    }

    /// Insert a session row unless one with the same id already exists.
    ///
    /// Uses `INSERT OR IGNORE` against the primary key and inspects the
    /// changed-row count, so a lost race reports [`SessionInsert::AlreadyExists`]
    /// instead of a constraint error.
    pub async fn insert_session_if_absent(&self, session: &NewSession) -> Result<SessionInsert> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO sessions ( \
                id, visitor_id, website_id, started_at, expires_at, last_activity_at, \
                referrer, utm_source, utm_medium, utm_campaign, \
                screen_width, screen_height, language, timezone, \
                browser, browser_version, os, os_version, device_type, is_pwa, \
                country, region, city \
             ) VALUES ( \
                ?1, ?2, ?3, ?4, ?5, ?6, \
                ?7, ?8, ?9, ?10, \
                ?11, ?12, ?13, ?14, \
                ?15, ?16, ?17, ?18, ?19, ?20, \
                ?21, ?22, ?23 \
             )",
            duckdb::params![
                session.id,
                session.visitor_id,
                session.website_id,
                sql_ts(session.started_at),
                sql_ts(session.expires_at),
                sql_ts(session.started_at),
                session.attribution.referrer,
                session.attribution.utm_source,
                session.attribution.utm_medium,
                session.attribution.utm_campaign,
                session.screen_width,
                session.screen_height,
                session.language,
                session.timezone,
                session.browser,
                session.browser_version,
                session.os,
                session.os_version,
                session.device_type,
                session.is_pwa,
                session.attribution.country,
                session.attribution.region,
                session.attribution.city,
            ],
        )?;
        Ok(if changed > 0 {
            SessionInsert::Inserted
        } else {
            SessionInsert::AlreadyExists
        })
    }

    /// Extend an active session and backfill attribution.
    ///
    /// Geo fields are backfilled as a unit keyed on country being NULL, so a
    /// row never mixes fields from two different resolutions. UTM fields and
    /// referrer backfill individually. Existing values are never overwritten.
    pub async fn touch_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        attribution: &SessionAttribution,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET \
                expires_at = ?1, \
                last_activity_at = ?2, \
                region = CASE WHEN country IS NULL THEN ?3 ELSE region END, \
                city = CASE WHEN country IS NULL THEN ?4 ELSE city END, \
                country = CASE WHEN country IS NULL THEN ?5 ELSE country END, \
                utm_source = COALESCE(utm_source, ?6), \
                utm_medium = COALESCE(utm_medium, ?7), \
                utm_campaign = COALESCE(utm_campaign, ?8), \
                referrer = COALESCE(referrer, ?9) \
             WHERE id = ?10",
            duckdb::params![
                sql_ts(expires_at),
                sql_ts(now),
                attribution.region,
                attribution.city,
                attribution.country,
                attribution.utm_source,
                attribution.utm_medium,
                attribution.utm_campaign,
                attribution.referrer,
                session_id,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn new_session(id: &str) -> NewSession {
        NewSession {
            id: id.to_string(),
            visitor_id: "v1".to_string(),
            website_id: "site-1".to_string(),
            started_at: now(),
            expires_at: now() + Duration::minutes(30),
            attribution: SessionAttribution::default(),
            screen_width: 1920,
            screen_height: 1080,
            language: Some("en-US".to_string()),
            timezone: None,
            browser: Some("Firefox".to_string()),
            browser_version: None,
            os: Some("Linux".to_string()),
            os_version: None,
            device_type: Some("desktop".to_string()),
            is_pwa: false,
        }
    }

    #[tokio::test]
    async fn missing_session_reads_as_none() {
        let db = DuckDbBackend::open_in_memory().unwrap();
        db.seed_website("site-1", "example.com").await.unwrap();
        assert!(db.get_session("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_session_insert_reports_already_exists() {
        let db = DuckDbBackend::open_in_memory().unwrap();
        db.seed_website("site-1", "example.com").await.unwrap();

        let first = db.insert_session_if_absent(&new_session("s1")).await.unwrap();
        assert_eq!(first, SessionInsert::Inserted);
        let second = db.insert_session_if_absent(&new_session("s1")).await.unwrap();
        assert_eq!(second, SessionInsert::AlreadyExists);
    }

    #[tokio::test]
    async fn touch_backfills_null_fields_only() {
        let db = DuckDbBackend::open_in_memory().unwrap();
        db.seed_website("site-1", "example.com").await.unwrap();

        let mut session = new_session("s1");
        session.attribution.utm_source = Some("newsletter".to_string());
        db.insert_session_if_absent(&session).await.unwrap();

        let attribution = SessionAttribution {
            referrer: Some("https://google.com/".to_string()),
            utm_source: Some("other".to_string()),
            country: Some("DE".to_string()),
            region: Some("BE".to_string()),
            city: Some("Berlin".to_string()),
            ..SessionAttribution::default()
        };
        db.touch_session("s1", now() + Duration::minutes(1), now() + Duration::minutes(31), &attribution)
            .await
            .unwrap();

        let conn = db.conn_for_test().await;
        let (source, referrer, country, city): (String, String, String, String) = conn
            .prepare("SELECT utm_source, referrer, country, city FROM sessions WHERE id = 's1'")
            .unwrap()
            .query_row([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .unwrap();
        // First write wins: the original utm_source stands.
        assert_eq!(source, "newsletter");
        assert_eq!(referrer, "https://google.com/");
        assert_eq!(country, "DE");
        assert_eq!(city, "Berlin");
    }

    #[tokio::test]
    async fn geo_backfill_is_all_or_nothing() {
        let db = DuckDbBackend::open_in_memory().unwrap();
        db.seed_website("site-1", "example.com").await.unwrap();

        let mut session = new_session("s1");
        session.attribution.country = Some("FR".to_string());
        db.insert_session_if_absent(&session).await.unwrap();

        let attribution = SessionAttribution {
            country: Some("DE".to_string()),
            region: Some("BE".to_string()),
            city: Some("Berlin".to_string()),
            ..SessionAttribution::default()
        };
        db.touch_session("s1", now(), now() + Duration::minutes(30), &attribution)
            .await
            .unwrap();

        let conn = db.conn_for_test().await;
        let (country, region): (String, Option<String>) = conn
            .prepare("SELECT country, region FROM sessions WHERE id = 's1'")
            .unwrap()
            .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        // Country was already set, so region/city from the new resolution
        // must not leak in.
        assert_eq!(country, "FR");
        assert_eq!(region, None);
    }

    #[tokio::test]
    async fn visitor_last_seen_coalesces_within_a_minute() {
        let db = DuckDbBackend::open_in_memory().unwrap();
        db.seed_website("site-1", "example.com").await.unwrap();

        db.upsert_visitor("site-1", "v1", now()).await.unwrap();
        db.upsert_visitor("site-1", "v1", now() + Duration::seconds(30))
            .await
            .unwrap();

        {
            let conn = db.conn_for_test().await;
            let last_seen: String = conn
                .prepare("SELECT CAST(last_seen AS VARCHAR) FROM visitors WHERE id = 'v1'")
                .unwrap()
                .query_row([], |row| row.get(0))
                .unwrap();
            assert_eq!(parse_ts(&last_seen).unwrap(), now());
        }

        db.upsert_visitor("site-1", "v1", now() + Duration::seconds(90))
            .await
            .unwrap();
        let conn = db.conn_for_test().await;
        let last_seen: String = conn
            .prepare("SELECT CAST(last_seen AS VARCHAR) FROM visitors WHERE id = 'v1'")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(parse_ts(&last_seen).unwrap(), now() + Duration::seconds(90));
    }

    #[tokio::test]
    async fn new_visitor_gets_name_and_avatar() {
        let db = DuckDbBackend::open_in_memory().unwrap();
        db.seed_website("site-1", "example.com").await.unwrap();
        db.upsert_visitor("site-1", "v1", now()).await.unwrap();

        let conn = db.conn_for_test().await;
        let (name, avatar): (String, String) = conn
            .prepare("SELECT name, avatar FROM visitors WHERE id = 'v1'")
            .unwrap()
            .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        assert!(!name.is_empty());
        assert!(avatar.contains("seed=v1"));
    }
}
