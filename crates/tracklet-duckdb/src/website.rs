use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use crate::backend::optional_row;
use crate::DuckDbBackend;

const WEBSITE_COLUMNS: &str = "id, domain, timezone, excluded_ips, excluded_paths, \
     excluded_countries, spike_enabled, spike_threshold, spike_window_seconds, \
     weekly_summary, notify_email, CAST(created_at AS VARCHAR)";

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Website {
    pub id: String,
    pub domain: String,
    pub timezone: String,
    pub excluded_ips: Vec<String>,
    pub excluded_paths: Vec<String>,
    pub excluded_countries: Vec<String>,
    pub spike_enabled: bool,
    pub spike_threshold: i64,
    pub spike_window_seconds: i64,
    pub weekly_summary: bool,
    pub notify_email: Option<String>,
    pub created_at: String,
}

pub struct CreateWebsiteParams {
    pub domain: String,
    pub timezone: Option<String>,
}

#[derive(Default)]
pub struct UpdateWebsiteParams {
    pub timezone: Option<String>,
    pub excluded_ips: Option<Vec<String>>,
    pub excluded_paths: Option<Vec<String>>,
    pub excluded_countries: Option<Vec<String>>,
    pub spike_enabled: Option<bool>,
    pub spike_threshold: Option<i64>,
    pub spike_window_seconds: Option<i64>,
    pub weekly_summary: Option<bool>,
    pub notify_email: Option<Option<String>>,
}

/// A malformed rule column never errors; it degrades to no rules.
fn parse_rules(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

fn rules_json(rules: &[String]) -> String {
    serde_json::to_string(rules).unwrap_or_else(|_| "[]".to_string())
}

fn row_to_website(row: &duckdb::Row<'_>) -> duckdb::Result<Website> {
    let excluded_ips: String = row.get(3)?;
    let excluded_paths: String = row.get(4)?;
    let excluded_countries: String = row.get(5)?;
    Ok(Website {
        id: row.get(0)?,
        domain: row.get(1)?,
        timezone: row.get(2)?,
        excluded_ips: parse_rules(&excluded_ips),
        excluded_paths: parse_rules(&excluded_paths),
        excluded_countries: parse_rules(&excluded_countries),
        spike_enabled: row.get(6)?,
        spike_threshold: row.get(7)?,
        spike_window_seconds: row.get(8)?,
        weekly_summary: row.get(9)?,
        notify_email: row.get(10)?,
        created_at: row.get(11)?,
    })
}

impl DuckDbBackend {
    pub async fn create_website(&self, params: CreateWebsiteParams) -> Result<Website> {
        let conn = self.conn.lock().await;
        let id = Uuid::new_v4().to_string();
        let timezone = params.timezone.unwrap_or_else(|| "UTC".to_string());

        conn.execute(
            "INSERT INTO websites (id, domain, timezone, created_at) \
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
            duckdb::params![id, params.domain, timezone],
        )?;

        let website = conn
            .prepare(&format!(
                "SELECT {WEBSITE_COLUMNS} FROM websites WHERE id = ?1"
            ))?
            .query_row(duckdb::params![id], |row| row_to_website(row))?;
        Ok(website)
    }

    pub async fn list_websites(&self) -> Result<Vec<Website>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {WEBSITE_COLUMNS} FROM websites ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map([], |row| row_to_website(row))?;

        let mut websites = Vec::new();
        for row in rows {
            websites.push(row?);
        }
        Ok(websites)
    }

    pub async fn get_website(&self, id: &str) -> Result<Option<Website>> {
        let conn = self.conn.lock().await;
        optional_row(
            conn.prepare(&format!(
                "SELECT {WEBSITE_COLUMNS} FROM websites WHERE id = ?1"
            ))?
            .query_row(duckdb::params![id], |row| row_to_website(row)),
        )
    }

    pub async fn get_website_by_domain(&self, domain: &str) -> Result<Option<Website>> {
        let conn = self.conn.lock().await;
        optional_row(
            conn.prepare(&format!(
                "SELECT {WEBSITE_COLUMNS} FROM websites WHERE domain = ?1"
            ))?
            .query_row(duckdb::params![domain], |row| row_to_website(row)),
        )
    }

    pub async fn update_website(
        &self,
        id: &str,
        params: UpdateWebsiteParams,
    ) -> Result<Option<Website>> {
        let conn = self.conn.lock().await;

        let exists: i64 = conn
            .prepare("SELECT COUNT(*) FROM websites WHERE id = ?1")?
            .query_row(duckdb::params![id], |row| row.get(0))?;
        if exists == 0 {
            return Ok(None);
        }

        if let Some(ref timezone) = params.timezone {
            conn.execute(
                "UPDATE websites SET timezone = ?1 WHERE id = ?2",
                duckdb::params![timezone, id],
            )?;
        }
        if let Some(ref ips) = params.excluded_ips {
            conn.execute(
                "UPDATE websites SET excluded_ips = ?1 WHERE id = ?2",
                duckdb::params![rules_json(ips), id],
            )?;
        }
        if let Some(ref paths) = params.excluded_paths {
            conn.execute(
                "UPDATE websites SET excluded_paths = ?1 WHERE id = ?2",
                duckdb::params![rules_json(paths), id],
            )?;
        }
        if let Some(ref countries) = params.excluded_countries {
            conn.execute(
                "UPDATE websites SET excluded_countries = ?1 WHERE id = ?2",
                duckdb::params![rules_json(countries), id],
            )?;
        }
        if let Some(enabled) = params.spike_enabled {
            conn.execute(
                "UPDATE websites SET spike_enabled = ?1 WHERE id = ?2",
                duckdb::params![enabled, id],
            )?;
        }
        if let Some(threshold) = params.spike_threshold {
            conn.execute(
                "UPDATE websites SET spike_threshold = ?1 WHERE id = ?2",
                duckdb::params![threshold, id],
            )?;
        }
        if let Some(window) = params.spike_window_seconds {
            conn.execute(
                "UPDATE websites SET spike_window_seconds = ?1 WHERE id = ?2",
                duckdb::params![window, id],
            )?;
        }
        if let Some(weekly) = params.weekly_summary {
            conn.execute(
                "UPDATE websites SET weekly_summary = ?1 WHERE id = ?2",
                duckdb::params![weekly, id],
            )?;
        }
        if let Some(ref email) = params.notify_email {
            conn.execute(
                "UPDATE websites SET notify_email = ?1 WHERE id = ?2",
                duckdb::params![email, id],
            )?;
        }

        let website = conn
            .prepare(&format!(
                "SELECT {WEBSITE_COLUMNS} FROM websites WHERE id = ?1"
            ))?
            .query_row(duckdb::params![id], |row| row_to_website(row))?;
        Ok(Some(website))
    }

    /// Delete a website and all associated data.
    ///
    /// DuckDB has no FK cascade; children are deleted explicitly inside one
    /// transaction, children first.
    pub async fn delete_website(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;

        let exists: i64 = conn
            .prepare("SELECT COUNT(*) FROM websites WHERE id = ?1")?
            .query_row(duckdb::params![id], |row| row.get(0))?;
        if exists == 0 {
            return Ok(false);
        }

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM payments WHERE website_id = ?1", duckdb::params![id])?;
        tx.execute("DELETE FROM events WHERE website_id = ?1", duckdb::params![id])?;
        tx.execute("DELETE FROM pageviews WHERE website_id = ?1", duckdb::params![id])?;
        tx.execute("DELETE FROM sessions WHERE website_id = ?1", duckdb::params![id])?;
        tx.execute("DELETE FROM visitors WHERE website_id = ?1", duckdb::params![id])?;
        tx.execute("DELETE FROM websites WHERE id = ?1", duckdb::params![id])?;
        tx.commit()?;

        Ok(true)
    }

    /// Insert or update a website row with a fixed id.
    ///
    /// Used by startup seeding and test fixtures; safe to call repeatedly.
    pub async fn seed_website(&self, id: &str, domain: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO websites (id, domain, timezone, created_at) \
             VALUES (?1, ?2, 'UTC', CURRENT_TIMESTAMP) \
             ON CONFLICT (id) DO UPDATE SET domain = EXCLUDED.domain",
            duckdb::params![id, domain],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DuckDbBackend;

    #[tokio::test]
    async fn create_get_update_delete() {
        let db = DuckDbBackend::open_in_memory().unwrap();
        let site = db
            .create_website(CreateWebsiteParams {
                domain: "example.com".to_string(),
                timezone: Some("Europe/Berlin".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(site.timezone, "Europe/Berlin");
        assert!(site.excluded_ips.is_empty());

        let fetched = db.get_website(&site.id).await.unwrap().unwrap();
        assert_eq!(fetched.domain, "example.com");
        let by_domain = db.get_website_by_domain("example.com").await.unwrap();
        assert!(by_domain.is_some());

        let updated = db
            .update_website(
                &site.id,
                UpdateWebsiteParams {
                    excluded_ips: Some(vec!["10.0.0.*".to_string()]),
                    excluded_countries: Some(vec!["CN".to_string()]),
                    spike_enabled: Some(true),
                    notify_email: Some(Some("ops@example.com".to_string())),
                    ..UpdateWebsiteParams::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.excluded_ips, vec!["10.0.0.*"]);
        assert!(updated.spike_enabled);
        assert_eq!(updated.notify_email.as_deref(), Some("ops@example.com"));

        assert!(db.delete_website(&site.id).await.unwrap());
        assert!(db.get_website(&site.id).await.unwrap().is_none());
        assert!(!db.delete_website(&site.id).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_rule_column_degrades_to_empty() {
        let db = DuckDbBackend::open_in_memory().unwrap();
        db.seed_website("site-1", "example.com").await.unwrap();
        {
            let conn = db.conn_for_test().await;
            conn.execute(
                "UPDATE websites SET excluded_paths = 'not json' WHERE id = ?1",
                duckdb::params!["site-1"],
            )
            .unwrap();
        }
        let site = db.get_website("site-1").await.unwrap().unwrap();
        assert!(site.excluded_paths.is_empty());
    }
}
