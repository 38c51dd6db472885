//! Pageview, custom-event and payment persistence.

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::backend::sql_ts;
use crate::DuckDbBackend;

#[derive(Debug, Clone)]
pub struct PageviewRow {
    pub session_id: String,
    pub website_id: String,
    pub url: String,
    pub pathname: String,
    pub referrer: Option<String>,
    pub title: Option<String>,
    pub viewport_width: Option<i64>,
    pub viewport_height: Option<i64>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub session_id: String,
    pub website_id: String,
    pub event_type: String,
    pub name: Option<String>,
    pub data: Option<String>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PaymentRow {
    pub website_id: String,
    pub visitor_id: String,
    pub session_id: String,
    pub amount: i64,
    pub currency: Option<String>,
    pub transaction_id: Option<String>,
    pub ts: DateTime<Utc>,
}

impl DuckDbBackend {
    pub async fn insert_pageview(&self, row: &PageviewRow) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO pageviews ( \
                id, session_id, website_id, url, pathname, referrer, title, \
                viewport_width, viewport_height, ts \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            duckdb::params![
                Uuid::new_v4().to_string(),
                row.session_id,
                row.website_id,
                row.url,
                row.pathname,
                row.referrer,
                row.title,
                row.viewport_width,
                row.viewport_height,
                sql_ts(row.ts),
            ],
        )?;
        Ok(())
    }

    pub async fn insert_event(&self, row: &EventRow) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO events (id, session_id, website_id, event_type, name, data, ts) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            duckdb::params![
                Uuid::new_v4().to_string(),
                row.session_id,
                row.website_id,
                row.event_type,
                row.name,
                row.data,
                sql_ts(row.ts),
            ],
        )?;
        Ok(())
    }

    /// Record a payment. The paying visitor's first payment flips
    /// `is_customer`; the flip is idempotent.
    pub async fn insert_payment(&self, row: &PaymentRow) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO payments ( \
                id, website_id, visitor_id, session_id, amount, currency, transaction_id, ts \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            duckdb::params![
                Uuid::new_v4().to_string(),
                row.website_id,
                row.visitor_id,
                row.session_id,
                row.amount,
                row.currency,
                row.transaction_id,
                sql_ts(row.ts),
            ],
        )?;
        tx.execute(
            "UPDATE visitors SET is_customer = true \
             WHERE website_id = ?1 AND id = ?2 AND is_customer = false",
            duckdb::params![row.website_id, row.visitor_id],
        )?;
        tx.commit()?;
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

    #[tokio::test]
    async fn payment_flips_is_customer_once() {
        let db = DuckDbBackend::open_in_memory().unwrap();
        db.seed_website("site-1", "example.com").await.unwrap();
        db.upsert_visitor("site-1", "v1", now()).await.unwrap();

        let payment = PaymentRow {
            website_id: "site-1".to_string(),
            visitor_id: "v1".to_string(),
            session_id: "s1".to_string(),
            amount: 1999,
            currency: Some("EUR".to_string()),
            transaction_id: Some("tx-1".to_string()),
            ts: now(),
        };
        db.insert_payment(&payment).await.unwrap();
        db.insert_payment(&payment).await.unwrap();

        let conn = db.conn_for_test().await;
        let is_customer: bool = conn
            .prepare("SELECT is_customer FROM visitors WHERE id = 'v1'")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert!(is_customer);
        let count: i64 = conn
            .prepare("SELECT COUNT(*) FROM payments WHERE website_id = 'site-1'")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }
}
