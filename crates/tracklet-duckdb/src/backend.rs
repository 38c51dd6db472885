use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::schema::init_sql;

/// A DuckDB backend for Tracklet.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent writes
/// cause contention. We wrap the connection in `Arc<Mutex<_>>` so the async
/// runtime serialises all access while the struct stays cheaply cloneable
/// across Axum handlers.
///
/// Memory and thread limits are enforced by [`init_sql`] at open time.
#[derive(Clone)]
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

/// Render a UTC timestamp in the naive format stored in TIMESTAMP columns.
pub(crate) fn sql_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Parse a `CAST(ts AS VARCHAR)` value back into a UTC timestamp.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))?;
    Ok(naive.and_utc())
}

/// Turn a single-row query result into `Option`: a missing row is `None`,
/// any other failure propagates.
pub(crate) fn optional_row<T>(result: duckdb::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`,
    /// read from `Config.duckdb_memory_limit` at the call site.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an **in-memory** DuckDB database.
    ///
    /// Intended for tests only. Data is discarded when the struct is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    ///
    /// Called by the `/health` endpoint. Returns an error if the connection
    /// is unavailable (file locked, disk full, etc.).
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the DuckDB connection lock for direct queries.
    ///
    /// Intended for integration tests that need to verify stored data.
    /// Production code should use the typed methods on this struct.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_round_trips() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(parse_ts(&sql_ts(ts)).unwrap(), ts);
    }

    #[test]
    fn timestamp_parses_without_fraction() {
        let parsed = parse_ts("2024-06-01 12:30:45").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap());
    }

    #[tokio::test]
    async fn in_memory_backend_pings() {
        let db = DuckDbBackend::open_in_memory().unwrap();
        db.ping().await.unwrap();
    }

    #[test]
    fn optional_row_distinguishes_absence_from_failure() {
        let conn = Connection::open_in_memory().unwrap();

        let missing = optional_row(
            conn.prepare("SELECT 1 WHERE 1 = 0")
                .unwrap()
                .query_row([], |row| row.get::<_, i64>(0)),
        )
        .unwrap();
        assert_eq!(missing, None);

        // A conversion failure is a real error, not an absent row.
        let broken = optional_row(
            conn.prepare("SELECT 'abc'")
                .unwrap()
                .query_row([], |row| row.get::<_, i64>(0)),
        );
        assert!(broken.is_err());
    }
}
