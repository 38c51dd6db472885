/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` is a DuckDB size string ("512MB", "1GB", ...) read from
/// `Config.duckdb_memory_limit`. An explicit limit is always set; the DuckDB
/// default of 80% of system RAM is not acceptable for a server process.
///
/// DuckDB has no FK cascade, so website deletion runs explicit child DELETEs
/// inside one transaction (see delete_website() in website.rs).
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- WEBSITES
-- ===========================================
-- The excluded_* columns hold JSON arrays of rule strings, parsed by the
-- application. A malformed column degrades to an empty rule list.
CREATE TABLE IF NOT EXISTS websites (
    id                   VARCHAR PRIMARY KEY,           -- UUID v4
    domain               VARCHAR NOT NULL UNIQUE,       -- normalized: lowercase, no scheme/path
    timezone             VARCHAR(100) NOT NULL DEFAULT 'UTC',  -- IANA timezone string
    excluded_ips         VARCHAR NOT NULL DEFAULT '[]',
    excluded_paths       VARCHAR NOT NULL DEFAULT '[]',
    excluded_countries   VARCHAR NOT NULL DEFAULT '[]',
    spike_enabled        BOOLEAN NOT NULL DEFAULT false,
    spike_threshold      INTEGER NOT NULL DEFAULT 50,   -- session starts per window
    spike_window_seconds INTEGER NOT NULL DEFAULT 300,
    weekly_summary       BOOLEAN NOT NULL DEFAULT false,
    notify_email         VARCHAR,
    created_at           TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_websites_domain ON websites(domain);

-- ===========================================
-- VISITORS
-- ===========================================
-- id is the client-held opaque identifier, scoped per website.
CREATE TABLE IF NOT EXISTS visitors (
    id              VARCHAR NOT NULL,
    website_id      VARCHAR NOT NULL,
    name            VARCHAR,                       -- deterministic display name
    avatar          VARCHAR,
    first_seen      TIMESTAMP NOT NULL,
    last_seen       TIMESTAMP NOT NULL,            -- written at most once per 60s
    is_customer     BOOLEAN NOT NULL DEFAULT false,
    PRIMARY KEY (website_id, id)
);
CREATE INDEX IF NOT EXISTS idx_visitors_last_seen
    ON visitors(website_id, last_seen DESC);

-- ===========================================
-- SESSIONS
-- ===========================================
-- The PRIMARY KEY on id is the uniqueness constraint the concurrent
-- session-creation path relies on (INSERT OR IGNORE + changed-row count).
CREATE TABLE IF NOT EXISTS sessions (
    id               VARCHAR PRIMARY KEY,
    visitor_id       VARCHAR NOT NULL,
    website_id       VARCHAR NOT NULL,
    started_at       TIMESTAMP NOT NULL,
    expires_at       TIMESTAMP NOT NULL,
    last_activity_at TIMESTAMP NOT NULL,
    referrer         VARCHAR,
    utm_source       VARCHAR,
    utm_medium       VARCHAR,
    utm_campaign     VARCHAR,
    screen_width     INTEGER NOT NULL DEFAULT 0,
    screen_height    INTEGER NOT NULL DEFAULT 0,
    language         VARCHAR,
    timezone         VARCHAR,
    browser          VARCHAR,
    browser_version  VARCHAR,
    os               VARCHAR,
    os_version       VARCHAR,
    device_type      VARCHAR,
    is_pwa           BOOLEAN NOT NULL DEFAULT false,
    country          VARCHAR,
    region           VARCHAR,
    city             VARCHAR
);
CREATE INDEX IF NOT EXISTS idx_sessions_website_started
    ON sessions(website_id, started_at DESC);
-- Optimised for the "online in last 5 minutes" query
CREATE INDEX IF NOT EXISTS idx_sessions_website_activity
    ON sessions(website_id, last_activity_at DESC);
CREATE INDEX IF NOT EXISTS idx_sessions_website_visitor
    ON sessions(website_id, visitor_id);

-- ===========================================
-- PAGEVIEWS
-- ===========================================
CREATE TABLE IF NOT EXISTS pageviews (
    id              VARCHAR PRIMARY KEY,           -- UUID v4
    session_id      VARCHAR NOT NULL,
    website_id      VARCHAR NOT NULL,
    url             VARCHAR NOT NULL,
    pathname        VARCHAR NOT NULL,
    referrer        VARCHAR,
    title           VARCHAR,
    viewport_width  INTEGER,
    viewport_height INTEGER,
    ts              TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pageviews_website_ts
    ON pageviews(website_id, ts DESC);
-- Accelerates per-session duration and entry-page queries
CREATE INDEX IF NOT EXISTS idx_pageviews_session_ts
    ON pageviews(session_id, ts);

-- ===========================================
-- EVENTS (custom + identify)
-- ===========================================
CREATE TABLE IF NOT EXISTS events (
    id              VARCHAR PRIMARY KEY,
    session_id      VARCHAR NOT NULL,
    website_id      VARCHAR NOT NULL,
    event_type      VARCHAR NOT NULL,              -- 'custom' | 'identify'
    name            VARCHAR,
    data            VARCHAR,                       -- JSON string (nullable)
    ts              TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_website_ts
    ON events(website_id, ts DESC);
CREATE INDEX IF NOT EXISTS idx_events_website_name
    ON events(website_id, name, ts DESC);

-- ===========================================
-- PAYMENTS
-- ===========================================
CREATE TABLE IF NOT EXISTS payments (
    id              VARCHAR PRIMARY KEY,
    website_id      VARCHAR NOT NULL,
    visitor_id      VARCHAR NOT NULL,
    session_id      VARCHAR NOT NULL,
    amount          BIGINT NOT NULL,               -- minor currency units
    currency        VARCHAR(8),
    transaction_id  VARCHAR,
    ts              TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_payments_website_ts
    ON payments(website_id, ts DESC);
CREATE INDEX IF NOT EXISTS idx_payments_website_visitor
    ON payments(website_id, visitor_id);
"#
    )
}
