use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    /// Sliding session window: every event extends the session by this many minutes.
    pub session_expiry_minutes: i64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    pub geo_cache_ttl_secs: u64,
    pub geo_cache_capacity: usize,
    pub geo_provider_timeout_ms: u64,
    /// Minimum gap between two traffic-spike emails for the same website.
    pub spike_cooldown_secs: i64,
    pub duckdb_memory_limit: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            port: std::env::var("TRACKLET_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("TRACKLET_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            session_expiry_minutes: std::env::var("TRACKLET_SESSION_EXPIRY_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            rate_limit_max_requests: std::env::var("TRACKLET_RATE_LIMIT_MAX")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            rate_limit_window_secs: std::env::var("TRACKLET_RATE_LIMIT_WINDOW_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            geo_cache_ttl_secs: std::env::var("TRACKLET_GEO_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
            geo_cache_capacity: std::env::var("TRACKLET_GEO_CACHE_CAPACITY")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .unwrap_or(10_000),
            geo_provider_timeout_ms: std::env::var("TRACKLET_GEO_TIMEOUT_MS")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            spike_cooldown_secs: std::env::var("TRACKLET_SPIKE_COOLDOWN_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .unwrap_or(900),
            duckdb_memory_limit: std::env::var("TRACKLET_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
        })
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn geo_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.geo_cache_ttl_secs)
    }

    pub fn geo_provider_timeout(&self) -> Duration {
        Duration::from_millis(self.geo_provider_timeout_ms)
    }
}
