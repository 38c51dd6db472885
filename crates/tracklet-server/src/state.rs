use std::sync::Arc;
use std::time::Duration;

use tracklet_core::config::Config;
use tracklet_duckdb::DuckDbBackend;

use crate::geoip::GeoResolver;
use crate::mailer::Mailer;
use crate::rate_limit::RateLimiter;
use crate::spike::SpikeDetector;

/// Shared application state handed to every handler.
pub struct AppState {
    pub db: Arc<DuckDbBackend>,
    pub config: Arc<Config>,
    pub rate_limiter: RateLimiter,
    pub geo: GeoResolver,
    pub spike: SpikeDetector,
    pub mailer: Mailer,
}

impl AppState {
    pub fn new(db: DuckDbBackend, config: Config) -> Self {
        let rate_limiter = RateLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window(),
        );
        let geo = GeoResolver::new(&config);
        let spike = SpikeDetector::new(Duration::from_secs(config.spike_cooldown_secs.max(0) as u64));
        Self {
            db: Arc::new(db),
            config: Arc::new(config),
            rate_limiter,
            geo,
            spike,
            mailer: Mailer::new(),
        }
    }

    /// Build state with injected geo providers; used by tests.
    pub fn with_geo(db: DuckDbBackend, config: Config, geo: GeoResolver) -> Self {
        let rate_limiter = RateLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window(),
        );
        let spike = SpikeDetector::new(Duration::from_secs(config.spike_cooldown_secs.max(0) as u64));
        Self {
            db: Arc::new(db),
            config: Arc::new(config),
            rate_limiter,
            geo,
            spike,
            mailer: Mailer::new(),
        }
    }
}

/// Periodic maintenance: expire rate-limit windows, evict stale geo cache
/// entries and drop quiet spike windows.
pub fn spawn_sweepers(state: Arc<AppState>) {
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweep_state.rate_limiter.sweep().await;
            sweep_state.geo.sweep().await;
            sweep_state
                .spike
                .sweep(chrono::Utc::now(), 24 * 60 * 60)
                .await;
        }
    });
}
