use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use tracklet_server::state::{spawn_sweepers, AppState};

/// `tracklet health` — liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$TRACKLET_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("TRACKLET_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Health-check subcommand runs before runtime setup so the probe stays
    // fast inside a Docker HEALTHCHECK.
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }

    // Structured JSON logging; level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tracklet=info".parse()?),
        )
        .json()
        .init();

    let cfg = tracklet_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/tracklet.db", cfg.data_dir);
    let db = tracklet_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    // Seed a default website so the server is usable out of the box.
    // ON CONFLICT makes this safe on every startup.
    if let Err(e) = db.seed_website("site_default", "localhost").await {
        tracing::warn!(error = %e, "Failed to seed default website");
    } else {
        info!("Default website 'site_default' (localhost) ready");
    }

    let state = Arc::new(AppState::new(db, cfg.clone()));
    spawn_sweepers(Arc::clone(&state));

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = tracklet_server::app::build_router(Arc::clone(&state));

    info!(port = cfg.port, "Tracklet listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    Ok(())
}
