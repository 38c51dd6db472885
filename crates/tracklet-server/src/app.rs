use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::routes;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/track", post(routes::track::track))
        .route(
            "/api/websites",
            get(routes::websites::list).post(routes::websites::create),
        )
        .route(
            "/api/websites/{id}",
            get(routes::websites::get_one)
                .put(routes::websites::update)
                .delete(routes::websites::remove),
        )
        .route("/api/websites/{id}/stats", get(routes::stats::stats))
        .route("/api/websites/{id}/metrics", get(routes::metrics::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
