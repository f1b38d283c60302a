//! Route definitions for the gateway API.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{auth, handlers, middleware, state::AppState};

/// Create the main router; unmatched paths are proxied
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        // Admin endpoints
        .nest("/admin", admin_routes(state.clone()))
        // Everything else goes to the backends
        .fallback(handlers::proxy)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .with_state(state)
}

/// Operator routes, guarded by the admin role
fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/metrics",
            get(handlers::admin_metrics).delete(handlers::reset_metrics),
        )
        .route(
            "/cache",
            get(handlers::cache_stats).delete(handlers::clear_cache),
        )
        .route("/circuits", get(handlers::list_circuits))
        .route("/circuits/:key/reset", post(handlers::reset_circuit))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            auth::admin_middleware,
        ))
}
