//! HTTP Endpoints
//!
//! Health, metrics and the conversation websocket route.

use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::ws_handler;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let server = &state.settings.server;
    let router = Router::new()
        .route(&server.ws_path, get(ws_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler));

    let router = if server.cors_enabled {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Health check
///
/// Degraded once the session limit is reached, since new conversations would be refused.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let active = state.router.active_sessions();
    let max = state.router.max_sessions();
    let at_capacity = active >= max;

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": if at_capacity { "degraded" } else { "healthy" },
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": {
                "active": active,
                "max": max,
            },
        })),
    )
}
