//! The HTTP surface served alongside the WebSocket endpoint: liveness,
//! readiness and Prometheus metrics.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::api::methods::ApiContext;
use crate::api::ws;

/// The full HTTP app: `/ws` plus the health/metrics endpoints.
pub fn http_app(ctx: ApiContext) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// GET /health/live — the process is up.
async fn live() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

/// GET /health/ready — 200 only while the router link is connected.
async fn ready(State(ctx): State<ApiContext>) -> impl IntoResponse {
    if ctx.state.link.is_connected() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "router_state": ctx.state.link.state(),
            })),
        )
    }
}

/// GET /metrics — Prometheus text format.
async fn metrics(State(ctx): State<ApiContext>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        ctx.state.metrics.render(),
    )
}
