//! Health check endpoint.
//!
//! Returns 200 OK if the assignment store is reachable, 503 Service
//! Unavailable otherwise. Requests still succeed while the store is down
//! (everyone sees control), so this is for alerting rather than routing.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    store: &'static str,
    store_ok: bool,
    experiments: usize,
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store_ok = state.store_healthy().await;

    let (status, status_code) = if store_ok {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            store: state.engine().store().backend(),
            store_ok,
            experiments: state.engine().registry().current().len(),
        }),
    )
}

/// Create the health check router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
