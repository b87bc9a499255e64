//! Assignment lookup API.
//!
//! Lets client-side code read the variants resolved for the current
//! request, e.g. to render variant-specific UI after hydration.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::engine::ExperimentAssignments;
use crate::state::AppState;

/// Create the assignments router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/assignments", get(list_assignments))
        .route("/api/assignments/{experiment_id}", get(get_assignment))
}

/// All variants for this request.
async fn list_assignments(assignments: ExperimentAssignments) -> Json<ExperimentAssignments> {
    Json(assignments)
}

/// One experiment's variant. Unknown ids are a 404, not an error.
async fn get_assignment(
    Path(experiment_id): Path<String>,
    assignments: ExperimentAssignments,
) -> Response {
    match assignments.variant(&experiment_id) {
        Some(variant) => Json(json!({
            "experimentId": experiment_id,
            "variant": variant,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Unknown experiment", "experimentId": experiment_id})),
        )
            .into_response(),
    }
}
