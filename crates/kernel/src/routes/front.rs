//! Front page route handler.
//!
//! A minimal page showing how rendering code consumes assignments.

use axum::{Router, response::Html, routing::get};

use crate::engine::ExperimentAssignments;
use crate::state::AppState;

/// Create the front page router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(front_page))
}

/// Front page handler.
async fn front_page(assignments: ExperimentAssignments) -> Html<String> {
    let rows: String = assignments
        .iter()
        .map(|(experiment, variant)| {
            format!(
                "<li data-experiment=\"{}\">{}: <strong>{}</strong></li>",
                html_escape(experiment),
                html_escape(experiment),
                html_escape(variant)
            )
        })
        .collect();

    let heading = if assignments.is_bot {
        "Experiments (automated visitor)"
    } else {
        "Experiments"
    };

    Html(format!(
        "<!doctype html><html><body><h1>{heading}</h1><ul>{rows}</ul></body></html>"
    ))
}

/// Escape HTML special characters.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
