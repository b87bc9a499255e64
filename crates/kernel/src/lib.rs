//! Experiment kernel library.
//!
//! Assigns A/B(/n) experiment variants to visitors from an axum middleware:
//! a validated [`experiment::Registry`], a pure [`experiment::select`]
//! function, a [`bot::BotClassifier`], an [`store::AssignmentStore`] and
//! the [`engine::ExperimentEngine`] that ties them together. The
//! `experiment-server` binary is a small host application built on it.

pub mod bot;
pub mod config;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod store;
pub mod visitor;

pub use config::Config;
pub use engine::{AssignmentSource, ExperimentAssignments, ExperimentEngine, Resolution};
pub use error::{ConfigError, StoreError};
pub use experiment::{ExperimentDefinition, ExperimentsConfig, Registry, RegistryHandle};
pub use middleware::{ExperimentMiddleware, assign_experiments};
pub use state::AppState;

/// Build the application router: host routes plus the experiment layer.
pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .merge(routes::front::router())
        .merge(routes::assignments::router())
        .merge(routes::health::router())
        .merge(routes::metrics::router())
        .layer(axum::middleware::from_fn_with_state(
            state.experiments().clone(),
            assign_experiments,
        ))
        .with_state(state)
}
