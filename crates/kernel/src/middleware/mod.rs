//! HTTP middleware components.
//!
//! Provides the experiment assignment layer.

pub mod experiment;

pub use experiment::{DEFAULT_SKIP_PREFIXES, ExperimentMiddleware, assign_experiments};
