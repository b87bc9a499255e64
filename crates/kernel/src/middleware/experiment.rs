//! Experiment assignment middleware.
//!
//! Resolves every configured experiment (or a host-chosen subset) for the
//! visitor and stores the result in request extensions as
//! [`ExperimentAssignments`]. Handlers read it with the extractor impl
//! below. A freshly minted visitor id is written back as a cookie.
//!
//! The middleware only annotates the request; it never produces a
//! response of its own, and store failures never block the request.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, header::SET_COOKIE, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::engine::{ExperimentAssignments, ExperimentEngine};
use crate::experiment::ThreadRandom;
use crate::visitor::{VisitorCookie, VisitorId};

/// Path prefixes that never need experiment resolution.
pub const DEFAULT_SKIP_PREFIXES: &[&str] = &["/static", "/health", "/metrics", "/favicon.ico"];

/// State for [`assign_experiments`].
///
/// Independent of the host's own router state, so it can be attached with
/// `axum::middleware::from_fn_with_state(experiments, assign_experiments)`.
#[derive(Debug, Clone)]
pub struct ExperimentMiddleware {
    engine: ExperimentEngine,
    cookie: VisitorCookie,
    subset: Option<Vec<String>>,
    skip_prefixes: Vec<String>,
}

impl ExperimentMiddleware {
    pub fn new(engine: ExperimentEngine) -> Self {
        Self {
            engine,
            cookie: VisitorCookie::default(),
            subset: None,
            skip_prefixes: DEFAULT_SKIP_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn with_cookie(mut self, cookie: VisitorCookie) -> Self {
        self.cookie = cookie;
        self
    }

    /// Resolve only these experiment ids instead of the whole registry.
    pub fn with_subset(mut self, ids: Vec<String>) -> Self {
        self.subset = Some(ids);
        self
    }

    /// Replace the skipped path prefixes.
    pub fn with_skip_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.skip_prefixes = prefixes;
        self
    }

    pub fn engine(&self) -> &ExperimentEngine {
        &self.engine
    }

    /// Prefixes match whole path segments: `/health` skips `/health` and
    /// `/health/live` but not `/healthy-recipes`.
    fn skips(&self, path: &str) -> bool {
        self.skip_prefixes.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

/// Middleware that assigns experiment variants for each request.
///
/// 1. Skip system paths (static files, health, metrics)
/// 2. Extract the visitor id from cookie/header, or mint one
/// 3. Classify the request (bot or not) once for all experiments
/// 4. Resolve experiments and insert [`ExperimentAssignments`]
/// 5. Run the rest of the stack, then set the cookie if the id was minted
pub async fn assign_experiments(
    State(experiments): State<ExperimentMiddleware>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if experiments.skips(request.uri().path()) {
        return next.run(request).await;
    }

    let headers = request.headers();
    let is_bot = experiments.engine.classifier().is_bot(headers);
    let (visitor, minted) = match experiments.cookie.extract(headers) {
        Some(visitor) => (visitor, false),
        None => (VisitorId::mint(), true),
    };

    let assignments = experiments
        .engine
        .resolve_all(
            &visitor,
            minted,
            is_bot,
            experiments.subset.as_deref(),
            &mut ThreadRandom,
        )
        .await;

    tracing::debug!(
        visitor = %visitor,
        minted,
        is_bot,
        experiments = assignments.len(),
        "experiments assigned"
    );
    request.extensions_mut().insert(assignments);

    let mut response = next.run(request).await;

    if minted && let Some(cookie) = experiments.cookie.set_cookie_header(&visitor) {
        response.headers_mut().append(SET_COOKIE, cookie);
    }

    response
}

/// Handlers can take `ExperimentAssignments` directly. Without the
/// middleware in the stack the mapping is empty, so every lookup is `None`.
impl<S> FromRequestParts<S> for ExperimentAssignments
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ExperimentAssignments>()
            .cloned()
            .unwrap_or_default())
    }
}
