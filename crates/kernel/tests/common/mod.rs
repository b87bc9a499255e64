#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! This module builds the REAL kernel router and state, not mock
//! implementations. Each [`TestApp`] gets its own experiments file and an
//! in-memory assignment store, so tests can run in parallel without
//! sharing visitors or assignments.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use experiment_kernel::engine::DEFAULT_STORE_TIMEOUT;
use experiment_kernel::experiment::{Registry, RegistryHandle};
use experiment_kernel::metrics::Metrics;
use experiment_kernel::store::{AssignmentStore, DEFAULT_MEMORY_CAPACITY};
use experiment_kernel::{AppState, Config, ExperimentEngine, ExperimentMiddleware};
use experiment_test_utils::{TempExperimentsFile, TestExperiment};

/// Test application wrapper using the REAL kernel routes and state.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub file: TempExperimentsFile,
}

impl TestApp {
    /// Create a test app through the same path as the server binary.
    pub async fn new(experiments: &[TestExperiment]) -> Self {
        let file = TempExperimentsFile::json(experiments).expect("write experiments file");
        let config = test_config(file.path().to_path_buf());

        let state = AppState::new(&config)
            .await
            .expect("Failed to initialize AppState");
        let router = experiment_kernel::app(state.clone());

        Self {
            router,
            state,
            file,
        }
    }

    /// Create a test app backed by a caller-supplied store.
    pub fn with_store(
        experiments: &[TestExperiment],
        store: Arc<dyn AssignmentStore>,
        store_timeout: Duration,
    ) -> Self {
        let file = TempExperimentsFile::json(experiments).expect("write experiments file");
        let registry = Registry::from_path(file.path()).expect("valid experiments");

        let metrics = Arc::new(Metrics::new());
        let engine = ExperimentEngine::new(RegistryHandle::new(registry), store)
            .with_store_timeout(store_timeout)
            .with_metrics(Arc::clone(&metrics));
        let experiments = ExperimentMiddleware::new(engine.clone());
        let state =
            AppState::from_parts(engine, experiments, metrics, file.path().to_path_buf());
        let router = experiment_kernel::app(state.clone());

        Self {
            router,
            state,
            file,
        }
    }

    /// Send a request through the router.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// GET `uri` as the given user agent, optionally with a cookie header.
    pub async fn get(&self, uri: &str, user_agent: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .uri(uri)
            .header(header::USER_AGENT, user_agent);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }
}

/// Config equivalent to the server defaults, with a memory store.
pub fn test_config(experiments_file: PathBuf) -> Config {
    Config {
        port: 0,
        experiments_file,
        redis_url: None,
        memory_store_capacity: DEFAULT_MEMORY_CAPACITY,
        assignment_ttl_secs: None,
        store_timeout: DEFAULT_STORE_TIMEOUT,
        visitor_cookie_name: "exp_vid".to_string(),
        visitor_cookie_max_age_days: 365,
        cookie_secure: true,
        cookie_same_site: "lax".to_string(),
        experiment_subset: None,
        bot_patterns: Vec::new(),
    }
}

/// Extract `name=value` pairs from all Set-Cookie headers.
pub fn extract_cookies(response: &Response) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| {
            // Extract just the cookie name=value, ignoring attributes
            cookie.split(';').next()
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Read a response body as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read a response body as text.
pub async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
