//! Application state shared across all handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use redis::Client as RedisClient;
use tracing::info;

use crate::bot::UserAgentClassifier;
use crate::config::Config;
use crate::engine::ExperimentEngine;
use crate::experiment::{Registry, RegistryHandle};
use crate::metrics::Metrics;
use crate::middleware::ExperimentMiddleware;
use crate::store::{AssignmentStore, MemoryAssignmentStore, RedisAssignmentStore};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Experiment resolution engine (registry, store, classifier).
    engine: ExperimentEngine,

    /// Middleware state, sharing the engine above.
    experiments: ExperimentMiddleware,

    /// Prometheus metrics.
    metrics: Arc<Metrics>,

    /// Experiments file used for reloads.
    experiments_file: PathBuf,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// Fails if the experiments file is missing or invalid: the server must
    /// not start with a broken registry.
    pub async fn new(config: &Config) -> Result<Self> {
        let registry = Registry::from_path(&config.experiments_file)
            .context("failed to load experiments")?;

        let store: Arc<dyn AssignmentStore> = match &config.redis_url {
            Some(url) => {
                let redis = RedisClient::open(url.as_str())
                    .context("failed to create Redis client")?;
                let store = RedisAssignmentStore::new(redis, config.assignment_ttl_secs);

                // Unreachable Redis at startup is not fatal: requests fall
                // back to control until it comes back.
                if let Err(e) = store.ping().await {
                    tracing::warn!(error = %e, "Redis not reachable at startup");
                }
                Arc::new(store)
            }
            None => {
                info!(
                    capacity = config.memory_store_capacity,
                    "REDIS_URL not set, keeping assignments in memory"
                );
                Arc::new(MemoryAssignmentStore::with_capacity(
                    config.memory_store_capacity,
                ))
            }
        };

        let classifier = UserAgentClassifier::new(&config.bot_patterns)
            .context("invalid BOT_PATTERNS entry")?;

        let metrics = Arc::new(Metrics::new());
        let engine = ExperimentEngine::new(RegistryHandle::new(registry), store)
            .with_classifier(Arc::new(classifier))
            .with_store_timeout(config.store_timeout)
            .with_metrics(Arc::clone(&metrics));

        let mut experiments =
            ExperimentMiddleware::new(engine.clone()).with_cookie(config.visitor_cookie());
        if let Some(subset) = &config.experiment_subset {
            experiments = experiments.with_subset(subset.clone());
        }

        Ok(Self::from_parts(
            engine,
            experiments,
            metrics,
            config.experiments_file.clone(),
        ))
    }

    /// Assemble state from already-built components.
    pub fn from_parts(
        engine: ExperimentEngine,
        experiments: ExperimentMiddleware,
        metrics: Arc<Metrics>,
        experiments_file: PathBuf,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                engine,
                experiments,
                metrics,
                experiments_file,
            }),
        }
    }

    pub fn engine(&self) -> &ExperimentEngine {
        &self.inner.engine
    }

    pub fn experiments(&self) -> &ExperimentMiddleware {
        &self.inner.experiments
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn experiments_file(&self) -> &Path {
        &self.inner.experiments_file
    }

    /// Check assignment store health.
    pub async fn store_healthy(&self) -> bool {
        self.inner.engine.store().ping().await.is_ok()
    }

    /// Reload the registry from the experiments file.
    ///
    /// On failure the current registry stays active.
    pub fn reload_experiments(&self) -> Result<()> {
        self.inner
            .engine
            .registry()
            .reload_from(&self.inner.experiments_file)
            .context("failed to reload experiments")
    }
}
