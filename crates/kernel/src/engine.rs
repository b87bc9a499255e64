//! Experiment resolution.
//!
//! For each experiment: disabled → control; bot with a bot variant → that
//! variant; stored assignment still valid → reuse it; otherwise select and
//! persist. Store reads and writes are bounded by a timeout, and any store
//! failure resolves to the control variant with nothing persisted. An
//! unreadable stored record is treated like a stale one and overwritten.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::bot::{BotClassifier, UserAgentClassifier};
use crate::error::StoreError;
use crate::experiment::{ExperimentDefinition, RandomSource, RegistryHandle, ThreadRandom, select};
use crate::metrics::Metrics;
use crate::store::{Assignment, AssignmentStore};
use crate::visitor::VisitorId;

/// Default bound on a single store call.
///
/// A write that times out may still reach the store afterwards. The engine
/// then deletes the key in the background so the next request reselects,
/// but a delete that overtakes the late write cannot undo it.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);

/// Bound on the background delete after a timed-out write.
const LATE_WRITE_CLEANUP_TIMEOUT: Duration = Duration::from_secs(1);

/// How much of the store the rest of a request may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreAccess {
    ReadWrite,
    /// Visitor id was minted for this request, so there is nothing to read.
    WriteOnly,
    /// The store failed earlier in this request.
    Unavailable,
}

/// How a variant was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    /// Reused from the assignment store.
    Stored,
    /// Freshly selected and persisted.
    Selected,
    /// Bot traffic served the configured bot variant.
    Bot,
    /// Experiment disabled; control served.
    Disabled,
    /// Store failed or timed out; control served, nothing persisted.
    Fallback,
}

impl AssignmentSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentSource::Stored => "stored",
            AssignmentSource::Selected => "selected",
            AssignmentSource::Bot => "bot",
            AssignmentSource::Disabled => "disabled",
            AssignmentSource::Fallback => "fallback",
        }
    }
}

impl fmt::Display for AssignmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving one experiment for one visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub experiment_id: String,
    pub variant: String,
    pub source: AssignmentSource,
}

/// The per-request mapping `experiment id → variant` handed to rendering
/// code through request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExperimentAssignments {
    /// `None` when the experiment middleware did not run for this request.
    /// Never serialized: the id is the HttpOnly cookie value.
    #[serde(skip)]
    pub visitor: Option<VisitorId>,
    pub is_bot: bool,
    variants: BTreeMap<String, String>,
}

impl ExperimentAssignments {
    pub fn new(visitor: VisitorId, is_bot: bool) -> Self {
        Self {
            visitor: Some(visitor),
            is_bot,
            variants: BTreeMap::new(),
        }
    }

    /// Variant for an experiment, or `None` for ids that were not resolved.
    pub fn variant(&self, experiment_id: &str) -> Option<&str> {
        self.variants.get(experiment_id).map(String::as_str)
    }

    /// Whether the visitor is in `variant` of `experiment_id`.
    pub fn is(&self, experiment_id: &str, variant: &str) -> bool {
        self.variant(experiment_id) == Some(variant)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variants.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    fn insert(&mut self, resolution: Resolution) {
        self.variants
            .insert(resolution.experiment_id, resolution.variant);
    }
}

/// Resolves experiment variants against the registry and assignment store.
#[derive(Clone)]
pub struct ExperimentEngine {
    registry: RegistryHandle,
    store: Arc<dyn AssignmentStore>,
    classifier: Arc<dyn BotClassifier>,
    store_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl ExperimentEngine {
    /// Create an engine with the default bot classifier and store timeout.
    pub fn new(registry: RegistryHandle, store: Arc<dyn AssignmentStore>) -> Self {
        Self {
            registry,
            store,
            classifier: Arc::new(UserAgentClassifier::default()),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn BotClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn AssignmentStore> {
        &self.store
    }

    pub fn classifier(&self) -> &dyn BotClassifier {
        self.classifier.as_ref()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Resolve one experiment by id.
    ///
    /// Returns `None` for ids that are not in the registry.
    pub async fn resolve_id(
        &self,
        experiment_id: &str,
        visitor: &VisitorId,
        is_bot: bool,
    ) -> Option<Resolution> {
        let registry = self.registry.current();
        let definition = registry.get(experiment_id)?;
        Some(
            self.resolve(definition, visitor, is_bot, &mut ThreadRandom)
                .await,
        )
    }

    /// Resolve a single experiment.
    pub async fn resolve(
        &self,
        definition: &ExperimentDefinition,
        visitor: &VisitorId,
        is_bot: bool,
        random: &mut dyn RandomSource,
    ) -> Resolution {
        let mut access = StoreAccess::ReadWrite;
        self.resolve_inner(definition, visitor, is_bot, random, &mut access)
            .await
    }

    /// Resolve every experiment in the current registry, or only those in
    /// `subset` when given. Unknown ids in `subset` are skipped.
    ///
    /// A `minted` visitor has no stored assignments, so lookups are skipped
    /// and new selections are only written.
    ///
    /// After the first store failure the remaining experiments skip the
    /// store and resolve to control, so one request never waits on more
    /// than one timeout per store operation.
    pub async fn resolve_all(
        &self,
        visitor: &VisitorId,
        minted: bool,
        is_bot: bool,
        subset: Option<&[String]>,
        random: &mut dyn RandomSource,
    ) -> ExperimentAssignments {
        let registry = self.registry.current();
        let mut assignments = ExperimentAssignments::new(visitor.clone(), is_bot);
        let mut access = if minted {
            StoreAccess::WriteOnly
        } else {
            StoreAccess::ReadWrite
        };

        let wanted =
            |id: &str| subset.is_none_or(|ids| ids.iter().any(|wanted| wanted == id));

        for definition in registry.iter().filter(|d| wanted(d.id.as_str())) {
            let resolution = self
                .resolve_inner(definition, visitor, is_bot, random, &mut access)
                .await;
            assignments.insert(resolution);
        }

        assignments
    }

    async fn resolve_inner(
        &self,
        definition: &ExperimentDefinition,
        visitor: &VisitorId,
        is_bot: bool,
        random: &mut dyn RandomSource,
        access: &mut StoreAccess,
    ) -> Resolution {
        let resolution = self
            .decide(definition, visitor, is_bot, random, access)
            .await;

        debug!(
            experiment = %resolution.experiment_id,
            variant = %resolution.variant,
            source = %resolution.source,
            visitor = %visitor,
            "experiment resolved"
        );
        self.metrics.record_assignment(
            &resolution.experiment_id,
            &resolution.variant,
            resolution.source.as_str(),
        );
        resolution
    }

    async fn decide(
        &self,
        definition: &ExperimentDefinition,
        visitor: &VisitorId,
        is_bot: bool,
        random: &mut dyn RandomSource,
        access: &mut StoreAccess,
    ) -> Resolution {
        let resolved = |variant: &str, source| Resolution {
            experiment_id: definition.id.clone(),
            variant: variant.to_string(),
            source,
        };

        if !definition.enabled {
            return resolved(definition.control(), AssignmentSource::Disabled);
        }

        if is_bot && let Some(bot_variant) = &definition.bot_variant {
            return resolved(bot_variant, AssignmentSource::Bot);
        }

        match *access {
            StoreAccess::Unavailable => {
                return resolved(definition.control(), AssignmentSource::Fallback);
            }
            StoreAccess::WriteOnly => {}
            StoreAccess::ReadWrite => match self.load(visitor, &definition.id).await {
                Ok(Some(existing)) if definition.has_variant(&existing.variant) => {
                    return resolved(&existing.variant, AssignmentSource::Stored);
                }
                Ok(Some(stale)) => {
                    debug!(
                        experiment = %definition.id,
                        variant = %stale.variant,
                        "stored variant no longer configured, reassigning"
                    );
                }
                Ok(None) => {}
                Err(StoreError::Corrupt(reason)) => {
                    warn!(
                        reason = %reason,
                        experiment = %definition.id,
                        "stored assignment unreadable, reassigning"
                    );
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        experiment = %definition.id,
                        "assignment lookup failed, serving control"
                    );
                    *access = StoreAccess::Unavailable;
                    return resolved(definition.control(), AssignmentSource::Fallback);
                }
            },
        }

        let variant = select(definition, random);

        if let Err(e) = self.save(visitor, &definition.id, variant).await {
            warn!(
                error = %e,
                experiment = %definition.id,
                "assignment write failed, serving control"
            );
            *access = StoreAccess::Unavailable;
            return resolved(definition.control(), AssignmentSource::Fallback);
        }

        resolved(variant, AssignmentSource::Selected)
    }

    async fn load(
        &self,
        visitor: &VisitorId,
        experiment_id: &str,
    ) -> Result<Option<Assignment>, StoreError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.store_timeout, self.store.get(visitor, experiment_id))
            .await
            .unwrap_or(Err(StoreError::Timeout));
        self.observe("get", started, result.is_err());
        result
    }

    async fn save(
        &self,
        visitor: &VisitorId,
        experiment_id: &str,
        variant: &str,
    ) -> Result<(), StoreError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.store_timeout,
            self.store.put(visitor, experiment_id, variant),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                self.discard_late_write(visitor, experiment_id);
                Err(StoreError::Timeout)
            }
        };
        self.observe("put", started, result.is_err());
        result
    }

    /// Delete the key in the background in case a timed-out write lands.
    fn discard_late_write(&self, visitor: &VisitorId, experiment_id: &str) {
        let store = Arc::clone(&self.store);
        let visitor = visitor.clone();
        let experiment_id = experiment_id.to_string();
        tokio::spawn(async move {
            let removed = tokio::time::timeout(
                LATE_WRITE_CLEANUP_TIMEOUT,
                store.remove(&visitor, &experiment_id),
            )
            .await
            .unwrap_or(Err(StoreError::Timeout));
            if let Err(e) = removed {
                debug!(
                    error = %e,
                    experiment = %experiment_id,
                    "cleanup after timed-out write failed"
                );
            }
        });
    }

    fn observe(&self, operation: &str, started: Instant, failed: bool) {
        self.metrics
            .record_store_call(operation, started.elapsed().as_secs_f64());
        if failed {
            self.metrics.record_store_error(operation);
        }
    }
}

impl fmt::Debug for ExperimentEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentEngine")
            .field("experiments", &self.registry.current().len())
            .field("store", &self.store.backend())
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}
