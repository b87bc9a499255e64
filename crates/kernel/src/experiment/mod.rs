//! Experiment definitions, the registry that validates them, and the
//! variant selector.

pub mod registry;
pub mod selector;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use registry::{Registry, RegistryHandle};
pub use selector::{FixedRandom, RandomSource, SequenceRandom, ThreadRandom, select};

/// Host-supplied experiments, keyed by experiment id.
///
/// Ordered so resolution and logging happen in a stable order.
pub type ExperimentsConfig = BTreeMap<String, ExperimentDefinition>;

/// A named A/B(/n) test with its candidate variants.
///
/// Field names follow the host configuration format (`botVariant`), so a
/// YAML or JSON experiments file deserializes directly into this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentDefinition {
    pub id: String,

    /// Candidate variants. The first one is the control.
    pub variants: Vec<String>,

    /// Optional sampling weights, parallel to `variants`. Absent = uniform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<Vec<f64>>,

    /// Variant served to automated traffic without persisting anything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_variant: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ExperimentDefinition {
    /// Create an enabled, uniformly weighted experiment.
    pub fn new<I, S>(id: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            variants: variants.into_iter().map(Into::into).collect(),
            weight: None,
            bot_variant: None,
            enabled: true,
        }
    }

    /// Set sampling weights.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Self {
        self.weight = Some(weights);
        self
    }

    /// Set the variant served to bots.
    pub fn with_bot_variant(mut self, variant: impl Into<String>) -> Self {
        self.bot_variant = Some(variant.into());
        self
    }

    /// Mark the experiment disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The control variant (first listed).
    ///
    /// Registry validation guarantees at least one variant, so this only
    /// returns an empty string for definitions that were never validated.
    pub fn control(&self) -> &str {
        self.variants.first().map(String::as_str).unwrap_or_default()
    }

    /// Whether `variant` is one of this experiment's variants.
    pub fn has_variant(&self, variant: &str) -> bool {
        self.variants.iter().any(|v| v == variant)
    }
}
