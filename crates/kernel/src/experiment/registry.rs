//! Experiment registry.
//!
//! Definitions are validated once at load time; after that the registry is
//! immutable. Reloading builds a new registry and swaps it into the
//! [`RegistryHandle`], so in-flight requests keep the snapshot they started
//! with.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use super::{ExperimentDefinition, ExperimentsConfig};
use crate::error::ConfigError;

/// Allowed deviation of a weight vector's sum from 1.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Validated, read-only set of experiment definitions.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    experiments: BTreeMap<String, ExperimentDefinition>,
}

/// Experiments file layout: either a map keyed by id or a plain list.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExperimentsFile {
    Map(DefinitionEntries),
    List(Vec<ExperimentDefinition>),
}

/// Map-form entries in file order, repeated keys included.
///
/// Deserializing straight into a map would let a repeated id silently
/// replace the earlier definition.
struct DefinitionEntries(Vec<(String, ExperimentDefinition)>);

impl<'de> Deserialize<'de> for DefinitionEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = DefinitionEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of experiment id to definition")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, ExperimentDefinition>()? {
                    entries.push(entry);
                }
                Ok(DefinitionEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl Registry {
    /// Validate a host-supplied config and build a registry from it.
    pub fn load(config: ExperimentsConfig) -> Result<Self, ConfigError> {
        let mut experiments = BTreeMap::new();
        for (key, definition) in config {
            if key != definition.id {
                return Err(ConfigError::IdMismatch {
                    key,
                    id: definition.id,
                });
            }
            validate(&definition)?;
            experiments.insert(key, definition);
        }

        debug!(count = experiments.len(), "experiment registry loaded");
        Ok(Self { experiments })
    }

    /// Build a registry from a list of definitions, rejecting repeated ids.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = ExperimentDefinition>,
    ) -> Result<Self, ConfigError> {
        let mut config = ExperimentsConfig::new();
        for definition in definitions {
            if config.contains_key(&definition.id) {
                return Err(ConfigError::DuplicateId(definition.id));
            }
            config.insert(definition.id.clone(), definition);
        }
        Self::load(config)
    }

    /// Build a registry from `(key, definition)` pairs, rejecting repeated
    /// keys.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, ExperimentDefinition)>,
    ) -> Result<Self, ConfigError> {
        let mut config = ExperimentsConfig::new();
        for (key, definition) in entries {
            if config.contains_key(&key) {
                return Err(ConfigError::DuplicateId(key));
            }
            config.insert(key, definition);
        }
        Self::load(config)
    }

    /// Read and validate an experiments file.
    ///
    /// The format is chosen by extension: `.yml`/`.yaml` or `.json`.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_err = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let file: ExperimentsFile = match path.extension().and_then(|e| e.to_str()) {
            Some("yml" | "yaml") => {
                serde_yml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?
            }
            Some("json") => {
                serde_json::from_str(&contents).map_err(|e| parse_err(e.to_string()))?
            }
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };

        let registry = match file {
            ExperimentsFile::Map(DefinitionEntries(entries)) => Self::from_entries(entries)?,
            ExperimentsFile::List(definitions) => Self::from_definitions(definitions)?,
        };

        info!(
            path = %path.display(),
            experiments = registry.len(),
            "experiments file loaded"
        );
        Ok(registry)
    }

    /// Look up an experiment by id.
    pub fn get(&self, id: &str) -> Option<&ExperimentDefinition> {
        self.experiments.get(id)
    }

    /// Iterate over all experiments in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ExperimentDefinition> {
        self.experiments.values()
    }

    /// All experiment ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.experiments.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

/// Check a single definition against the registry invariants.
fn validate(definition: &ExperimentDefinition) -> Result<(), ConfigError> {
    let id = &definition.id;
    if id.is_empty() {
        return Err(ConfigError::EmptyId);
    }

    if definition.variants.is_empty() {
        return Err(ConfigError::NoVariants(id.clone()));
    }

    let mut seen = HashSet::with_capacity(definition.variants.len());
    for variant in &definition.variants {
        if !seen.insert(variant.as_str()) {
            return Err(ConfigError::DuplicateVariant {
                id: id.clone(),
                variant: variant.clone(),
            });
        }
    }

    if let Some(weights) = &definition.weight {
        if weights.len() != definition.variants.len() {
            return Err(ConfigError::WeightLengthMismatch {
                id: id.clone(),
                weights: weights.len(),
                variants: definition.variants.len(),
            });
        }

        if let Some(&weight) = weights
            .iter()
            .find(|w| !w.is_finite() || !(0.0..=1.0).contains(*w))
        {
            return Err(ConfigError::WeightOutOfRange {
                id: id.clone(),
                weight,
            });
        }

        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum {
                id: id.clone(),
                sum,
            });
        }
    }

    if let Some(bot_variant) = &definition.bot_variant
        && !definition.has_variant(bot_variant)
    {
        return Err(ConfigError::UnknownBotVariant {
            id: id.clone(),
            variant: bot_variant.clone(),
        });
    }

    Ok(())
}

/// Process-wide holder for the active registry.
///
/// Readers take a cheap `Arc` snapshot; reloads replace the whole registry.
///
/// Uses `parking_lot::RwLock` for the pointer swap: no poisoning, and the
/// critical section is a single `Arc` clone.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    current: Arc<parking_lot::RwLock<Arc<Registry>>>,
}

impl RegistryHandle {
    pub fn new(registry: Registry) -> Self {
        Self {
            current: Arc::new(parking_lot::RwLock::new(Arc::new(registry))),
        }
    }

    /// Snapshot of the active registry.
    pub fn current(&self) -> Arc<Registry> {
        Arc::clone(&self.current.read())
    }

    /// Atomically replace the active registry, returning the previous one.
    pub fn swap(&self, registry: Registry) -> Arc<Registry> {
        let next = Arc::new(registry);
        let previous = std::mem::replace(&mut *self.current.write(), next);
        info!(
            previous = previous.len(),
            current = self.current.read().len(),
            "experiment registry swapped"
        );
        previous
    }

    /// Reload from a file, keeping the current registry on failure.
    pub fn reload_from(&self, path: &Path) -> Result<(), ConfigError> {
        let registry = Registry::from_path(path)?;
        self.swap(registry);
        Ok(())
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config_of(defs: Vec<ExperimentDefinition>) -> ExperimentsConfig {
        defs.into_iter().map(|d| (d.id.clone(), d)).collect()
    }

    #[test]
    fn loads_valid_weighted_and_uniform_experiments() {
        let registry = Registry::load(config_of(vec![
            ExperimentDefinition::new("hero", ["control", "alt"]).with_weights(vec![0.5, 0.5]),
            ExperimentDefinition::new("cta", ["control", "one", "two"]).with_bot_variant("control"),
        ]))
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("hero").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["cta", "hero"]);
    }

    #[test]
    fn rejects_key_id_mismatch() {
        let mut config = ExperimentsConfig::new();
        config.insert(
            "hero".to_string(),
            ExperimentDefinition::new("other", ["control"]),
        );
        assert!(matches!(
            Registry::load(config),
            Err(ConfigError::IdMismatch { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_ids_in_list() {
        let result = Registry::from_definitions(vec![
            ExperimentDefinition::new("hero", ["a"]),
            ExperimentDefinition::new("hero", ["b"]),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateId(id)) if id == "hero"));
    }

    #[test]
    fn rejects_empty_variants() {
        let def = ExperimentDefinition::new("hero", Vec::<String>::new());
        assert!(matches!(
            Registry::load(config_of(vec![def])),
            Err(ConfigError::NoVariants(_))
        ));
    }

    #[test]
    fn rejects_duplicate_variants() {
        let def = ExperimentDefinition::new("hero", ["a", "a"]);
        assert!(matches!(
            Registry::load(config_of(vec![def])),
            Err(ConfigError::DuplicateVariant { .. })
        ));
    }

    #[test]
    fn rejects_weight_length_mismatch() {
        let def = ExperimentDefinition::new("hero", ["a", "b", "c"]).with_weights(vec![0.5, 0.5]);
        assert!(matches!(
            Registry::load(config_of(vec![def])),
            Err(ConfigError::WeightLengthMismatch {
                weights: 2,
                variants: 3,
                ..
            })
        ));
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let def = ExperimentDefinition::new("hero", ["a", "b"]).with_weights(vec![0.5, 0.4]);
        assert!(matches!(
            Registry::load(config_of(vec![def])),
            Err(ConfigError::WeightSum { .. })
        ));
    }

    #[test]
    fn accepts_weights_within_tolerance() {
        let def = ExperimentDefinition::new("hero", ["a", "b", "c"])
            .with_weights(vec![0.1, 0.2, 0.7 + 5e-7]);
        assert!(Registry::load(config_of(vec![def])).is_ok());
    }

    #[test]
    fn rejects_out_of_range_weight() {
        let def = ExperimentDefinition::new("hero", ["a", "b"]).with_weights(vec![1.5, -0.5]);
        assert!(matches!(
            Registry::load(config_of(vec![def])),
            Err(ConfigError::WeightOutOfRange { .. })
        ));

        let def = ExperimentDefinition::new("hero", ["a", "b"]).with_weights(vec![f64::NAN, 1.0]);
        assert!(matches!(
            Registry::load(config_of(vec![def])),
            Err(ConfigError::WeightOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_unknown_bot_variant() {
        let def = ExperimentDefinition::new("hero", ["a", "b"]).with_bot_variant("c");
        assert!(matches!(
            Registry::load(config_of(vec![def])),
            Err(ConfigError::UnknownBotVariant { .. })
        ));
    }

    #[test]
    fn keeps_disabled_experiments() {
        let registry = Registry::load(config_of(vec![
            ExperimentDefinition::new("hero", ["a", "b"]).disabled(),
        ]))
        .unwrap();
        assert!(!registry.get("hero").unwrap().enabled);
    }

    #[test]
    fn handle_swap_replaces_snapshot_without_touching_old_one() {
        let handle = RegistryHandle::new(
            Registry::load(config_of(vec![ExperimentDefinition::new("a", ["x"])])).unwrap(),
        );
        let before = handle.current();

        let previous = handle.swap(
            Registry::load(config_of(vec![ExperimentDefinition::new("b", ["y"])])).unwrap(),
        );

        assert!(before.get("a").is_some());
        assert!(previous.get("a").is_some());
        assert!(handle.current().get("a").is_none());
        assert!(handle.current().get("b").is_some());
    }

    #[test]
    fn reload_failure_keeps_current_registry() {
        let handle = RegistryHandle::new(
            Registry::load(config_of(vec![ExperimentDefinition::new("a", ["x"])])).unwrap(),
        );
        let result = handle.reload_from(Path::new("/nonexistent/experiments.yml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
        assert!(handle.current().get("a").is_some());
    }

    #[test]
    fn from_path_rejects_unknown_extension() {
        let dir = std::env::temp_dir().join(format!("exp-registry-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("experiments.toml");
        std::fs::write(&path, "").unwrap();

        assert!(matches!(
            Registry::from_path(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn from_path_reads_yaml_map_and_json_list() {
        let dir = std::env::temp_dir().join(format!("exp-registry-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();

        let yaml = dir.join("experiments.yml");
        std::fs::write(
            &yaml,
            "landing_hero_v1:\n  id: landing_hero_v1\n  variants: [control, alt]\n  weight: [0.5, 0.5]\n  enabled: true\n",
        )
        .unwrap();
        let registry = Registry::from_path(&yaml).unwrap();
        assert_eq!(
            registry.get("landing_hero_v1").unwrap().weight,
            Some(vec![0.5, 0.5])
        );

        let json = dir.join("experiments.json");
        std::fs::write(
            &json,
            r#"[{"id":"cta","variants":["control","ContactOne"],"botVariant":"control"}]"#,
        )
        .unwrap();
        let registry = Registry::from_path(&json).unwrap();
        assert_eq!(
            registry.get("cta").unwrap().bot_variant.as_deref(),
            Some("control")
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn from_path_rejects_repeated_map_keys() {
        let dir = std::env::temp_dir().join(format!("exp-registry-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();

        let json = dir.join("experiments.json");
        std::fs::write(
            &json,
            r#"{"hero":{"id":"hero","variants":["a","b"]},"hero":{"id":"hero","variants":["x"]}}"#,
        )
        .unwrap();
        assert!(matches!(
            Registry::from_path(&json),
            Err(ConfigError::DuplicateId(id)) if id == "hero"
        ));

        let yaml = dir.join("experiments.yml");
        std::fs::write(
            &yaml,
            "hero:\n  id: hero\n  variants: [a, b]\nhero:\n  id: hero\n  variants: [x]\n",
        )
        .unwrap();
        assert!(matches!(
            Registry::from_path(&yaml),
            Err(ConfigError::DuplicateId(id)) if id == "hero"
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn from_entries_rejects_repeated_keys() {
        let result = Registry::from_entries(vec![
            ("hero".to_string(), ExperimentDefinition::new("hero", ["a"])),
            ("cta".to_string(), ExperimentDefinition::new("cta", ["a"])),
            ("hero".to_string(), ExperimentDefinition::new("hero", ["b"])),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateId(id)) if id == "hero"));
    }
}
