//! Experiment kernel test utilities.
//!
//! Helpers for integration testing: experiment fixtures, temporary
//! experiments files, request header constants and JSON assertions.

use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A desktop browser user agent.
pub const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) \
                              AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15";

/// A well-known crawler user agent.
pub const CRAWLER_UA: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

/// Create an enabled test experiment with uniform weights.
pub fn test_experiment(id: &str, variants: &[&str]) -> TestExperiment {
    TestExperiment {
        id: id.to_string(),
        variants: variants.iter().map(|s| s.to_string()).collect(),
        weight: None,
        bot_variant: None,
        enabled: true,
    }
}

/// A test experiment builder, serialized in the host config format.
#[derive(Debug, Clone)]
pub struct TestExperiment {
    pub id: String,
    pub variants: Vec<String>,
    pub weight: Option<Vec<f64>>,
    pub bot_variant: Option<String>,
    pub enabled: bool,
}

impl TestExperiment {
    /// Set sampling weights.
    pub fn with_weights(mut self, weights: &[f64]) -> Self {
        self.weight = Some(weights.to_vec());
        self
    }

    /// Set the bot variant.
    pub fn with_bot_variant(mut self, variant: &str) -> Self {
        self.bot_variant = Some(variant.to_string());
        self
    }

    /// Set as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Render as the JSON object a host would put in its config.
    pub fn to_json(&self) -> JsonValue {
        let mut value = serde_json::json!({
            "id": self.id,
            "variants": self.variants,
            "enabled": self.enabled,
        });
        if let Some(obj) = value.as_object_mut() {
            if let Some(weight) = &self.weight {
                obj.insert("weight".to_string(), serde_json::json!(weight));
            }
            if let Some(bot_variant) = &self.bot_variant {
                obj.insert("botVariant".to_string(), serde_json::json!(bot_variant));
            }
        }
        value
    }
}

/// Build an experiments config map (`id → definition`) as JSON.
pub fn experiments_json(experiments: &[TestExperiment]) -> JsonValue {
    let map = experiments
        .iter()
        .map(|e| (e.id.clone(), e.to_json()))
        .collect::<serde_json::Map<_, _>>();
    JsonValue::Object(map)
}

/// An experiments file in a private temp directory, removed on drop.
#[derive(Debug)]
pub struct TempExperimentsFile {
    dir: PathBuf,
    path: PathBuf,
}

impl TempExperimentsFile {
    /// Write `contents` to `experiments.{extension}`.
    ///
    /// JSON is valid YAML, so JSON contents work for `yml` files too.
    pub fn write(extension: &str, contents: &str) -> std::io::Result<Self> {
        let dir = std::env::temp_dir().join(format!("experiment-kernel-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("experiments.{extension}"));
        std::fs::write(&path, contents)?;
        Ok(Self { dir, path })
    }

    /// Write a JSON experiments map.
    pub fn json(experiments: &[TestExperiment]) -> std::io::Result<Self> {
        Self::write("json", &experiments_json(experiments).to_string())
    }

    /// Replace the file contents (for reload tests).
    pub fn rewrite(&self, contents: &str) -> std::io::Result<()> {
        std::fs::write(&self.path, contents)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempExperimentsFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Assertion helpers for JSON content.
pub mod assert {
    use serde_json::Value;

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "Expected JSON to have key '{key}', got: {value}"
        );
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }
}
