//! Error types for the experiment kernel.
//!
//! `ConfigError` is fatal at startup: the process must not serve traffic
//! with an invalid registry. `StoreError` is transient and never escapes a
//! request; the engine logs it and falls back to the control variant.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid experiment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("experiment key `{key}` does not match its id `{id}`")]
    IdMismatch { key: String, id: String },

    #[error("experiment id must not be empty")]
    EmptyId,

    #[error("duplicate experiment id `{0}`")]
    DuplicateId(String),

    #[error("experiment `{0}` has no variants")]
    NoVariants(String),

    #[error("experiment `{id}` lists variant `{variant}` more than once")]
    DuplicateVariant { id: String, variant: String },

    #[error("experiment `{id}` has {weights} weights for {variants} variants")]
    WeightLengthMismatch {
        id: String,
        weights: usize,
        variants: usize,
    },

    #[error("experiment `{id}` has weight {weight} outside [0, 1]")]
    WeightOutOfRange { id: String, weight: f64 },

    #[error("experiment `{id}` weights sum to {sum}, expected 1")]
    WeightSum { id: String, sum: f64 },

    #[error("experiment `{id}` bot variant `{variant}` is not one of its variants")]
    UnknownBotVariant { id: String, variant: String },

    #[error("failed to read experiments file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse experiments file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported experiments file extension: {0}")]
    UnsupportedFormat(PathBuf),
}

/// Assignment store failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("assignment store unavailable: {0}")]
    Unavailable(String),

    #[error("assignment store timed out")]
    Timeout,

    #[error("corrupt assignment record: {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
