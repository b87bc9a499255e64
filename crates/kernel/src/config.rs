//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::engine::DEFAULT_STORE_TIMEOUT;
use crate::store::DEFAULT_MEMORY_CAPACITY;
use crate::visitor::{DEFAULT_COOKIE_NAME, VisitorCookie, parse_same_site};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// Experiments file, YAML or JSON (default: ./experiments.yml).
    pub experiments_file: PathBuf,

    /// Redis connection URL. When unset, assignments are kept in memory.
    pub redis_url: Option<String>,

    /// Maximum assignments kept by the in-memory store (default: 100000).
    pub memory_store_capacity: u64,

    /// Expiry for stored assignments in seconds. None = never expire.
    pub assignment_ttl_secs: Option<u64>,

    /// Bound on each assignment store call (default: 50ms).
    pub store_timeout: Duration,

    /// Visitor cookie name (default: exp_vid).
    pub visitor_cookie_name: String,

    /// Visitor cookie lifetime in days (default: 365).
    pub visitor_cookie_max_age_days: i64,

    /// Whether the visitor cookie is marked Secure (default: true).
    pub cookie_secure: bool,

    /// Cookie SameSite policy: "strict", "lax", or "none" (default: "lax").
    pub cookie_same_site: String,

    /// Experiment ids to resolve per request (comma-separated). Empty = all.
    pub experiment_subset: Option<Vec<String>>,

    /// Extra user-agent patterns treated as bots (comma-separated regexes).
    pub bot_patterns: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let experiments_file = env::var("EXPERIMENTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./experiments.yml"));

        let redis_url = env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty());

        let memory_store_capacity = env::var("MEMORY_STORE_CAPACITY")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("MEMORY_STORE_CAPACITY must be a valid u64")?
            .unwrap_or(DEFAULT_MEMORY_CAPACITY);

        let assignment_ttl_secs = env::var("ASSIGNMENT_TTL_SECS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("ASSIGNMENT_TTL_SECS must be a valid u64")?;

        let store_timeout = env::var("STORE_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse::<u64>().map(Duration::from_millis))
            .transpose()
            .context("STORE_TIMEOUT_MS must be a valid u64")?
            .unwrap_or(DEFAULT_STORE_TIMEOUT);

        let visitor_cookie_name =
            env::var("VISITOR_COOKIE_NAME").unwrap_or_else(|_| DEFAULT_COOKIE_NAME.to_string());

        let visitor_cookie_max_age_days = env::var("VISITOR_COOKIE_MAX_AGE_DAYS")
            .unwrap_or_else(|_| "365".to_string())
            .parse()
            .context("VISITOR_COOKIE_MAX_AGE_DAYS must be a valid i64")?;

        let cookie_secure = env::var("COOKIE_SECURE")
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        let cookie_same_site = env::var("COOKIE_SAME_SITE")
            .unwrap_or_else(|_| "lax".to_string())
            .to_lowercase();

        let experiment_subset = env::var("EXPERIMENT_SUBSET")
            .ok()
            .map(|v| split_list(&v))
            .filter(|ids| !ids.is_empty());

        let bot_patterns = env::var("BOT_PATTERNS")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        Ok(Self {
            port,
            experiments_file,
            redis_url,
            memory_store_capacity,
            assignment_ttl_secs,
            store_timeout,
            visitor_cookie_name,
            visitor_cookie_max_age_days,
            cookie_secure,
            cookie_same_site,
            experiment_subset,
            bot_patterns,
        })
    }

    /// Visitor cookie attributes derived from this config.
    pub fn visitor_cookie(&self) -> VisitorCookie {
        VisitorCookie {
            name: self.visitor_cookie_name.clone(),
            max_age_days: self.visitor_cookie_max_age_days,
            secure: self.cookie_secure,
            same_site: parse_same_site(&self.cookie_same_site),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
