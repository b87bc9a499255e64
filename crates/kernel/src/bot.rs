//! Automated traffic detection.
//!
//! Bots are served an experiment's `botVariant` (when one is configured)
//! without creating or reading any stored assignment.

use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use regex::RegexSet;

/// User-agent fragments that identify crawlers, monitors and HTTP tooling.
///
/// Matched case-insensitively anywhere in the header.
pub const DEFAULT_BOT_PATTERNS: &[&str] = &[
    r"bot\b",
    r"bot/",
    r"crawl",
    r"spider",
    r"slurp",
    r"mediapartners",
    r"facebookexternalhit",
    r"embedly",
    r"preview",
    r"headless",
    r"lighthouse",
    r"pingdom",
    r"uptime",
    r"monitor",
    r"^curl/",
    r"^wget/",
    r"python-requests",
    r"python-urllib",
    r"go-http-client",
    r"java/",
    r"okhttp",
    r"axios/",
    r"node-fetch",
    r"libwww-perl",
    r"httpclient",
];

/// Predicate over request metadata. Implementations must be side-effect-free.
pub trait BotClassifier: Send + Sync {
    fn is_bot(&self, headers: &HeaderMap) -> bool;
}

/// Classifies requests by their `User-Agent` header.
///
/// Missing or empty user agents count as automated. Prefetch requests
/// (`Purpose: prefetch` or `Sec-Purpose: prefetch`) are treated the same
/// way so speculative loads never create assignments.
#[derive(Debug, Clone)]
pub struct UserAgentClassifier {
    patterns: RegexSet,
}

impl UserAgentClassifier {
    /// Build a classifier from the default patterns plus `extra`.
    pub fn new<I, S>(extra: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = DEFAULT_BOT_PATTERNS
            .iter()
            .map(|p| format!("(?i){p}"))
            .chain(extra.into_iter().map(|p| format!("(?i){}", p.as_ref())))
            .collect::<Vec<_>>();
        Ok(Self {
            patterns: RegexSet::new(patterns)?,
        })
    }

    /// Classify a raw user-agent string.
    pub fn matches_user_agent(&self, user_agent: &str) -> bool {
        let user_agent = user_agent.trim();
        user_agent.is_empty() || self.patterns.is_match(user_agent)
    }
}

impl Default for UserAgentClassifier {
    // The built-in patterns are constant and covered by tests.
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        let patterns = DEFAULT_BOT_PATTERNS.iter().map(|p| format!("(?i){p}"));
        Self {
            patterns: RegexSet::new(patterns).expect("default bot patterns are valid"),
        }
    }
}

impl BotClassifier for UserAgentClassifier {
    fn is_bot(&self, headers: &HeaderMap) -> bool {
        if is_prefetch(headers) {
            return true;
        }

        match headers.get(USER_AGENT).map(|v| v.to_str()) {
            Some(Ok(user_agent)) => self.matches_user_agent(user_agent),
            // Absent or non-UTF-8 user agents are not browsers.
            Some(Err(_)) | None => true,
        }
    }
}

fn is_prefetch(headers: &HeaderMap) -> bool {
    ["purpose", "sec-purpose"].iter().any(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("prefetch"))
    })
}
