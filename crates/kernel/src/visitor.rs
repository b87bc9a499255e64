//! Visitor identity and its cookie transport.
//!
//! A visitor is identified by an opaque token carried in a cookie (or the
//! `x-visitor-id` header for non-browser clients). Tokens minted here are
//! UUIDv7 strings.

use std::fmt;

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tower_sessions::cookie::time::Duration;
use tower_sessions::cookie::{Cookie, SameSite};
use uuid::Uuid;

/// Header accepted as an alternative to the visitor cookie.
pub const VISITOR_HEADER: &str = "x-visitor-id";

/// Default visitor cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "exp_vid";

/// Longest token accepted from the transport.
const MAX_TOKEN_LEN: usize = 128;

/// Stable token identifying a repeat visitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitorId(String);

impl VisitorId {
    /// Mint a fresh identity.
    pub fn mint() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Accept a token from the transport if it is well formed.
    ///
    /// Tokens are used inside store keys, so only `[A-Za-z0-9_-]` is allowed.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        let valid = !token.is_empty()
            && token.len() <= MAX_TOKEN_LEN
            && token
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VisitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Visitor cookie attributes.
#[derive(Debug, Clone)]
pub struct VisitorCookie {
    pub name: String,
    pub max_age_days: i64,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Default for VisitorCookie {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            max_age_days: 365,
            secure: true,
            same_site: SameSite::Lax,
        }
    }
}

impl VisitorCookie {
    /// Find the visitor identity on an inbound request.
    ///
    /// The cookie wins over the header. Malformed tokens are ignored, which
    /// causes a fresh identity to be minted.
    pub fn extract(&self, headers: &HeaderMap) -> Option<VisitorId> {
        let from_cookie = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| Cookie::split_parse(v))
            .filter_map(Result::ok)
            .find(|c| c.name() == self.name)
            .and_then(|c| VisitorId::parse(c.value()));

        from_cookie.or_else(|| {
            headers
                .get(VISITOR_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(VisitorId::parse)
        })
    }

    /// Build the `Set-Cookie` value that persists `visitor`.
    pub fn set_cookie_header(&self, visitor: &VisitorId) -> Option<HeaderValue> {
        let cookie = Cookie::build((self.name.clone(), visitor.as_str().to_string()))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .max_age(Duration::days(self.max_age_days))
            .build();

        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode visitor cookie");
                None
            }
        }
    }
}

/// Parse a `SameSite` policy name, defaulting to `Lax`.
pub fn parse_same_site(value: &str) -> SameSite {
    match value.to_ascii_lowercase().as_str() {
        "strict" => SameSite::Strict,
        "none" => SameSite::None,
        _ => SameSite::Lax,
    }
}
