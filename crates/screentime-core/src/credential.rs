//! # Credentials
//!
//! The session credential is a browser-style storage state: a list of cookies
//! plus per-origin local storage. The bridge treats it as an opaque blob
//! except for one thing, the expiry of a few critical cookies.
//!
//! ## Expiry Inspection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   now                 now + horizon (4h)                │
//! │  ───────────────────┼────────────────────────┼──────────────────────►   │
//! │      expired        │     expiring_soon      │        healthy           │
//! │                                                                         │
//! │  • Only cookies named in the critical set are inspected                │
//! │  • Session cookies (no expiry, or expiry <= 0) never expire            │
//! │  • An empty credential is both expired and expiring soon               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Cookies whose expiry decides whether the session is usable.
pub const DEFAULT_CRITICAL_COOKIES: [&str; 3] = ["ft-session", "ft-panda-csrf-token", "at-acbuk"];

/// Cookie carrying the CSRF token for mutating calls.
pub const DEFAULT_CSRF_COOKIE: &str = "ft-panda-csrf-token";

/// How far ahead an expiry counts as "soon".
pub const DEFAULT_EXPIRY_HORIZON_HOURS: i64 = 4;

// =============================================================================
// Storage State
// =============================================================================

/// A single stored cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Unix timestamp in seconds; `-1` or absent for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
            http_only: None,
            secure: None,
            same_site: None,
            extra: Map::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires.timestamp() as f64);
        self
    }

    /// Expiry as a timestamp, or `None` for a session cookie.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.expires.filter(|e| *e > 0.0)?;
        Utc.timestamp_opt(secs as i64, 0).single()
    }

    /// True if the cookie has a past expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }

    /// True if `other` names the same jar slot: same name, same path, and the
    /// same domain once a leading dot is ignored.
    pub fn same_slot(&self, other: &Cookie) -> bool {
        fn domain(c: &Cookie) -> Option<&str> {
            c.domain.as_deref().map(|d| d.trim_start_matches('.'))
        }
        fn path(c: &Cookie) -> &str {
            c.path.as_deref().unwrap_or("/")
        }
        self.name == other.name && domain(self) == domain(other) && path(self) == path(other)
    }

    /// True if this cookie should be sent to `host`.
    pub fn matches_host(&self, host: &str) -> bool {
        match self.domain.as_deref() {
            None => true,
            Some(domain) => {
                let domain = domain.trim_start_matches('.');
                host == domain || host.ends_with(&format!(".{}", domain))
            }
        }
    }
}

/// The persisted credential blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<Cookie>,

    #[serde(default)]
    pub origins: Vec<Value>,
}

impl StorageState {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        StorageState {
            cookies,
            origins: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Most recently set cookie with this name.
    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().rev().find(|c| c.name == name)
    }

    /// Inserts or replaces cookies, keyed by [`Cookie::same_slot`].
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Cookie>) {
        for cookie in incoming {
            match self.cookies.iter_mut().find(|c| c.same_slot(&cookie)) {
                Some(existing) => *existing = cookie,
                None => self.cookies.push(cookie),
            }
        }
    }

    /// Drops cookies whose expiry has passed.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        self.cookies.retain(|c| !c.is_expired(now));
    }

    /// Renders a `Cookie` request header for `host`.
    pub fn header_for(&self, host: &str, now: DateTime<Utc>) -> Option<String> {
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|c| c.matches_host(host) && !c.is_expired(now))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }
}

// =============================================================================
// Expiry Report
// =============================================================================

/// Expiry of one critical cookie.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CookieExpiry {
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub expiring_soon: bool,
}

/// Result of inspecting a credential's critical cookies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpiryReport {
    pub expired: bool,
    pub expiring_soon: bool,
    /// Earliest expiry among the critical cookies that have one.
    pub earliest_expiry: Option<DateTime<Utc>>,
    /// Critical cookies absent from the credential.
    pub missing: Vec<String>,
    pub cookies: Vec<CookieExpiry>,
}

impl ExpiryReport {
    /// Report for a session with no credential at all.
    pub fn no_session() -> Self {
        ExpiryReport {
            expired: true,
            expiring_soon: true,
            earliest_expiry: None,
            missing: Vec::new(),
            cookies: Vec::new(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        !self.expired && !self.expiring_soon
    }

    /// Time until the earliest critical expiry, clamped at zero.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.earliest_expiry
            .map(|at| (at - now).max(Duration::zero()))
    }
}

/// Inspects the critical cookies of a credential.
///
/// ## Rules
/// - `expired` if any critical cookie's expiry is at or before `now`
/// - `expiring_soon` if any is before `now + horizon`
/// - a critical cookie that is absent is reported in `missing` only
///
/// ## Example
/// ```rust
/// use chrono::{Duration, Utc};
/// use screentime_core::credential::{inspect_expiry, Cookie, StorageState};
///
/// let now = Utc::now();
/// let state = StorageState::new(vec![
///     Cookie::new("ft-session", "x").with_expires(now + Duration::hours(3)),
/// ]);
/// let report = inspect_expiry(&state, &["ft-session"], now, Duration::hours(4));
/// assert!(report.expiring_soon);
/// assert!(!report.expired);
/// ```
pub fn inspect_expiry<S: AsRef<str>>(
    state: &StorageState,
    critical: &[S],
    now: DateTime<Utc>,
    horizon: Duration,
) -> ExpiryReport {
    if state.is_empty() {
        return ExpiryReport::no_session();
    }

    let soon = now + horizon;
    let mut report = ExpiryReport {
        expired: false,
        expiring_soon: false,
        earliest_expiry: None,
        missing: Vec::new(),
        cookies: Vec::new(),
    };

    for name in critical {
        let name = name.as_ref();
        let Some(cookie) = state.cookie(name) else {
            report.missing.push(name.to_string());
            continue;
        };

        let expires_at = cookie.expires_at();
        let expired = expires_at.is_some_and(|at| at <= now);
        let expiring_soon = expires_at.is_some_and(|at| at < soon);

        report.expired |= expired;
        report.expiring_soon |= expiring_soon;
        if let Some(at) = expires_at {
            report.earliest_expiry = Some(report.earliest_expiry.map_or(at, |e| e.min(at)));
        }
        report.cookies.push(CookieExpiry {
            name: name.to_string(),
            expires_at,
            expired,
            expiring_soon,
        });
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn critical() -> Vec<&'static str> {
        DEFAULT_CRITICAL_COOKIES.to_vec()
    }

    #[test]
    fn test_three_hours_ahead_is_expiring_soon() {
        let now = Utc::now();
        let state = StorageState::new(vec![
            Cookie::new("ft-session", "a").with_expires(now + Duration::hours(3)),
            Cookie::new("at-acbuk", "b").with_expires(now + Duration::days(30)),
        ]);
        let report = inspect_expiry(&state, &critical(), now, Duration::hours(4));
        assert!(report.expiring_soon);
        assert!(!report.expired);
        assert_eq!(report.missing, vec!["ft-panda-csrf-token".to_string()]);
    }

    #[test]
    fn test_past_expiry_is_expired() {
        let now = Utc::now();
        let state = StorageState::new(vec![
            Cookie::new("ft-session", "a").with_expires(now - Duration::minutes(1)),
        ]);
        let report = inspect_expiry(&state, &critical(), now, Duration::hours(4));
        assert!(report.expired);
        assert!(report.expiring_soon);
    }

    #[test]
    fn test_session_cookies_never_expire() {
        let now = Utc::now();
        let mut cookie = Cookie::new("ft-session", "a");
        cookie.expires = Some(-1.0);
        let state = StorageState::new(vec![cookie]);
        let report = inspect_expiry(&state, &critical(), now, Duration::hours(4));
        assert!(report.is_healthy());
        assert_eq!(report.earliest_expiry, None);
    }

    #[test]
    fn test_empty_state_is_expired() {
        let report = inspect_expiry(&StorageState::default(), &critical(), Utc::now(), Duration::hours(4));
        assert!(report.expired && report.expiring_soon);
    }

    #[test]
    fn test_non_critical_cookies_ignored() {
        let now = Utc::now();
        let state = StorageState::new(vec![
            Cookie::new("session-token", "a").with_expires(now - Duration::days(1)),
            Cookie::new("ft-session", "b").with_expires(now + Duration::days(10)),
        ]);
        let report = inspect_expiry(&state, &critical(), now, Duration::hours(4));
        assert!(report.is_healthy());
    }

    #[test]
    fn test_storage_state_json_compat() {
        let json = r#"{
            "cookies": [{
                "name": "ft-session", "value": "abc", "domain": ".amazon.co.uk",
                "path": "/", "expires": 1900000000.5, "httpOnly": true,
                "secure": true, "sameSite": "Lax", "partitionKey": "x"
            }],
            "origins": [{ "origin": "https://parents.amazon.co.uk", "localStorage": [] }]
        }"#;
        let state: StorageState = serde_json::from_str(json).unwrap();
        assert_eq!(state.cookies[0].http_only, Some(true));
        assert_eq!(state.cookies[0].extra["partitionKey"], "x");

        let back = serde_json::to_value(&state).unwrap();
        assert_eq!(back["cookies"][0]["sameSite"], "Lax");
        assert_eq!(back["origins"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_merge_and_header() {
        let now = Utc::now();
        let mut state = StorageState::new(vec![
            Cookie::new("a", "1").with_domain(".amazon.co.uk"),
            Cookie::new("b", "2").with_domain("example.com"),
        ]);
        state.merge([Cookie::new("a", "3").with_domain(".amazon.co.uk")]);
        assert_eq!(state.cookies.len(), 2);
        assert_eq!(
            state.header_for("parents.amazon.co.uk", now),
            Some("a=3".to_string())
        );
        assert_eq!(state.header_for("other.org", now), None);
    }

    #[test]
    fn test_merge_ignores_leading_dot() {
        let now = Utc::now();
        let mut old = Cookie::new("ft-session", "OLD").with_domain(".amazon.co.uk");
        old.path = Some("/".into());
        let mut state = StorageState::new(vec![old]);

        state.merge([Cookie::new("ft-session", "NEW").with_domain("amazon.co.uk")]);
        assert_eq!(state.cookies.len(), 1);
        assert_eq!(
            state.header_for("parents.amazon.co.uk", now),
            Some("ft-session=NEW".to_string())
        );

        state.merge([Cookie::new("ft-session", "OTHER").with_domain("example.com")]);
        assert_eq!(state.cookies.len(), 2);
    }
}
