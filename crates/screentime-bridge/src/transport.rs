//! # Dashboard Transport
//!
//! The authenticated HTTP channel to the dashboard, with its own cookie jar.
//!
//! ## Transport Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Transport Lifecycle                              │
//! │                                                                         │
//! │  TransportFactory::create()                                            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌────────────┐ install(credential) ┌────────────┐                      │
//! │  │   Fresh    │ ─────────────────► │   Armed    │ ◄── Set-Cookie merge │
//! │  └────────────┘                    └─────┬──────┘                      │
//! │                                          │ close() (exactly once)      │
//! │                                          ▼                              │
//! │                                    ┌────────────┐                      │
//! │                                    │   Closed   │                      │
//! │                                    └────────────┘                      │
//! │                                                                         │
//! │  After repeated sync failures the session manager closes the          │
//! │  transport and asks the factory for a new one.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE, USER_AGENT};
use reqwest::redirect::Policy;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use screentime_core::{Cookie, StorageState};

use crate::error::{BridgeError, BridgeResult};

/// Header carrying the CSRF token on mutating calls.
pub const CSRF_HEADER: &str = "x-amzn-csrf";

const ACCEPT_VALUE: &str = "application/json, text/plain, */*";
const MAX_REDIRECTS: usize = 10;

// =============================================================================
// Request / Response Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    /// True for methods that change upstream state and need a CSRF token.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
        }
    }
}

/// One upstream API call.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path and query relative to the base URL (`/ajax/...`).
    pub path: String,
    pub body: Option<Value>,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Result of loading a page, after redirects.
#[derive(Debug, Clone, PartialEq)]
pub struct Navigation {
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

impl Navigation {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// An authenticated channel to the dashboard.
#[async_trait]
pub trait Transport: Send {
    /// Performs one API call. Only network failures are errors; every HTTP
    /// status comes back as a response.
    async fn request(&mut self, request: &UpstreamRequest) -> BridgeResult<RawResponse>;

    /// Loads a page, following redirects.
    async fn navigate(&mut self, path: &str) -> BridgeResult<Navigation>;

    /// Snapshot of the current cookie jar.
    fn storage_state(&self) -> StorageState;

    /// Replaces the cookie jar.
    fn install(&mut self, state: StorageState);

    /// Releases the transport. Further calls fail.
    async fn close(&mut self);
}

/// Creates transports; used at startup and when a session is recreated.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> BridgeResult<Box<dyn Transport>>;
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// reqwest-backed transport. Redirects are followed by hand so cookies set
/// on intermediate hops land in the jar.
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    jar: StorageState,
    closed: bool,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> BridgeResult<Self> {
        let base = Url::parse(base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| BridgeError::InvalidConfig(format!("user agent: {}", e)))?,
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .default_headers(headers)
            .build()
            .map_err(|e| BridgeError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpTransport {
            client,
            base,
            jar: StorageState::default(),
            closed: false,
        })
    }

    fn ensure_open(&self) -> BridgeResult<()> {
        if self.closed {
            return Err(BridgeError::TransportError("transport is closed".into()));
        }
        Ok(())
    }

    fn cookie_header(&self, url: &Url) -> Option<HeaderValue> {
        let host = url.host_str()?;
        let header = self.jar.header_for(host, Utc::now())?;
        HeaderValue::from_str(&header).ok()
    }

    fn absorb_cookies(&mut self, url: &Url, headers: &HeaderMap) {
        let host = url.host_str().unwrap_or_default();
        let now = Utc::now();
        let cookies: Vec<Cookie> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| parse_set_cookie(v, host, now))
            .collect();

        if !cookies.is_empty() {
            debug!(count = cookies.len(), "Merging response cookies");
            self.jar.merge(cookies);
            self.jar.prune_expired(now);
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&mut self, request: &UpstreamRequest) -> BridgeResult<RawResponse> {
        self.ensure_open()?;
        let url = self.base.join(&request.path)?;

        let mut builder = match request.method {
            Method::Get => self.client.get(url.clone()),
            Method::Post => self.client.post(url.clone()),
            Method::Put => self.client.put(url.clone()),
        };

        builder = builder.header(CONTENT_TYPE, "application/json");
        if let Some(cookie) = self.cookie_header(&url) {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some(token) = &request.csrf_token {
            builder = builder.header(CSRF_HEADER, token);
        }
        if let Some(body) = &request.body {
            builder = builder.body(serde_json::to_string(body)?);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        self.absorb_cookies(&url, response.headers());
        let body = response.text().await?;

        debug!(method = %request.method, path = %request.path, status, "Upstream response");
        Ok(RawResponse { status, body })
    }

    async fn navigate(&mut self, path: &str) -> BridgeResult<Navigation> {
        self.ensure_open()?;
        let mut url = self.base.join(path)?;

        for _ in 0..=MAX_REDIRECTS {
            let mut builder = self.client.get(url.clone());
            if let Some(cookie) = self.cookie_header(&url) {
                builder = builder.header(COOKIE, cookie);
            }

            let response = builder.send().await?;
            let status = response.status();
            self.absorb_cookies(&url, response.headers());

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| BridgeError::InvalidResponse("redirect without location".into()))?;
                url = url.join(location)?;
                debug!(to = %url, "Following redirect");
                continue;
            }

            let body = response.text().await?;
            return Ok(Navigation {
                final_url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Err(BridgeError::TransportError(format!(
            "more than {} redirects from {}",
            MAX_REDIRECTS, path
        )))
    }

    fn storage_state(&self) -> StorageState {
        self.jar.clone()
    }

    fn install(&mut self, state: StorageState) {
        self.jar = state;
    }

    async fn close(&mut self) {
        if self.closed {
            warn!("Transport already closed");
            return;
        }
        self.closed = true;
        info!(base = %self.base, "Transport closed");
    }
}

/// Builds [`HttpTransport`]s from upstream settings.
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    base_url: String,
    timeout: Duration,
    user_agent: String,
}

impl HttpTransportFactory {
    pub fn new(base_url: impl Into<String>, timeout: Duration, user_agent: impl Into<String>) -> Self {
        HttpTransportFactory {
            base_url: base_url.into(),
            timeout,
            user_agent: user_agent.into(),
        }
    }

    pub fn shared(self) -> Arc<dyn TransportFactory> {
        Arc::new(self)
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(&self) -> BridgeResult<Box<dyn Transport>> {
        Ok(Box::new(HttpTransport::new(
            &self.base_url,
            self.timeout,
            &self.user_agent,
        )?))
    }
}

/// Bounds a transport operation. Elapsed time surfaces as a transport error.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> BridgeResult<T>
where
    F: std::future::Future<Output = BridgeResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::TransportError(format!(
            "{} timed out after {}s",
            what,
            limit.as_secs()
        ))),
    }
}

// =============================================================================
// Set-Cookie Parsing
// =============================================================================

/// Parses one `Set-Cookie` header value into a stored cookie.
///
/// `Max-Age` wins over `Expires`. A cookie without `Domain` is scoped to the
/// responding host.
pub fn parse_set_cookie(header: &str, host: &str, now: DateTime<Utc>) -> Option<Cookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie::new(name, value.trim().trim_matches('"'));
    cookie.domain = Some(host.to_string());
    cookie.path = Some("/".to_string());

    let mut max_age: Option<i64> = None;
    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => cookie.domain = Some(val.trim_start_matches('.').to_string()),
            "path" if !val.is_empty() => cookie.path = Some(val.to_string()),
            "expires" => {
                if let Some(at) = parse_cookie_date(val) {
                    cookie.expires = Some(at.timestamp() as f64);
                }
            }
            "max-age" => max_age = val.parse().ok(),
            "httponly" => cookie.http_only = Some(true),
            "secure" => cookie.secure = Some(true),
            "samesite" => cookie.same_site = Some(val.to_string()),
            _ => {}
        }
    }

    if let Some(secs) = max_age {
        cookie.expires = Some((now.timestamp() + secs) as f64);
    }

    Some(cookie)
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        return Some(at.with_timezone(&Utc));
    }
    ["%a, %d-%b-%Y %H:%M:%S GMT", "%a, %d %b %Y %H:%M:%S GMT", "%A, %d-%b-%y %H:%M:%S GMT"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}
