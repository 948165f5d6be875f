//! # Upstream Client
//!
//! Single entry point for authenticated dashboard calls.
//!
//! ## Call Flow
//! ```text
//! call(method, endpoint, payload)
//!   │
//!   ├─ attach CSRF token (POST/PUT only, from the credential cookie)
//!   ├─ send (bounded by request timeout)
//!   │
//!   ├─ 200 ──────────► parse body ({} if empty) ─► persist_if_due ─► Ok
//!   ├─ 401 ──────────► refresh() ─┬─ false ─► AuthenticationFailed
//!   │                             └─ true ──► retry once
//!   │                                          ├─ 200 ─► Ok
//!   │                                          └─ any ─► AuthenticationFailed
//!   └─ other ────────► UpstreamError{status, body_excerpt}
//! ```

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::session::SessionManager;
use crate::transport::{with_timeout, Method, RawResponse, UpstreamRequest};

const STATUS_OK: u16 = 200;
const STATUS_UNAUTHORIZED: u16 = 401;

pub struct UpstreamClient {
    session: SessionManager,
    csrf_cookie: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(session: SessionManager, csrf_cookie: impl Into<String>) -> Self {
        let timeout = session.options().request_timeout;
        UpstreamClient {
            session,
            csrf_cookie: csrf_cookie.into(),
            timeout,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager {
        &mut self.session
    }

    /// Performs one authenticated call, refreshing the session at most once.
    pub async fn call(
        &mut self,
        method: Method,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> BridgeResult<Value> {
        let response = self.send(method, endpoint, payload).await?;

        match response.status {
            STATUS_OK => self.accept(response).await,
            STATUS_UNAUTHORIZED => {
                warn!(%method, endpoint, "Upstream rejected session, refreshing");
                if !self.session.refresh().await {
                    return Err(BridgeError::AuthenticationFailed {
                        endpoint: endpoint.to_string(),
                    });
                }

                let retry = self.send(method, endpoint, payload).await?;
                if retry.status == STATUS_OK {
                    self.accept(retry).await
                } else {
                    warn!(%method, endpoint, status = retry.status, "Retry after refresh rejected");
                    Err(BridgeError::AuthenticationFailed {
                        endpoint: endpoint.to_string(),
                    })
                }
            }
            status => Err(BridgeError::upstream(status, &response.body)),
        }
    }

    fn build(&self, method: Method, endpoint: &str, payload: Option<&Value>) -> BridgeResult<UpstreamRequest> {
        let csrf_token = if method.is_mutating() {
            let token = self
                .session
                .credential_cookie(&self.csrf_cookie)?
                .filter(|t| !t.is_empty());
            if token.is_none() {
                let advisory = BridgeError::MissingCsrfToken(self.csrf_cookie.clone());
                warn!(%advisory, endpoint, "Sending mutating call without CSRF token");
            }
            token
        } else {
            None
        };

        Ok(UpstreamRequest {
            method,
            path: endpoint.to_string(),
            body: payload.cloned(),
            csrf_token,
        })
    }

    async fn send(&mut self, method: Method, endpoint: &str, payload: Option<&Value>) -> BridgeResult<RawResponse> {
        let request = self.build(method, endpoint, payload)?;
        let limit = self.timeout;
        let transport = self.session.transport_mut()?;
        with_timeout(limit, endpoint, transport.request(&request)).await
    }

    async fn accept(&mut self, response: RawResponse) -> BridgeResult<Value> {
        let body = parse_body(&response.body);
        self.session.persist_if_due().await;
        Ok(body)
    }
}

/// Parses a success body. Empty or non-JSON bodies are the empty object.
fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            debug!(%e, "Success body is not JSON");
            Value::Object(Default::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fresh_credential, session_manager, FakeUpstream, MemoryCredentialStore};
    use serde_json::json;

    async fn client(upstream: &FakeUpstream) -> UpstreamClient {
        upstream.navigate_to(200, "https://parents.amazon.co.uk/intro?childDirectedId=kid", "");
        let mut session = session_manager(upstream, MemoryCredentialStore::with(fresh_credential()));
        session.login().await.unwrap();
        UpstreamClient::new(session, "ft-panda-csrf-token")
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), json!({}));
        assert_eq!(parse_body("not json"), json!({}));
        assert_eq!(parse_body(r#"{"a":1}"#), json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn test_success_and_csrf_on_mutating_only() {
        let upstream = FakeUpstream::new();
        let mut client = client(&upstream).await;
        upstream.respond(200, json!({ "ok": true }));
        upstream.respond_raw(200, "");

        let body = client.call(Method::Get, "/ajax/a", None).await.unwrap();
        assert_eq!(body, json!({ "ok": true }));
        let body = client.call(Method::Put, "/ajax/b", Some(&json!({ "x": 1 }))).await.unwrap();
        assert_eq!(body, json!({}));

        let requests = upstream.requests();
        assert_eq!(requests[0].csrf_token, None);
        assert_eq!(requests[1].csrf_token.as_deref(), Some("csrf-token"));
        assert_eq!(requests[1].body, Some(json!({ "x": 1 })));
    }

    #[tokio::test]
    async fn test_missing_csrf_still_sends() {
        let upstream = FakeUpstream::new();
        let mut client = client(&upstream).await;
        client
            .session_mut()
            .transport_mut()
            .unwrap()
            .install(screentime_core::StorageState::new(vec![screentime_core::Cookie::new("ft-session", "s")]));
        upstream.respond(200, json!({}));

        client.call(Method::Post, "/ajax/c", None).await.unwrap();
        assert_eq!(upstream.requests()[0].csrf_token, None);
    }

    #[tokio::test]
    async fn test_401_refreshes_once_and_retries() {
        let upstream = FakeUpstream::new();
        let mut client = client(&upstream).await;
        upstream.respond(401, json!({}));
        upstream.respond(200, json!({ "done": 1 }));

        let body = client.call(Method::Put, "/ajax/set", Some(&json!({}))).await.unwrap();
        assert_eq!(body, json!({ "done": 1 }));
        assert_eq!(upstream.navigations(), 2);

        let requests = upstream.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
    }

    #[tokio::test]
    async fn test_two_401s_fail_without_more_retries() {
        let upstream = FakeUpstream::new();
        let mut client = client(&upstream).await;
        upstream.respond(401, json!({}));
        upstream.respond(401, json!({}));
        upstream.respond(200, json!({}));

        let err = client.call(Method::Put, "/ajax/set", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::AuthenticationFailed { ref endpoint } if endpoint == "/ajax/set"));
        assert_eq!(upstream.navigations(), 2);
        assert_eq!(upstream.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_401_with_failed_refresh() {
        let upstream = FakeUpstream::new();
        let mut client = client(&upstream).await;
        upstream.respond(401, json!({}));
        upstream.fail_navigation("reset");

        let err = client.call(Method::Get, "/ajax/a", None).await.unwrap_err();
        assert!(err.is_auth_error());
        assert_eq!(upstream.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_other_status_no_retry() {
        let upstream = FakeUpstream::new();
        let mut client = client(&upstream).await;
        upstream.respond_raw(503, "busy");

        let err = client.call(Method::Get, "/ajax/a", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::UpstreamError { status: 503, ref body_excerpt } if body_excerpt == "busy"));
        assert_eq!(upstream.requests().len(), 1);
        assert_eq!(upstream.navigations(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_no_retry() {
        let upstream = FakeUpstream::new();
        let mut client = client(&upstream).await;
        upstream.fail("connection reset");

        let err = client.call(Method::Get, "/ajax/a", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::TransportError(_)));
        assert_eq!(upstream.requests().len(), 1);
    }
}
