//! In-memory doubles for the dashboard, the credential store and the broker.
//!
//! [`FakeUpstream`] is the controller half: tests script responses on it and
//! read back what the engine sent. Every transport it creates shares the same
//! script, so a recreated transport picks up where the old one left off.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use screentime_core::{Cookie, StorageState};

use crate::credential_store::CredentialStore;
use crate::error::{BridgeError, BridgeResult};
use crate::publisher::StatePublisher;
use crate::session::{AwaitCredentialUpload, SessionManager, SessionOptions};
use crate::transport::{Navigation, RawResponse, Transport, TransportFactory, UpstreamRequest};

pub const DEFAULT_LANDING: &str = "https://parents.amazon.co.uk/intro";

/// A credential whose critical cookies are valid for 30 days.
pub fn fresh_credential() -> StorageState {
    let expires = Utc::now() + chrono::Duration::days(30);
    StorageState::new(vec![
        Cookie::new("ft-session", "session").with_expires(expires),
        Cookie::new("ft-panda-csrf-token", "csrf-token").with_expires(expires),
        Cookie::new("at-acbuk", "access").with_expires(expires),
    ])
}

/// Session manager over `upstream` whose login flow gives up immediately.
pub fn session_manager(upstream: &FakeUpstream, store: Arc<MemoryCredentialStore>) -> SessionManager {
    SessionManager::new(
        upstream.factory(),
        store,
        Arc::new(AwaitCredentialUpload::new(Duration::ZERO, Duration::from_secs(1))),
        SessionOptions::default(),
    )
    .unwrap()
}

// =============================================================================
// Fake Upstream
// =============================================================================

#[derive(Default)]
struct FakeState {
    requests: Vec<UpstreamRequest>,
    responses: VecDeque<BridgeResult<RawResponse>>,
    navigations: VecDeque<BridgeResult<Navigation>>,
    navigate_calls: usize,
    closes: usize,
    created: usize,
}

#[derive(Clone, Default)]
pub struct FakeUpstream {
    state: Arc<Mutex<FakeState>>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status: u16, body: Value) {
        self.respond_raw(status, &body.to_string());
    }

    pub fn respond_raw(&self, status: u16, body: &str) {
        self.state.lock().unwrap().responses.push_back(Ok(RawResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn fail(&self, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push_back(Err(BridgeError::TransportError(reason.to_string())));
    }

    pub fn navigate_to(&self, status: u16, final_url: &str, body: &str) {
        self.state.lock().unwrap().navigations.push_back(Ok(Navigation {
            final_url: final_url.to_string(),
            status,
            body: body.to_string(),
        }));
    }

    pub fn fail_navigation(&self, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .navigations
            .push_back(Err(BridgeError::TransportError(reason.to_string())));
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn navigations(&self) -> usize {
        self.state.lock().unwrap().navigate_calls
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn factory(&self) -> Arc<dyn TransportFactory> {
        Arc::new(self.clone())
    }
}

impl TransportFactory for FakeUpstream {
    fn create(&self) -> BridgeResult<Box<dyn Transport>> {
        self.state.lock().unwrap().created += 1;
        Ok(Box::new(FakeTransport {
            state: self.state.clone(),
            jar: StorageState::default(),
        }))
    }
}

pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
    jar: StorageState,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(&mut self, request: &UpstreamRequest) -> BridgeResult<RawResponse> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        state
            .responses
            .pop_front()
            .unwrap_or_else(|| Err(BridgeError::TransportError("no scripted response".into())))
    }

    async fn navigate(&mut self, _path: &str) -> BridgeResult<Navigation> {
        let mut state = self.state.lock().unwrap();
        state.navigate_calls += 1;
        state.navigations.pop_front().unwrap_or_else(|| {
            Ok(Navigation {
                final_url: DEFAULT_LANDING.to_string(),
                status: 200,
                body: String::new(),
            })
        })
    }

    fn storage_state(&self) -> StorageState {
        self.jar.clone()
    }

    fn install(&mut self, state: StorageState) {
        self.jar = state;
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closes += 1;
    }
}

// =============================================================================
// Memory Credential Store
// =============================================================================

#[derive(Default)]
pub struct MemoryCredentialStore {
    blob: Mutex<Option<StorageState>>,
    saves: Mutex<usize>,
}

impl MemoryCredentialStore {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(state: StorageState) -> Arc<Self> {
        let store = Self::default();
        *store.blob.lock().unwrap() = Some(state);
        Arc::new(store)
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }

    pub fn current(&self) -> Option<StorageState> {
        self.blob.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> BridgeResult<Option<StorageState>> {
        Ok(self.blob.lock().unwrap().clone())
    }

    async fn save(&self, state: &StorageState) -> BridgeResult<()> {
        *self.blob.lock().unwrap() = Some(state.clone());
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// =============================================================================
// Recording Publisher
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<Published> {
        self.messages.lock().unwrap().clone()
    }

    /// Payloads published to `topic`, oldest first.
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload)
            .collect()
    }

    pub fn last(&self, topic: &str) -> Option<String> {
        self.payloads(topic).pop()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl StatePublisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> BridgeResult<()> {
        self.messages.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        });
        Ok(())
    }
}
