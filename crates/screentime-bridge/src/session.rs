//! # Session Manager
//!
//! Owns the dashboard session: login, credential persistence, expiry
//! detection and single-shot refresh.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Session Lifecycle                                │
//! │                                                                         │
//! │  login()                                                               │
//! │   │                                                                     │
//! │   ├─ 1. load stored credential ─► install ─► verify (landing page)     │
//! │   │        │ rejected / absent                                          │
//! │   │        ▼                                                            │
//! │   ├─ 2. LoginFlow::obtain ─► install ─► verify                         │
//! │   │        │ rejected             ──► AuthenticationError               │
//! │   │        ▼                                                            │
//! │   └─ 3. persist, returning the landing page for subject discovery      │
//! │                                                                         │
//! │  refresh()        landing navigation, re-persist on success, bool      │
//! │  persist_if_due() after each successful call, at most every 5 min      │
//! │  persist()        skipped when the stored blob changed behind our back │
//! │  check_expiry()   pure inspection of the critical cookies              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A session is invalidated, never deleted, when expiry is detected. The
//! stored blob stays on disk so an operator can inspect or replace it. A
//! replaced blob is never overwritten by the live jar; the manager raises
//! [`SessionManager::take_store_changed`] instead so the owner can log in
//! again with it.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use screentime_core::credential::{inspect_expiry, ExpiryReport};
use screentime_core::StorageState;

use crate::config::BridgeConfig;
use crate::credential_store::CredentialStore;
use crate::error::{BridgeError, BridgeResult};
use crate::transport::{with_timeout, Navigation, Transport, TransportFactory};

/// URL fragments that mean the dashboard bounced us to sign-in.
const SIGN_IN_MARKERS: [&str; 3] = ["/ap/signin", "/ap/login", "/ap/mfa"];

fn is_sign_in(url: &str) -> bool {
    SIGN_IN_MARKERS.iter().any(|m| url.contains(m))
}

// =============================================================================
// Session
// =============================================================================

/// The live session, owned by the manager.
#[derive(Debug, Clone)]
pub struct Session {
    pub credential: StorageState,
    pub last_persisted: Option<Instant>,
    pub subject_id: Option<String>,
    /// Cleared when expiry or a failed refresh is detected.
    pub valid: bool,
    /// The blob as last read from or written to the store.
    pub stored: Option<StorageState>,
}

/// Session manager settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub landing_path: String,
    pub request_timeout: Duration,
    pub persist_interval: Duration,
    pub expiry_horizon: chrono::Duration,
    pub critical_cookies: Vec<String>,
    pub subject_override: Option<String>,
}

impl SessionOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        SessionOptions {
            landing_path: config.upstream.landing_path.clone(),
            request_timeout: config.request_timeout(),
            persist_interval: config.persist_interval(),
            expiry_horizon: config.expiry_horizon(),
            critical_cookies: config.session.critical_cookies.clone(),
            subject_override: config.subject.id.clone(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

// =============================================================================
// Interactive Login
// =============================================================================

/// Produces a fresh credential when the stored one is unusable.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    /// `rejected` is the credential that just failed verification, if any.
    async fn obtain(
        &self,
        store: &dyn CredentialStore,
        rejected: Option<&StorageState>,
    ) -> BridgeResult<StorageState>;
}

/// Waits for an operator to drop a new credential into the store, either via
/// the status server upload or by replacing the file.
#[derive(Debug, Clone)]
pub struct AwaitCredentialUpload {
    wait: Duration,
    poll: Duration,
}

impl AwaitCredentialUpload {
    pub fn new(wait: Duration, poll: Duration) -> Self {
        AwaitCredentialUpload { wait, poll }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            Duration::from_secs(config.session.login_wait_secs),
            Duration::from_secs(config.session.login_poll_secs.max(1)),
        )
    }
}

#[async_trait]
impl LoginFlow for AwaitCredentialUpload {
    async fn obtain(
        &self,
        store: &dyn CredentialStore,
        rejected: Option<&StorageState>,
    ) -> BridgeResult<StorageState> {
        warn!(
            store = %store.describe(),
            wait_secs = self.wait.as_secs(),
            "Login required: upload a fresh credential"
        );

        let deadline = Instant::now() + self.wait;
        while Instant::now() < deadline {
            tokio::time::sleep(self.poll).await;

            match store.load().await {
                Ok(Some(state)) if !state.is_empty() && Some(&state) != rejected => {
                    info!(cookies = state.cookies.len(), "Fresh credential found");
                    return Ok(state);
                }
                Ok(_) => {}
                Err(e) => debug!(%e, "Credential not readable yet"),
            }
        }

        Err(BridgeError::AuthenticationError(format!(
            "no fresh credential within {}s",
            self.wait.as_secs()
        )))
    }
}

// =============================================================================
// Session Manager
// =============================================================================

pub struct SessionManager {
    transport: Option<Box<dyn Transport>>,
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn CredentialStore>,
    login_flow: Arc<dyn LoginFlow>,
    options: SessionOptions,
    session: Option<Session>,
    store_changed: bool,
}

impl SessionManager {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn CredentialStore>,
        login_flow: Arc<dyn LoginFlow>,
        options: SessionOptions,
    ) -> BridgeResult<Self> {
        let transport = factory.create()?;
        Ok(SessionManager {
            transport: Some(transport),
            factory,
            store,
            login_flow,
            options,
            session: None,
            store_changed: false,
        })
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.valid)
    }

    pub fn subject_id(&self) -> BridgeResult<&str> {
        self.session
            .as_ref()
            .and_then(|s| s.subject_id.as_deref())
            .ok_or(BridgeError::MissingSubject)
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Records the subject found after login.
    pub fn set_subject(&mut self, subject_id: Option<String>) {
        if let Some(session) = self.session.as_mut() {
            session.subject_id = subject_id;
        }
    }

    /// True once if a persist was skipped because the stored blob no longer
    /// matches what this session loaded or wrote.
    pub fn take_store_changed(&mut self) -> bool {
        std::mem::take(&mut self.store_changed)
    }

    /// Value of a cookie in the live credential.
    pub fn credential_cookie(&self, name: &str) -> BridgeResult<Option<String>> {
        let transport = self.transport.as_ref().ok_or(BridgeError::ShuttingDown)?;
        Ok(transport.storage_state().cookie(name).map(|c| c.value.clone()))
    }

    pub(crate) fn transport_mut(&mut self) -> BridgeResult<&mut Box<dyn Transport>> {
        self.transport.as_mut().ok_or(BridgeError::ShuttingDown)
    }

    fn invalidate(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.valid = false;
        }
    }

    // =========================================================================
    // Login
    // =========================================================================

    /// Establishes a verified session from the stored credential, falling
    /// back to the login flow. Returns the landing page so the caller can
    /// discover the subject.
    pub async fn login(&mut self) -> BridgeResult<Navigation> {
        self.store_changed = false;
        let stored = match self.store.load().await {
            Ok(state) => state.filter(|s| !s.is_empty()),
            Err(e) => {
                warn!(%e, store = %self.store.describe(), "Stored credential unreadable");
                None
            }
        };

        let mut verified = None;
        match stored.clone() {
            Some(state) => {
                self.transport_mut()?.install(state.clone());
                match self.verify().await {
                    Ok(nav) => verified = Some((nav, state)),
                    Err(e) => warn!(%e, "Stored credential rejected"),
                }
            }
            None => info!(store = %self.store.describe(), "No stored credential"),
        }

        let (landing, source) = match verified {
            Some(found) => found,
            None => {
                let flow = self.login_flow.clone();
                let fresh = flow
                    .obtain(self.store.as_ref(), stored.as_ref())
                    .await
                    .map_err(|e| match e {
                        BridgeError::AuthenticationError(_) => e,
                        other => BridgeError::AuthenticationError(other.to_string()),
                    })?;
                self.transport_mut()?.install(fresh.clone());
                let nav = self.verify().await.map_err(|e| {
                    BridgeError::AuthenticationError(format!("fresh credential rejected: {}", e))
                })?;
                (nav, fresh)
            }
        };

        let credential = self.transport_mut()?.storage_state();
        self.session = Some(Session {
            credential,
            last_persisted: None,
            subject_id: self.options.subject_override.clone(),
            valid: true,
            stored: Some(source),
        });

        if let Err(e) = self.persist().await {
            error!(%e, "Failed to persist credential after login");
        }

        debug!(landing = %landing.final_url, "Session verified");
        Ok(landing)
    }

    async fn navigate_landing(&mut self) -> BridgeResult<Navigation> {
        let path = self.options.landing_path.clone();
        let limit = self.options.request_timeout;
        let transport = self.transport_mut()?;
        with_timeout(limit, "landing navigation", transport.navigate(&path)).await
    }

    /// Loads the landing page and checks it is an authenticated view.
    async fn verify(&mut self) -> BridgeResult<Navigation> {
        let nav = self.navigate_landing().await?;

        if !nav.is_success() {
            return Err(BridgeError::AuthenticationError(format!(
                "landing page returned {}",
                nav.status
            )));
        }
        if is_sign_in(&nav.final_url) {
            return Err(BridgeError::AuthenticationError("redirected to sign-in".into()));
        }
        if self.check_expiry().expired {
            return Err(BridgeError::AuthenticationError("critical cookies expired".into()));
        }

        Ok(nav)
    }

    // =========================================================================
    // Expiry / Refresh / Persistence
    // =========================================================================

    /// Inspects the critical cookies of the live credential. Read-only.
    pub fn check_expiry(&self) -> ExpiryReport {
        let state = match (&self.transport, &self.session) {
            (Some(transport), _) => transport.storage_state(),
            (None, Some(session)) => session.credential.clone(),
            (None, None) => return ExpiryReport::no_session(),
        };
        inspect_expiry(
            &state,
            &self.options.critical_cookies,
            Utc::now(),
            self.options.expiry_horizon,
        )
    }

    /// Re-validates the session with a landing navigation. Never fails;
    /// the result says whether the session is usable.
    pub async fn refresh(&mut self) -> bool {
        info!("Refreshing session");

        let nav = match self.navigate_landing().await {
            Ok(nav) => nav,
            Err(e) => {
                warn!(%e, "Session refresh navigation failed");
                self.invalidate();
                return false;
            }
        };

        let report = self.check_expiry();
        let ok = nav.is_success() && !is_sign_in(&nav.final_url) && !report.expired;
        if !ok {
            warn!(
                status = nav.status,
                expired = report.expired,
                "Session refresh did not yield a usable session"
            );
            self.invalidate();
            return false;
        }

        if let Err(e) = self.persist().await {
            warn!(%e, "Failed to persist refreshed credential");
        }
        if let Some(session) = self.session.as_mut() {
            session.valid = true;
        }
        if report.expiring_soon {
            warn!(earliest = ?report.earliest_expiry, "Session refreshed but still expiring soon");
        } else {
            info!("Session refreshed");
        }
        true
    }

    /// Writes the live credential to the store, unless the stored blob was
    /// replaced since this session last read or wrote it.
    pub async fn persist(&mut self) -> BridgeResult<()> {
        let state = self.transport_mut()?.storage_state();

        let known = self.session.as_ref().and_then(|s| s.stored.clone());
        if let Some(known) = known {
            let replaced = matches!(
                self.store.load().await,
                Ok(Some(current)) if !current.is_empty() && current != known
            );
            if replaced {
                warn!(store = %self.store.describe(), "Stored credential was replaced, not overwriting it");
                self.store_changed = true;
                if let Some(session) = self.session.as_mut() {
                    session.last_persisted = Some(Instant::now());
                }
                return Ok(());
            }
        }

        self.store.save(&state).await?;
        if let Some(session) = self.session.as_mut() {
            session.credential = state.clone();
            session.stored = Some(state);
            session.last_persisted = Some(Instant::now());
        }
        Ok(())
    }

    /// Persists if the cadence interval has passed since the last write.
    pub async fn persist_if_due(&mut self) {
        let due = match self.session.as_ref() {
            Some(session) => session
                .last_persisted
                .map_or(true, |at| at.elapsed() > self.options.persist_interval),
            None => false,
        };

        if due {
            match self.persist().await {
                Ok(()) => debug!("Cadence persist"),
                Err(e) => warn!(%e, "Cadence persist failed"),
            }
        }
    }

    // =========================================================================
    // Transport Lifecycle
    // =========================================================================

    /// Closes the current transport and creates a fresh one. The session is
    /// invalidated; call [`SessionManager::login`] afterwards.
    pub async fn recreate_transport(&mut self) -> BridgeResult<()> {
        if let Some(mut old) = self.transport.take() {
            old.close().await;
        }
        self.invalidate();
        self.transport = Some(self.factory.create()?);
        info!("Transport recreated");
        Ok(())
    }

    /// Releases the transport. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
            info!("Session closed");
        }
        self.invalidate();
    }
}
