//! # Credential Status Server
//!
//! Local HTTP surface for operators.
//!
//! ```text
//! GET  /health            → "OK"
//! GET  /api/status        → agent + broker status, expiry of the stored credential
//! POST /api/credentials   → validate and replace the stored credential,
//!                           then ask the agent to log in from it
//! POST /api/refresh       → ask the agent to refresh its session
//! ```
//!
//! Both POSTs reach the session task through its handle; nothing here talks
//! to the dashboard directly.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use screentime_bridge::{
    parse_credential, AgentStatus, BridgeAgentHandle, BridgeError, CredentialStore, MqttHandle,
};
use screentime_core::credential::{inspect_expiry, ExpiryReport};

/// Shared state for the handlers.
pub struct StatusState {
    pub store: Arc<dyn CredentialStore>,
    pub agent: BridgeAgentHandle,
    pub broker: Option<MqttHandle>,
    pub critical_cookies: Vec<String>,
    pub expiry_horizon: chrono::Duration,
    /// How long `/api/refresh` waits for the agent before answering 202.
    pub refresh_wait: Duration,
}

impl StatusState {
    async fn stored_expiry(&self) -> Result<ExpiryReport, BridgeError> {
        let report = match self.store.load().await? {
            Some(state) => inspect_expiry(&state, &self.critical_cookies, Utc::now(), self.expiry_horizon),
            None => ExpiryReport::no_session(),
        };
        Ok(report)
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub agent: AgentStatus,
    pub broker: Option<String>,
    pub store: String,
    pub credential: Option<ExpiryReport>,
    pub credential_error: Option<String>,
}

pub fn router(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/credentials", post(upload_handler))
        .route("/api/refresh", post(refresh_handler))
        .with_state(state)
}

/// Handle for stopping a running server.
pub struct StatusServerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl StatusServerHandle {
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Binds and serves until the handle signals shutdown.
pub async fn start(bind_addr: &str, state: Arc<StatusState>) -> anyhow::Result<StatusServerHandle> {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind status server to {}: {}", bind_addr, e))?;
    info!(addr = %bind_addr, "Status server started");

    let app = router(state);
    tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await;
                info!("Status server shutting down");
            })
            .await;
        if let Err(e) = served {
            error!(%e, "Status server failed");
        }
    });

    Ok(StatusServerHandle { shutdown_tx })
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn status_handler(State(state): State<Arc<StatusState>>) -> Json<StatusResponse> {
    let (credential, credential_error) = match state.stored_expiry().await {
        Ok(report) => (Some(report), None),
        Err(e) => (None, Some(e.to_string())),
    };

    let broker = match &state.broker {
        Some(handle) => Some(handle.state().await.to_string()),
        None => None,
    };

    Json(StatusResponse {
        agent: state.agent.status().await,
        broker,
        store: state.store.describe(),
        credential,
        credential_error,
    })
}

async fn upload_handler(
    State(state): State<Arc<StatusState>>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let credential = parse_credential(&body).map_err(|e| {
        warn!(%e, "Rejected credential upload");
        (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
    })?;

    let report = inspect_expiry(&credential, &state.critical_cookies, Utc::now(), state.expiry_horizon);
    if report.expired {
        warn!("Rejected credential upload with expired critical cookies");
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "critical cookies already expired", "credential": report })),
        ));
    }

    state.store.save(&credential).await.map_err(|e| {
        error!(%e, "Failed to store uploaded credential");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() })))
    })?;

    let reloading = match state.agent.reload_credential() {
        Ok(()) => true,
        Err(e) => {
            warn!(%e, "Credential stored but the agent is not running");
            false
        }
    };

    info!(cookies = credential.cookies.len(), reloading, "Credential uploaded");
    Ok(Json(json!({
        "saved": credential.cookies.len(),
        "reloading": reloading,
        "credential": report,
    })))
}

async fn refresh_handler(State(state): State<Arc<StatusState>>) -> (StatusCode, Json<Value>) {
    match tokio::time::timeout(state.refresh_wait, state.agent.refresh()).await {
        Ok(Ok(refreshed)) => {
            info!(refreshed, "Session refresh requested");
            (StatusCode::OK, Json(json!({ "refreshed": refreshed })))
        }
        Ok(Err(e)) => {
            warn!(%e, "Session refresh unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": e.to_string() })))
        }
        Err(_) => (StatusCode::ACCEPTED, Json(json!({ "queued": true }))),
    }
}
