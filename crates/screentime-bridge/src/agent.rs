//! # Bridge Agent
//!
//! The session task. Owns the dashboard session, the dispatcher and the sync
//! loop, and interleaves them on one task so upstream calls never overlap.
//!
//! ## Agent Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          BridgeAgent::run                               │
//! │                                                                         │
//! │  startup:  discovery configs ─► block duration ─► login ─► first sync  │
//! │                                                                         │
//! │  loop select! (biased)                                                 │
//! │    ├─ shutdown            → stop, no further commands                  │
//! │    ├─ request             → reload credential | refresh session        │
//! │    ├─ command tick (1 s)  → Dispatcher::drain(queue)                   │
//! │    └─ sync tick (300 s)   → SyncLoop::run_cycle                        │
//! │                                                                         │
//! │  Every step races the shutdown flag, so a login waiting on an upload   │
//! │  or a long drain is abandoned as soon as shutdown is signalled.        │
//! │                                                                         │
//! │  exit:     close queue ─► SessionManager::shutdown (transport closed   │
//! │            exactly once)                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use screentime_core::{Topics, TopicRouter};

use crate::api::DashboardApi;
use crate::config::BridgeConfig;
use crate::credential_store::{CredentialStore, FileCredentialStore};
use crate::dispatcher::Dispatcher;
use crate::error::{BridgeError, BridgeResult};
use crate::publisher::{EntityPublisher, NoOpPublisher, StatePublisher};
use crate::queue::{command_queue, CommandIngress, CommandQueue, CommandSender};
use crate::session::{AwaitCredentialUpload, LoginFlow, SessionManager, SessionOptions};
use crate::sync_loop::{CycleOutcome, SyncLoop};
use crate::transport::{HttpTransportFactory, TransportFactory};
use crate::upstream::UpstreamClient;

// =============================================================================
// Agent Status
// =============================================================================

/// Snapshot of the agent for external queries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentStatus {
    pub running: bool,
    pub authenticated: bool,
    pub subject_id: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub commands_handled: u64,
}

/// Out-of-band work for the session task.
#[derive(Debug)]
enum AgentRequest {
    /// The stored credential changed; log in again from it.
    ReloadCredential,
    /// Re-validate the live session and report whether it is usable.
    Refresh(oneshot::Sender<bool>),
}

// =============================================================================
// Shutdown
// =============================================================================

/// Resolves once the flag is raised or every sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Runs `work` unless shutdown arrives first. `None` means it was abandoned.
async fn unless_stopped<T>(stop: &mut watch::Receiver<bool>, work: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = stopped(stop) => None,
        out = work => Some(out),
    }
}

// =============================================================================
// Bridge Agent
// =============================================================================

pub struct BridgeAgent {
    api: DashboardApi,
    dispatcher: Dispatcher,
    sync: SyncLoop,
    publisher: EntityPublisher,
    queue: CommandQueue,
    sync_interval: Duration,
    command_poll: Duration,
    status: Arc<RwLock<AgentStatus>>,
    shutdown: watch::Receiver<bool>,
    requests: mpsc::UnboundedReceiver<AgentRequest>,
}

impl BridgeAgent {
    /// Runs until shutdown is signalled or every handle is dropped.
    pub async fn run(mut self) {
        info!(
            subject = %self.publisher.topics().subject(),
            sync_secs = self.sync_interval.as_secs(),
            "Bridge agent starting"
        );
        self.status.write().await.running = true;
        let mut stop = self.shutdown.clone();

        if unless_stopped(&mut stop, self.startup()).await.is_some() {
            self.serve(&mut stop).await;
        } else {
            info!("Bridge agent stopped during startup");
        }

        self.stop().await;
    }

    async fn serve(&mut self, stop: &mut watch::Receiver<bool>) {
        let mut commands = interval(self.command_poll);
        commands.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sync = interval_at(Instant::now() + self.sync_interval, self.sync_interval);
        sync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let finished = tokio::select! {
                biased;

                _ = stopped(stop) => None,

                Some(request) = self.requests.recv() => {
                    unless_stopped(stop, self.handle_request(request)).await
                }

                _ = commands.tick() => {
                    let flag = stop.clone();
                    unless_stopped(stop, self.drain_commands(&flag)).await
                }

                _ = sync.tick() => {
                    unless_stopped(stop, self.sync_once()).await.map(drop)
                }
            };

            if finished.is_none() {
                info!("Bridge agent received shutdown");
                break;
            }
            if unless_stopped(stop, self.reload_if_replaced()).await.is_none() {
                break;
            }
        }
    }

    /// Single pass: startup, one drain of queued commands, then stop.
    pub async fn run_once(mut self) -> CycleOutcome {
        self.status.write().await.running = true;
        let mut stop = self.shutdown.clone();

        let outcome = match unless_stopped(&mut stop, self.startup()).await {
            Some(outcome) => {
                let flag = stop.clone();
                unless_stopped(&mut stop, self.drain_commands(&flag)).await;
                outcome
            }
            None => CycleOutcome::Failed {
                consecutive: self.sync.consecutive_failures(),
            },
        };

        self.stop().await;
        outcome
    }

    async fn startup(&mut self) -> CycleOutcome {
        self.publisher.publish_discovery();
        self.dispatcher.announce_block_duration();

        if let Err(e) = self.api.login().await {
            error!(%e, "Initial login failed");
        }

        self.sync_once().await
    }

    async fn handle_request(&mut self, request: AgentRequest) {
        match request {
            AgentRequest::ReloadCredential => self.reload_credential().await,
            AgentRequest::Refresh(reply) => {
                let refreshed = self.api.session_mut().refresh().await;
                self.record_session().await;
                if reply.send(refreshed).is_err() {
                    info!(refreshed, "Refresh requester went away");
                }
            }
        }
    }

    async fn reload_credential(&mut self) {
        info!("Reloading stored credential");
        match self.api.login().await {
            Ok(()) => info!("Session re-established from stored credential"),
            Err(e) => error!(%e, "Login with reloaded credential failed"),
        }
        self.record_session().await;
    }

    /// Logs in again when a persist found the store rewritten underneath us.
    async fn reload_if_replaced(&mut self) {
        if self.api.session_mut().take_store_changed() {
            self.reload_credential().await;
        }
    }

    async fn drain_commands(&mut self, stop: &watch::Receiver<bool>) {
        let handled = self.dispatcher.drain(&mut self.queue, &mut self.api, stop).await;
        if handled > 0 {
            self.status.write().await.commands_handled += handled as u64;
        }
    }

    async fn sync_once(&mut self) -> CycleOutcome {
        let outcome = self.sync.run_cycle(&mut self.api).await;

        let now = Utc::now();
        let report = self.api.session().check_expiry();
        if report.expired {
            warn!("Session credential has expired, upload a fresh one");
        } else if report.expiring_soon {
            warn!(
                earliest = ?report.earliest_expiry,
                remaining_mins = report.remaining(now).map(|left| left.num_minutes()),
                "Session credential expires soon"
            );
        }

        self.record_session().await;
        let mut status = self.status.write().await;
        status.consecutive_failures = self.sync.consecutive_failures();
        if outcome == CycleOutcome::Synced {
            status.last_sync = Some(now);
        }
        outcome
    }

    async fn record_session(&mut self) {
        let authenticated = self.api.session().is_authenticated();
        let subject_id = self.api.session().subject_id().ok().map(str::to_string);

        let mut status = self.status.write().await;
        status.authenticated = authenticated;
        status.subject_id = subject_id;
    }

    async fn stop(&mut self) {
        self.queue.close();
        self.requests.close();
        self.api.session_mut().shutdown().await;

        let mut status = self.status.write().await;
        status.running = false;
        status.authenticated = false;
        info!("Bridge agent stopped");
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Cloneable control handle for a running [`BridgeAgent`]. Dropping the last
/// handle stops the agent.
#[derive(Clone)]
pub struct BridgeAgentHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    requests: mpsc::UnboundedSender<AgentRequest>,
    sender: CommandSender,
    ingress: CommandIngress,
    status: Arc<RwLock<AgentStatus>>,
}

impl BridgeAgentHandle {
    pub async fn status(&self) -> AgentStatus {
        self.status.read().await.clone()
    }

    /// Producer side of the agent's command queue.
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Broker entry point: parses and enqueues for this agent's subject.
    pub fn ingress(&self) -> CommandIngress {
        self.ingress.clone()
    }

    /// Asks the agent to log in again from the stored credential, e.g. after
    /// an upload. Returns once the request is queued.
    pub fn reload_credential(&self) -> BridgeResult<()> {
        self.requests
            .send(AgentRequest::ReloadCredential)
            .map_err(|_| BridgeError::ChannelError("bridge agent stopped".into()))
    }

    /// Asks the agent to refresh its session and waits for the verdict. The
    /// request stays queued if the caller stops waiting.
    pub async fn refresh(&self) -> BridgeResult<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(AgentRequest::Refresh(reply_tx))
            .map_err(|_| BridgeError::ChannelError("bridge agent stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| BridgeError::ChannelError("bridge agent stopped before refreshing".into()))
    }

    /// Signals the agent to stop. Safe to call after it has stopped.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            warn!("Bridge agent shutdown already requested");
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`BridgeAgent`]. Anything not supplied is derived from the
/// configuration.
pub struct BridgeAgentBuilder {
    config: BridgeConfig,
    publisher: Option<Arc<dyn StatePublisher>>,
    factory: Option<Arc<dyn TransportFactory>>,
    store: Option<Arc<dyn CredentialStore>>,
    login_flow: Option<Arc<dyn LoginFlow>>,
    commands: Option<(CommandSender, CommandQueue)>,
}

impl BridgeAgentBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        BridgeAgentBuilder {
            config,
            publisher: None,
            factory: None,
            store: None,
            login_flow: None,
            commands: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn StatePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_login_flow(mut self, login_flow: Arc<dyn LoginFlow>) -> Self {
        self.login_flow = Some(login_flow);
        self
    }

    /// Uses an existing queue, e.g. one whose sender is already wired to a
    /// broker.
    pub fn with_commands(mut self, sender: CommandSender, queue: CommandQueue) -> Self {
        self.commands = Some((sender, queue));
        self
    }

    /// Topics for the configured subject.
    pub fn topics(&self) -> Topics {
        Topics::new(self.config.mqtt.discovery_prefix.clone(), self.config.subject.name.clone())
    }

    pub fn build(self) -> BridgeResult<(BridgeAgent, BridgeAgentHandle)> {
        self.config.validate()?;
        let topics = self.topics();
        let config = self.config;

        let factory = self.factory.unwrap_or_else(|| {
            HttpTransportFactory::new(
                config.upstream.base_url.clone(),
                config.request_timeout(),
                config.upstream.user_agent.clone(),
            )
            .shared()
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileCredentialStore::new(config.credential_path())));
        let login_flow = self
            .login_flow
            .unwrap_or_else(|| Arc::new(AwaitCredentialUpload::from_config(&config)));
        let publisher = self.publisher.unwrap_or_else(|| Arc::new(NoOpPublisher));
        let (sender, queue) = self.commands.unwrap_or_else(command_queue);

        let session = SessionManager::new(factory, store, login_flow, SessionOptions::from_config(&config))
            .map_err(|e| match e {
                BridgeError::InvalidConfig(_) | BridgeError::InvalidUrl(_) => e,
                other => BridgeError::InvalidConfig(other.to_string()),
            })?;
        let client = UpstreamClient::new(session, config.upstream.csrf_cookie.clone());
        let api = DashboardApi::new(client, config.time_zone()?);

        let entity_publisher = EntityPublisher::new(publisher, topics.clone());
        let (shutdown_tx, shutdown) = watch::channel(false);
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(AgentStatus::default()));

        let agent = BridgeAgent {
            api,
            dispatcher: Dispatcher::new(entity_publisher.clone(), config.sync.default_block_minutes),
            sync: SyncLoop::new(entity_publisher.clone(), config.sync.failure_threshold),
            publisher: entity_publisher,
            queue,
            sync_interval: config.sync_interval(),
            command_poll: config.command_poll(),
            status: status.clone(),
            shutdown,
            requests,
        };

        let handle = BridgeAgentHandle {
            shutdown_tx: Arc::new(shutdown_tx),
            requests: requests_tx,
            ingress: CommandIngress::new(TopicRouter::from_topics(topics), sender.clone()),
            sender,
            status,
        };

        Ok((agent, handle))
    }
}
