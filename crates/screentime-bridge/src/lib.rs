//! # screentime-bridge: Async Engine for the Screen Time Bridge
//!
//! Connects the parental dashboard to Home Assistant over MQTT: pulls usage,
//! limits and schedules on an interval, and pushes commands from Home
//! Assistant back to the dashboard.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Screen Time Bridge Runtime                          │
//! │                                                                         │
//! │   DOMAIN 1: broker callbacks          DOMAIN 2: session task            │
//! │  ┌───────────────────────────┐      ┌───────────────────────────────┐  │
//! │  │  MqttAdapter (rumqttc)    │      │  BridgeAgent                  │  │
//! │  │    Publish on set topic   │      │    ├── Dispatcher             │  │
//! │  │         │                 │      │    ├── SyncLoop               │  │
//! │  │         ▼                 │      │    └── DashboardApi           │  │
//! │  │  CommandIngress           │      │          └── UpstreamClient   │  │
//! │  │    TopicRouter::parse     │      │                └── Session-   │  │
//! │  │    CommandSender ─────────┼──────┼─► CommandQueue     Manager    │  │
//! │  └───────────────────────────┘      │                     │         │  │
//! │                ▲                    │     HttpTransport ◄─┘         │  │
//! │                │ states             │     CredentialStore           │  │
//! │                └────────────────────┼──── EntityPublisher           │  │
//! │                                     └───────────────────────────────┘  │
//! │                                                                         │
//! │  The queue is the only thing both domains touch. Every upstream call   │
//! │  happens on the session task, one at a time.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - `BridgeAgent` session task, handle and builder
//! - [`api`] - Typed dashboard endpoints
//! - [`config`] - TOML configuration with environment overrides
//! - [`credential_store`] - Persisted session credential
//! - [`dispatcher`] - Command execution and state publishing
//! - [`error`] - Bridge error types
//! - [`mqtt`] - Broker adapter
//! - [`publisher`] - State publishing seam
//! - [`queue`] - Command queue and broker ingress
//! - [`session`] - Login, refresh, expiry and persistence
//! - [`sync_loop`] - Periodic state pull
//! - [`transport`] - HTTP channel with its own cookie jar
//! - [`upstream`] - Authenticated calls with refresh-and-retry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use screentime_bridge::{BridgeAgentBuilder, BridgeConfig, MqttAdapter};
//! use screentime_bridge::queue::{command_queue, CommandIngress};
//! use screentime_core::TopicRouter;
//!
//! let config = BridgeConfig::load(None)?;
//! let (sender, queue) = command_queue();
//! let builder = BridgeAgentBuilder::new(config.clone());
//! let ingress = CommandIngress::new(TopicRouter::from_topics(builder.topics()), sender.clone());
//! let (mqtt, publisher) = MqttAdapter::spawn(&config.mqtt, ingress);
//!
//! let (agent, handle) = builder
//!     .with_publisher(publisher)
//!     .with_commands(sender, queue)
//!     .build()?;
//! tokio::spawn(agent.run());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod api;
pub mod config;
pub mod credential_store;
pub mod dispatcher;
pub mod error;
pub mod mqtt;
pub mod publisher;
pub mod queue;
pub mod session;
pub mod sync_loop;
pub mod transport;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AgentStatus, BridgeAgent, BridgeAgentBuilder, BridgeAgentHandle};
pub use api::DashboardApi;
pub use config::BridgeConfig;
pub use credential_store::{parse_credential, CredentialStore, FileCredentialStore};
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{BridgeError, BridgeResult};
pub use mqtt::{BrokerState, MqttAdapter, MqttHandle, MqttPublisher};
pub use publisher::{EntityPublisher, NoOpPublisher, StatePublisher};
pub use queue::{command_queue, CommandIngress, CommandQueue, CommandSender};
pub use session::{AwaitCredentialUpload, LoginFlow, SessionManager, SessionOptions};
pub use sync_loop::{CycleOutcome, SyncLoop};
pub use transport::{HttpTransport, HttpTransportFactory, Transport, TransportFactory};
pub use upstream::UpstreamClient;
