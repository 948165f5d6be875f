//! # MQTT Adapter
//!
//! Broker connection for Home Assistant, built on rumqttc.
//!
//! ## Event Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          MqttAdapter::run                               │
//! │                                                                         │
//! │   ┌──────────────┐  ConnAck   ┌──────────────┐                          │
//! │   │ Disconnected │ ─────────► │  Connected   │ ── subscribe set topics  │
//! │   └──────────────┘            └──────┬───────┘                          │
//! │          ▲                           │ Publish ──► CommandIngress::route │
//! │          │ sleep(next_backoff)       │ poll error                       │
//! │          │                           ▼                                  │
//! │          │                    ┌──────────────┐                          │
//! │          └─────────────────── │   Backoff    │                          │
//! │                               └──────────────┘                          │
//! │                                                                         │
//! │  Outbound states go through MqttPublisher::publish (try_publish),      │
//! │  which never waits on the network.                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::MqttSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::publisher::StatePublisher;
use crate::queue::CommandIngress;

/// Outbound request buffer between publishers and the event loop. Sized to
/// hold the full discovery burst issued before the first connection.
const REQUEST_CAPACITY: usize = 512;

// =============================================================================
// Broker State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Disconnected,
    Connected,
    Backoff,
}

impl std::fmt::Display for BrokerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerState::Disconnected => write!(f, "disconnected"),
            BrokerState::Connected => write!(f, "connected"),
            BrokerState::Backoff => write!(f, "backoff"),
        }
    }
}

/// Builds client options from broker settings.
pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
    options.set_clean_session(true);
    if let Some(username) = &settings.username {
        options.set_credentials(username.clone(), settings.password.clone().unwrap_or_default());
    }
    options
}

// =============================================================================
// Publisher
// =============================================================================

/// [`StatePublisher`] backed by the rumqttc request queue.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        MqttPublisher { client }
    }
}

impl StatePublisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> BridgeResult<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes().to_vec())?;
        Ok(())
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Control handle for a running adapter.
#[derive(Clone)]
pub struct MqttHandle {
    shutdown_tx: mpsc::Sender<()>,
    state: Arc<RwLock<BrokerState>>,
}

impl MqttHandle {
    /// Connection state as last seen by the event loop.
    pub async fn state(&self) -> BrokerState {
        *self.state.read().await
    }

    pub async fn shutdown(&self) -> BridgeResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| BridgeError::ChannelError("MQTT adapter already stopped".into()))
    }
}

// =============================================================================
// Adapter
// =============================================================================

pub struct MqttAdapter {
    client: AsyncClient,
    eventloop: EventLoop,
    ingress: CommandIngress,
    subscriptions: Vec<String>,
    state: Arc<RwLock<BrokerState>>,
    shutdown_rx: mpsc::Receiver<()>,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl MqttAdapter {
    /// Spawns the event loop task. Returns its handle and a publisher that
    /// feeds the same connection.
    pub fn spawn(settings: &MqttSettings, ingress: CommandIngress) -> (MqttHandle, Arc<MqttPublisher>) {
        let (client, eventloop) = AsyncClient::new(mqtt_options(settings), REQUEST_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let state = Arc::new(RwLock::new(BrokerState::Disconnected));
        let subscriptions = ingress.router().topics().command_topics();

        let adapter = MqttAdapter {
            client: client.clone(),
            eventloop,
            ingress,
            subscriptions,
            state: state.clone(),
            shutdown_rx,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
        };

        info!(host = %settings.host, port = settings.port, "MQTT adapter starting");
        tokio::spawn(adapter.run());

        (MqttHandle { shutdown_tx, state }, Arc::new(MqttPublisher::new(client)))
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    async fn run(mut self) {
        let mut backoff = self.create_backoff();

        loop {
            tokio::select! {
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(code = ?ack.code, "Connected to broker");
                        *self.state.write().await = BrokerState::Connected;
                        backoff.reset();
                        self.subscribe();
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.ingress.route(&publish.topic, &publish.payload);
                    }
                    Ok(other) => {
                        debug!(event = ?other, "MQTT event");
                    }
                    Err(e) => {
                        *self.state.write().await = BrokerState::Backoff;
                        let Some(delay) = backoff.next_backoff() else {
                            error!("Broker backoff exhausted");
                            break;
                        };
                        warn!(%e, ?delay, "Broker connection lost, retrying");

                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.shutdown_rx.recv() => {
                                info!("Shutdown during broker backoff");
                                break;
                            }
                        }
                    }
                },

                _ = self.shutdown_rx.recv() => {
                    info!("MQTT adapter received shutdown");
                    if let Err(e) = self.client.try_disconnect() {
                        debug!(%e, "Disconnect request not queued");
                    }
                    break;
                }
            }
        }

        *self.state.write().await = BrokerState::Disconnected;
        info!("MQTT adapter stopped");
    }

    fn subscribe(&self) {
        let filters = self
            .subscriptions
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtLeastOnce));

        match self.client.try_subscribe_many(filters) {
            Ok(()) => info!(topics = self.subscriptions.len(), "Subscribed to command topics"),
            Err(e) => error!(%e, "Failed to subscribe to command topics"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_settings() {
        let settings = MqttSettings {
            host: "broker.lan".into(),
            port: 1884,
            username: Some("ha".into()),
            password: Some("secret".into()),
            keep_alive_secs: 45,
            ..Default::default()
        };
        let options = mqtt_options(&settings);

        assert_eq!(options.broker_address(), ("broker.lan".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(45));
        assert_eq!(options.client_id(), "screentime-bridge");
        assert_eq!(options.credentials(), Some(("ha".to_string(), "secret".to_string())));
    }

    #[test]
    fn test_publisher_fails_once_loop_is_gone() {
        let (client, eventloop) = AsyncClient::new(mqtt_options(&MqttSettings::default()), 8);
        let publisher = MqttPublisher::new(client);

        assert!(publisher.publish("a/b/state", "ON", true).is_ok());

        drop(eventloop);
        let err = publisher.publish("a/b/state", "OFF", true).unwrap_err();
        assert!(matches!(err, BridgeError::MqttError(_)));
    }

    #[tokio::test]
    async fn test_handle_tracks_unreachable_broker() {
        let settings = MqttSettings {
            host: "127.0.0.1".into(),
            port: 1,
            initial_backoff_ms: 10,
            ..Default::default()
        };
        let (sender, _queue) = crate::queue::command_queue();
        let ingress = CommandIngress::new(screentime_core::TopicRouter::new("homeassistant", "kid"), sender);
        let (handle, _publisher) = MqttAdapter::spawn(&settings, ingress);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.state().await, BrokerState::Backoff);

        handle.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.state().await, BrokerState::Disconnected);
    }

    #[test]
    fn test_broker_state_display() {
        assert_eq!(BrokerState::Backoff.to_string(), "backoff");
        assert_eq!(BrokerState::Connected.to_string(), "connected");
    }
}
