//! State publishing toward Home Assistant.
//!
//! The broker is behind [`StatePublisher`] so the dispatcher and the sync
//! loop can be driven without one.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use screentime_core::discovery::EntityClass;
use screentime_core::{Entity, Topics};

use crate::error::BridgeResult;

/// Sink for outbound broker messages. Must not block.
pub trait StatePublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> BridgeResult<()>;
}

/// Discards everything. Used when running without a broker.
pub struct NoOpPublisher;

impl StatePublisher for NoOpPublisher {
    fn publish(&self, _topic: &str, _payload: &str, _retain: bool) -> BridgeResult<()> {
        Ok(())
    }
}

/// Publishes entity states and discovery configs for one subject.
#[derive(Clone)]
pub struct EntityPublisher {
    publisher: Arc<dyn StatePublisher>,
    topics: Topics,
}

impl EntityPublisher {
    pub fn new(publisher: Arc<dyn StatePublisher>, topics: Topics) -> Self {
        EntityPublisher { publisher, topics }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Publishes an entity state. Sensor readings are not retained; every
    /// other state is, so Home Assistant restores controls after a restart.
    /// Failures are logged and swallowed.
    pub fn publish_state(&self, entity: &Entity, payload: &str) {
        let topic = self.topics.state(entity);
        let retain = entity.class() != EntityClass::Sensor;
        match self.publisher.publish(&topic, payload, retain) {
            Ok(()) => debug!(%topic, payload, "State published"),
            Err(e) => warn!(%e, %topic, "Failed to publish state"),
        }
    }

    pub fn publish_json(&self, entity: &Entity, payload: &Value) {
        self.publish_state(entity, &payload.to_string());
    }

    /// Publishes the retained config for every entity. Returns how many
    /// configs were accepted by the broker client.
    pub fn publish_discovery(&self) -> usize {
        let mut published = 0;
        for entity in Entity::all() {
            let topic = self.topics.config(&entity);
            let payload = self.topics.discovery_payload(&entity).to_string();
            match self.publisher.publish(&topic, &payload, true) {
                Ok(()) => published += 1,
                Err(e) => warn!(%e, %topic, "Failed to publish discovery config"),
            }
        }
        debug!(published, "Discovery configs published");
        published
    }
}
