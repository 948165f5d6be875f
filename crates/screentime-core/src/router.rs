//! # Topic Router
//!
//! Turns an inbound `(topic, payload)` pair into exactly one [`Command`].
//!
//! ## Grammar
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  <namespace> / <entityClass> / <subject>_<qualifier> / set             │
//! │                                                                         │
//! │  homeassistant/switch/alice_limit_monday/set          ON|OFF           │
//! │  homeassistant/number/alice_minutes_tuesday/set       "90"             │
//! │  homeassistant/number/alice_bulk_school_nights/set    "45.0"           │
//! │  homeassistant/switch/alice_schedule_friday/set       ON|OFF           │
//! │  homeassistant/text/alice_schedule_friday_start/set   "07:30"          │
//! │  homeassistant/button/alice_block/set                 (ignored)        │
//! │  homeassistant/button/alice_unblock/set               (ignored)        │
//! │  homeassistant/number/alice_block_duration/set        "120"            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Parsing is pure. It never blocks and never panics on unexpected input:
//! unknown topics come back as [`RouteError::UnknownTopic`] and bad payloads
//! as [`RouteError::Malformed`].

use crate::discovery::{Entity, EntityClass, Topics};
use crate::error::RouteError;
use crate::types::Command;
use crate::validation::{coerce_minutes, coerce_switch, validate_time};

/// Parses command topics for one subject.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    topics: Topics,
}

impl TopicRouter {
    pub fn new(namespace: impl Into<String>, subject: impl Into<String>) -> Self {
        TopicRouter {
            topics: Topics::new(namespace, subject),
        }
    }

    pub fn from_topics(topics: Topics) -> Self {
        TopicRouter { topics }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Parses a topic/payload pair into a command.
    pub fn parse(&self, topic: &str, payload: &[u8]) -> Result<Command, RouteError> {
        let entity = self.match_topic(topic)?;

        let payload = std::str::from_utf8(payload)
            .map_err(|_| RouteError::malformed(topic, "payload is not UTF-8"))?;

        let command = match entity {
            Entity::Limit(day) => Command::ToggleDailyLimit {
                day,
                enabled: coerce_switch(payload).map_err(|r| RouteError::malformed(topic, r))?,
            },
            Entity::Schedule(day) => Command::ToggleSchedule {
                day,
                enabled: coerce_switch(payload).map_err(|r| RouteError::malformed(topic, r))?,
            },
            Entity::Minutes(day) => Command::SetScreenTime {
                day,
                minutes: coerce_minutes(payload).map_err(|r| RouteError::malformed(topic, r))?,
            },
            Entity::Bulk(scope) => Command::BulkScreenTime {
                scope,
                minutes: coerce_minutes(payload).map_err(|r| RouteError::malformed(topic, r))?,
            },
            Entity::BlockDuration => Command::SetBlockDuration {
                minutes: coerce_minutes(payload).map_err(|r| RouteError::malformed(topic, r))?,
            },
            Entity::ScheduleTime(day, edge) => Command::SetScheduleTime {
                day,
                edge,
                value: validate_time(payload).map_err(|r| RouteError::malformed(topic, r))?,
            },
            Entity::Block => Command::Block,
            Entity::Unblock => Command::Unblock,
            Entity::Usage | Entity::Viewing => {
                return Err(RouteError::UnknownTopic(topic.to_string()))
            }
        };

        Ok(command)
    }

    /// Resolves the entity a `set` topic addresses.
    fn match_topic(&self, topic: &str) -> Result<Entity, RouteError> {
        let unknown = || RouteError::UnknownTopic(topic.to_string());

        let mut segments = topic.split('/');
        let (Some(namespace), Some(class), Some(entity_id), Some(verb), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(unknown());
        };

        if namespace != self.topics.prefix() || verb != "set" {
            return Err(unknown());
        }

        let class: EntityClass = class.parse().map_err(|_| unknown())?;

        let qualifier = entity_id
            .strip_prefix(self.topics.subject())
            .and_then(|rest| rest.strip_prefix('_'))
            .ok_or_else(unknown)?;

        Entity::parse(class, qualifier).ok_or_else(unknown)
    }
}
