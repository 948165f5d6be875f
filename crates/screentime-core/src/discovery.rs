//! # Home Assistant Discovery
//!
//! Entity descriptors, topic naming and retained discovery payloads.
//!
//! ## Topic Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   {prefix}/{class}/{subject}_{qualifier}/{config | state | set}         │
//! │                                                                         │
//! │   class     qualifier                      device group                │
//! │   ───────   ─────────────────────────────  ──────────────              │
//! │   sensor    usage, viewing                 monitoring                  │
//! │   switch    limit_{day}                    limits                      │
//! │   number    minutes_{day}, bulk_{scope}    limits                      │
//! │   switch    schedule_{day}                 schedules                   │
//! │   text      schedule_{day}_{start|end}     schedules                   │
//! │   button    block, unblock                 actions                     │
//! │   number    block_duration                 actions                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::{json, Value};

use crate::types::{BulkScope, Day, ScheduleEdge};
use crate::validation::TIME_PATTERN;
use crate::{MAX_BLOCK_MINUTES, MAX_DAILY_MINUTES, MIN_BLOCK_MINUTES};

const MANUFACTURER: &str = "Amazon Parental Dashboard";

// =============================================================================
// Entity Class
// =============================================================================

/// Home Assistant component type of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityClass {
    Sensor,
    Switch,
    Number,
    Text,
    Button,
}

impl EntityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::Sensor => "sensor",
            EntityClass::Switch => "switch",
            EntityClass::Number => "number",
            EntityClass::Text => "text",
            EntityClass::Button => "button",
        }
    }

    /// Whether entities of this class accept commands.
    pub fn accepts_commands(&self) -> bool {
        !matches!(self, EntityClass::Sensor)
    }
}

impl std::fmt::Display for EntityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensor" => Ok(EntityClass::Sensor),
            "switch" => Ok(EntityClass::Switch),
            "number" => Ok(EntityClass::Number),
            "text" => Ok(EntityClass::Text),
            "button" => Ok(EntityClass::Button),
            other => Err(format!("Unknown entity class: '{}'", other)),
        }
    }
}

// =============================================================================
// Entity
// =============================================================================

/// Every entity the bridge exposes for one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Usage,
    Viewing,
    Limit(Day),
    Minutes(Day),
    Bulk(BulkScope),
    Schedule(Day),
    ScheduleTime(Day, ScheduleEdge),
    Block,
    Unblock,
    BlockDuration,
}

impl Entity {
    /// Every entity in discovery order.
    pub fn all() -> Vec<Entity> {
        let mut entities = vec![Entity::Usage, Entity::Viewing];
        for day in Day::ALL {
            entities.push(Entity::Limit(day));
            entities.push(Entity::Minutes(day));
        }
        entities.extend(BulkScope::ALL.iter().map(|s| Entity::Bulk(*s)));
        for day in Day::ALL {
            entities.push(Entity::Schedule(day));
            entities.push(Entity::ScheduleTime(day, ScheduleEdge::Start));
            entities.push(Entity::ScheduleTime(day, ScheduleEdge::End));
        }
        entities.extend([Entity::Block, Entity::Unblock, Entity::BlockDuration]);
        entities
    }

    pub fn class(&self) -> EntityClass {
        match self {
            Entity::Usage | Entity::Viewing => EntityClass::Sensor,
            Entity::Limit(_) | Entity::Schedule(_) => EntityClass::Switch,
            Entity::Minutes(_) | Entity::Bulk(_) | Entity::BlockDuration => EntityClass::Number,
            Entity::ScheduleTime(..) => EntityClass::Text,
            Entity::Block | Entity::Unblock => EntityClass::Button,
        }
    }

    /// Part of the entity id after `{subject}_`.
    pub fn qualifier(&self) -> String {
        match self {
            Entity::Usage => "usage".to_string(),
            Entity::Viewing => "viewing".to_string(),
            Entity::Limit(day) => format!("limit_{}", day.slug()),
            Entity::Minutes(day) => format!("minutes_{}", day.slug()),
            Entity::Bulk(scope) => format!("bulk_{}", scope.slug()),
            Entity::Schedule(day) => format!("schedule_{}", day.slug()),
            Entity::ScheduleTime(day, edge) => format!("schedule_{}_{}", day.slug(), edge.slug()),
            Entity::Block => "block".to_string(),
            Entity::Unblock => "unblock".to_string(),
            Entity::BlockDuration => "block_duration".to_string(),
        }
    }

    /// Resolves an entity from its class and qualifier.
    ///
    /// Returns `None` for any combination the bridge does not expose, which
    /// includes a valid qualifier under the wrong class.
    pub fn parse(class: EntityClass, qualifier: &str) -> Option<Entity> {
        let entity = match qualifier {
            "usage" => Entity::Usage,
            "viewing" => Entity::Viewing,
            "block" => Entity::Block,
            "unblock" => Entity::Unblock,
            "block_duration" => Entity::BlockDuration,
            q => {
                if let Some(day) = q.strip_prefix("limit_") {
                    Entity::Limit(day.parse().ok()?)
                } else if let Some(day) = q.strip_prefix("minutes_") {
                    Entity::Minutes(day.parse().ok()?)
                } else if let Some(scope) = q.strip_prefix("bulk_") {
                    Entity::Bulk(scope.parse().ok()?)
                } else if let Some(rest) = q.strip_prefix("schedule_") {
                    match rest.split_once('_') {
                        Some((day, "start")) => {
                            Entity::ScheduleTime(parse_day_slug(day)?, ScheduleEdge::Start)
                        }
                        Some((day, "end")) => {
                            Entity::ScheduleTime(parse_day_slug(day)?, ScheduleEdge::End)
                        }
                        Some(_) => return None,
                        None => Entity::Schedule(parse_day_slug(rest)?),
                    }
                } else {
                    return None;
                }
            }
        };

        // Topic spelling is strict: `limit_Monday` or `limit_mon` are not ours.
        (entity.class() == class && entity.qualifier() == qualifier).then_some(entity)
    }

    /// Device group the entity is listed under.
    fn device_group(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Entity::Usage | Entity::Viewing => ("monitoring", "Monitoring", "Screen Time"),
            Entity::Limit(_) | Entity::Minutes(_) | Entity::Bulk(_) => {
                ("limits", "Daily Limits", "Screen Time Limits")
            }
            Entity::Schedule(_) | Entity::ScheduleTime(..) => {
                ("schedules", "Schedules (Curfew)", "Usage Schedules")
            }
            Entity::Block | Entity::Unblock | Entity::BlockDuration => {
                ("actions", "Quick Actions", "Device Control")
            }
        }
    }
}

fn parse_day_slug(slug: &str) -> Option<Day> {
    Day::ALL.into_iter().find(|d| d.slug() == slug)
}

// =============================================================================
// Topics
// =============================================================================

/// Topic builder for one subject under one discovery prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    subject: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>, subject: impl Into<String>) -> Self {
        Topics {
            prefix: prefix.into(),
            subject: subject.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    fn topic(&self, entity: &Entity, verb: &str) -> String {
        format!(
            "{}/{}/{}_{}/{}",
            self.prefix,
            entity.class(),
            self.subject,
            entity.qualifier(),
            verb
        )
    }

    pub fn config(&self, entity: &Entity) -> String {
        self.topic(entity, "config")
    }

    pub fn state(&self, entity: &Entity) -> String {
        self.topic(entity, "state")
    }

    pub fn command(&self, entity: &Entity) -> String {
        self.topic(entity, "set")
    }

    /// Every `set` topic the bridge subscribes to.
    pub fn command_topics(&self) -> Vec<String> {
        Entity::all()
            .iter()
            .filter(|e| e.class().accepts_commands())
            .map(|e| self.command(e))
            .collect()
    }

    /// Builds the retained discovery payload for an entity.
    pub fn discovery_payload(&self, entity: &Entity) -> Value {
        let (group, group_name, model) = entity.device_group();
        let mut config = json!({
            "name": display_name(entity),
            "unique_id": format!("{}_{}", self.subject, entity.qualifier()),
            "icon": icon(entity),
            "device": {
                "identifiers": [format!("parental_control_{}_{}", self.subject, group)],
                "name": format!("{} - {}", title_case(&self.subject), group_name),
                "manufacturer": MANUFACTURER,
                "model": model,
            },
        });

        let fields = match entity {
            Entity::Usage => json!({
                "state_topic": self.state(entity),
                "unit_of_measurement": "min",
                "value_template": "{{ value_json.today_minutes }}",
                "json_attributes_topic": self.state(entity),
            }),
            Entity::Viewing => json!({
                "state_topic": self.state(entity),
                "value_template": "{{ value_json.content_title }}",
                "json_attributes_topic": self.state(entity),
            }),
            Entity::Limit(_) | Entity::Schedule(_) => json!({
                "state_topic": self.state(entity),
                "command_topic": self.command(entity),
                "payload_on": "ON",
                "payload_off": "OFF",
            }),
            Entity::Minutes(_) | Entity::Bulk(_) => json!({
                "state_topic": self.state(entity),
                "command_topic": self.command(entity),
                "min": 0,
                "max": MAX_DAILY_MINUTES,
                "step": 15,
                "unit_of_measurement": "min",
            }),
            Entity::BlockDuration => json!({
                "state_topic": self.state(entity),
                "command_topic": self.command(entity),
                "min": MIN_BLOCK_MINUTES,
                "max": MAX_BLOCK_MINUTES,
                "step": 5,
                "unit_of_measurement": "min",
            }),
            Entity::ScheduleTime(..) => json!({
                "state_topic": self.state(entity),
                "command_topic": self.command(entity),
                "pattern": TIME_PATTERN,
            }),
            Entity::Block | Entity::Unblock => json!({
                "command_topic": self.command(entity),
                "payload_press": "PRESS",
            }),
        };

        if let (Value::Object(target), Value::Object(extra)) = (&mut config, fields) {
            target.extend(extra);
        }
        config
    }
}

fn display_name(entity: &Entity) -> String {
    match entity {
        Entity::Usage => "Screen Time Today".to_string(),
        Entity::Viewing => "Recent Viewing".to_string(),
        Entity::Limit(day) | Entity::Schedule(day) => format!("{} - Enabled", day),
        Entity::Minutes(day) => format!("{} - Minutes", day),
        Entity::Bulk(scope) => format!("Set {}", scope.label()),
        Entity::ScheduleTime(day, ScheduleEdge::Start) => format!("{} - Start", day),
        Entity::ScheduleTime(day, ScheduleEdge::End) => format!("{} - End", day),
        Entity::Block => "Block Now".to_string(),
        Entity::Unblock => "Unblock Now".to_string(),
        Entity::BlockDuration => "Block Duration".to_string(),
    }
}

fn icon(entity: &Entity) -> &'static str {
    match entity {
        Entity::Usage => "mdi:chart-timeline-variant",
        Entity::Viewing => "mdi:television-play",
        Entity::Limit(_) => "mdi:timer-outline",
        Entity::Minutes(_) => "mdi:clock-time-four-outline",
        Entity::Bulk(_) => "mdi:playlist-edit",
        Entity::Schedule(_) => "mdi:calendar-clock",
        Entity::ScheduleTime(_, ScheduleEdge::Start) => "mdi:clock-start",
        Entity::ScheduleTime(_, ScheduleEdge::End) => "mdi:clock-end",
        Entity::Block => "mdi:cancel",
        Entity::Unblock => "mdi:lock-open-check",
        Entity::BlockDuration => "mdi:timer-sand",
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_layout() {
        let topics = Topics::new("homeassistant", "alice");
        assert_eq!(
            topics.state(&Entity::Limit(Day::Monday)),
            "homeassistant/switch/alice_limit_monday/state"
        );
        assert_eq!(
            topics.command(&Entity::ScheduleTime(Day::Friday, ScheduleEdge::End)),
            "homeassistant/text/alice_schedule_friday_end/set"
        );
        assert_eq!(
            topics.config(&Entity::Bulk(BulkScope::SchoolNights)),
            "homeassistant/number/alice_bulk_school_nights/config"
        );
    }

    #[test]
    fn test_entity_parse_roundtrip() {
        for entity in Entity::all() {
            assert_eq!(
                Entity::parse(entity.class(), &entity.qualifier()),
                Some(entity),
                "{:?}",
                entity
            );
        }
    }

    #[test]
    fn test_entity_parse_rejects_wrong_class() {
        assert_eq!(Entity::parse(EntityClass::Number, "limit_monday"), None);
        assert_eq!(Entity::parse(EntityClass::Switch, "block"), None);
        assert_eq!(Entity::parse(EntityClass::Text, "schedule_monday"), None);
        assert_eq!(Entity::parse(EntityClass::Text, "schedule_monday_middle"), None);
        assert_eq!(Entity::parse(EntityClass::Switch, "limit_mon"), None);
    }

    #[test]
    fn test_command_topics_cover_actuators() {
        let topics = Topics::new("homeassistant", "alice");
        let commands = topics.command_topics();
        // 7 limits + 7 minutes + 3 bulk + 7 schedules + 14 times + block, unblock, duration
        assert_eq!(commands.len(), 41);
        assert!(commands.iter().all(|t| t.ends_with("/set")));
        assert!(!commands.iter().any(|t| t.contains("/sensor/")));
    }

    #[test]
    fn test_discovery_payload_shape() {
        let topics = Topics::new("homeassistant", "alice");

        let minutes = topics.discovery_payload(&Entity::Minutes(Day::Tuesday));
        assert_eq!(minutes["unique_id"], "alice_minutes_tuesday");
        assert_eq!(minutes["max"], 480);
        assert_eq!(minutes["command_topic"], "homeassistant/number/alice_minutes_tuesday/set");
        assert_eq!(minutes["device"]["identifiers"][0], "parental_control_alice_limits");
        assert_eq!(minutes["device"]["name"], "Alice - Daily Limits");

        let block = topics.discovery_payload(&Entity::Block);
        assert_eq!(block["payload_press"], "PRESS");
        assert!(block.get("state_topic").is_none());

        let start = topics.discovery_payload(&Entity::ScheduleTime(Day::Monday, ScheduleEdge::Start));
        assert_eq!(start["pattern"], TIME_PATTERN);
    }
}
