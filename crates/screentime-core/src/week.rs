//! # Day-Config Snapshot
//!
//! The upstream service stores limits and schedules as seven "period
//! configurations" and only accepts the whole week on write. Every mutation
//! therefore follows the same cycle.
//!
//! ## Mutation Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. GET  get-adjusted-time-limits   → WeekConfig::from_response        │
//! │  2.      mutate targeted day(s)     → set_minutes / set_limit_enabled  │
//! │                                       set_schedule_enabled / edge      │
//! │  3. PUT  set-time-limit-v2          ← WeekConfig::to_request           │
//! │  4.      drop the snapshot          (never cached between commands)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each day is kept as the JSON object the dashboard sent and edited in
//! place. A day that is not targeted is written back exactly as it was
//! fetched, absent keys and explicit `null`s included.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::CoreError;
use crate::types::{Day, ScheduleEdge};
use crate::validation::is_valid_time;
use crate::{DEFAULT_SCHEDULE_END, DEFAULT_SCHEDULE_START};

/// Content-limit key the dashboard uses for "all content".
const ALL_CONTENT: &str = "ALL";

/// Minutes reported when a day has limits enabled but no explicit value.
const UNLIMITED_MINUTES: u32 = 1440;

const NAME: &str = "name";
const ENABLED: &str = "enabled";
const TIME: &str = "time";
const TIME_LIMITS: &str = "timeLimits";
const LIMITS_ENABLED: &str = "contentTimeLimitsEnabled";
const LIMITS: &str = "contentTimeLimits";
const CURFEWS: &str = "curfewConfigList";

// =============================================================================
// Period Configuration
// =============================================================================

/// One day's entry in `periodConfigurations`, held as the raw object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodConfiguration(Map<String, Value>);

impl PeriodConfiguration {
    pub fn from_map(map: Map<String, Value>) -> Self {
        PeriodConfiguration(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn name(&self) -> &str {
        self.0.get(NAME).and_then(Value::as_str).unwrap_or_default()
    }

    /// Whether the daily limit applies. Absent or `null` reads as off.
    pub fn enabled(&self) -> bool {
        flag(self.0.get(ENABLED))
    }

    /// Last modification time (epoch millis).
    pub fn time(&self) -> Option<i64> {
        self.0.get(TIME).and_then(Value::as_i64)
    }

    fn time_limits(&self) -> Option<&Map<String, Value>> {
        self.0.get(TIME_LIMITS).and_then(Value::as_object)
    }

    /// First usage window, if the day has one.
    fn curfew(&self) -> Option<&Map<String, Value>> {
        self.0
            .get(CURFEWS)
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(Value::as_object)
    }

    fn touch(&mut self, now_ms: i64) {
        self.0.insert(TIME.to_string(), json!(now_ms));
    }

    /// Edits the `timeLimits` object, replacing a `null` or missing one.
    fn edit_time_limits(&mut self, edit: impl FnOnce(&mut Map<String, Value>)) {
        edit_object(&mut self.0, TIME_LIMITS, edit);
    }

    /// Edits the first usage window, creating a default one when absent.
    fn edit_curfew(&mut self, edit: impl FnOnce(&mut Map<String, Value>)) {
        let slot = self.0.entry(CURFEWS).or_insert(Value::Null);
        let mut list = match slot.take() {
            Value::Array(list) => list,
            _ => Vec::new(),
        };
        let mut window = match list.first_mut().map(Value::take) {
            Some(Value::Object(window)) => window,
            _ => default_window(),
        };
        edit(&mut window);
        if list.is_empty() {
            list.push(Value::Object(window));
        } else {
            list[0] = Value::Object(window);
        }
        *slot = Value::Array(list);
    }
}

fn default_window() -> Map<String, Value> {
    let mut window = Map::new();
    window.insert("start".into(), json!(DEFAULT_SCHEDULE_START));
    window.insert("end".into(), json!(DEFAULT_SCHEDULE_END));
    window.insert(ENABLED.into(), json!(false));
    window.insert("type".into(), Value::Null);
    window
}

fn flag(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

/// Edits `map[key]` as an object, replacing any non-object value in place.
fn edit_object(map: &mut Map<String, Value>, key: &str, edit: impl FnOnce(&mut Map<String, Value>)) {
    let slot = map.entry(key).or_insert(Value::Null);
    let mut inner = match slot.take() {
        Value::Object(inner) => inner,
        _ => Map::new(),
    };
    edit(&mut inner);
    *slot = Value::Object(inner);
}

// =============================================================================
// Read Views
// =============================================================================

/// A day's limit as published to Home Assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyLimit {
    pub day: Day,
    pub enabled: bool,
    /// `None` when content limits are switched off for the day.
    pub minutes: Option<u32>,
}

/// A day's usage window as published to Home Assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySchedule {
    pub day: Day,
    pub enabled: bool,
    pub start: String,
    pub end: String,
}

// =============================================================================
// Week Config
// =============================================================================

/// A full-week snapshot of period configurations.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekConfig {
    days: Vec<PeriodConfiguration>,
}

impl WeekConfig {
    pub fn new(days: Vec<PeriodConfiguration>) -> Self {
        WeekConfig { days }
    }

    /// Parses the `get-adjusted-time-limits` response.
    pub fn from_response(response: &Value) -> Result<Self, CoreError> {
        let list = response
            .get("periodConfigurations")
            .ok_or(CoreError::MissingField("periodConfigurations"))?;
        let days: Vec<PeriodConfiguration> = serde_json::from_value(list.clone())?;
        Ok(WeekConfig { days })
    }

    /// Builds the `set-time-limit-v2` request body.
    pub fn to_request(&self, subject_id: &str) -> Value {
        json!({
            "childDirectedId": subject_id,
            "periodConfigurations": self.days,
        })
    }

    pub fn periods(&self) -> &[PeriodConfiguration] {
        &self.days
    }

    pub fn day(&self, day: Day) -> Option<&PeriodConfiguration> {
        self.days.iter().find(|p| p.name().eq_ignore_ascii_case(day.name()))
    }

    fn day_mut(&mut self, day: Day) -> Result<&mut PeriodConfiguration, CoreError> {
        self.days
            .iter_mut()
            .find(|p| p.name().eq_ignore_ascii_case(day.name()))
            .ok_or(CoreError::DayNotFound(day))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Sets the allowed minutes for each listed day.
    ///
    /// Content limits are switched on for the day as a side effect, matching
    /// what the dashboard does when a value is typed in.
    pub fn set_minutes(&mut self, days: &[Day], minutes: u32, now_ms: i64) -> Result<(), CoreError> {
        // Resolve every day before touching any so a missing one leaves the
        // snapshot unmodified.
        for day in days {
            self.day(*day).ok_or(CoreError::DayNotFound(*day))?;
        }

        for day in days {
            let period = self.day_mut(*day)?;
            period.edit_time_limits(|limits| {
                limits.insert(LIMITS_ENABLED.to_string(), json!(true));
                edit_object(limits, LIMITS, |content| {
                    content.insert(ALL_CONTENT.to_string(), json!(minutes));
                });
            });
            period.touch(now_ms);
        }
        Ok(())
    }

    /// Enables or disables the daily limit for a day.
    pub fn set_limit_enabled(&mut self, day: Day, enabled: bool, now_ms: i64) -> Result<(), CoreError> {
        let period = self.day_mut(day)?;
        period.0.insert(ENABLED.to_string(), json!(enabled));
        period.touch(now_ms);
        Ok(())
    }

    /// Enables or disables a day's usage window.
    pub fn set_schedule_enabled(
        &mut self,
        day: Day,
        enabled: bool,
        now_ms: i64,
    ) -> Result<(), CoreError> {
        let period = self.day_mut(day)?;
        period.edit_curfew(|window| {
            window.insert(ENABLED.to_string(), json!(enabled));
        });
        period.touch(now_ms);
        Ok(())
    }

    /// Moves one end of a day's usage window.
    pub fn set_schedule_edge(
        &mut self,
        day: Day,
        edge: ScheduleEdge,
        value: &str,
        now_ms: i64,
    ) -> Result<(), CoreError> {
        if !is_valid_time(value) {
            return Err(CoreError::InvalidTime(value.to_string()));
        }

        let period = self.day_mut(day)?;
        let key = match edge {
            ScheduleEdge::Start => "start",
            ScheduleEdge::End => "end",
        };
        period.edit_curfew(|window| {
            window.insert(key.to_string(), json!(value));
        });
        period.touch(now_ms);
        Ok(())
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub fn daily_limits(&self) -> Vec<DailyLimit> {
        Day::ALL
            .iter()
            .filter_map(|day| self.day(*day).map(|p| (day, p)))
            .map(|(day, period)| DailyLimit {
                day: *day,
                enabled: period.enabled(),
                minutes: configured_minutes(period),
            })
            .collect()
    }

    pub fn schedules(&self) -> Vec<DailySchedule> {
        Day::ALL
            .iter()
            .filter_map(|day| self.day(*day).map(|p| (day, p)))
            .map(|(day, period)| {
                let curfew = period.curfew();
                let edge = |key: &str, default: &str| {
                    curfew
                        .and_then(|c| c.get(key))
                        .and_then(Value::as_str)
                        .unwrap_or(default)
                        .to_string()
                };
                DailySchedule {
                    day: *day,
                    enabled: flag(curfew.and_then(|c| c.get(ENABLED))),
                    start: edge("start", DEFAULT_SCHEDULE_START),
                    end: edge("end", DEFAULT_SCHEDULE_END),
                }
            })
            .collect()
    }

    /// Minutes allowed on `day`, if a limit applies.
    pub fn limit_for(&self, day: Day) -> Option<u32> {
        self.day(day)
            .filter(|p| p.enabled())
            .and_then(configured_minutes)
    }
}

fn configured_minutes(period: &PeriodConfiguration) -> Option<u32> {
    let limits = period.time_limits()?;
    if !flag(limits.get(LIMITS_ENABLED)) {
        return None;
    }
    Some(
        limits
            .get(LIMITS)
            .and_then(|l| l.get(ALL_CONTENT))
            .and_then(Value::as_f64)
            .map(|m| m.max(0.0) as u32)
            .unwrap_or(UNLIMITED_MINUTES),
    )
}
