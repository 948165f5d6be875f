//! # Domain Types
//!
//! Core domain types shared by the router, the dispatcher and the sync loop.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Day        │   │   BulkScope     │   │  ScheduleEdge   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Monday         │   │  AllDays        │   │  Start          │       │
//! │  │  ...            │   │  SchoolNights   │   │  End            │       │
//! │  │  Sunday         │   │  Weekend        │   │                 │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                         Command                                 │   │
//! │  │  ToggleDailyLimit │ SetScreenTime │ BulkScreenTime              │   │
//! │  │  ToggleSchedule   │ SetScheduleTime                             │   │
//! │  │  Block │ Unblock  │ SetBlockDuration                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Commands carry absolute values only. A command never refers to the state
//! it replaces, so executing it twice has the same effect as executing it once.

use serde::{Deserialize, Serialize};

// =============================================================================
// Day
// =============================================================================

/// A day of the week as the upstream period configuration names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    /// All days in upstream order.
    pub const ALL: [Day; 7] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
        Day::Sunday,
    ];

    /// Upstream spelling (`"Monday"`).
    pub fn name(&self) -> &'static str {
        match self {
            Day::Monday => "Monday",
            Day::Tuesday => "Tuesday",
            Day::Wednesday => "Wednesday",
            Day::Thursday => "Thursday",
            Day::Friday => "Friday",
            Day::Saturday => "Saturday",
            Day::Sunday => "Sunday",
        }
    }

    /// Topic spelling (`"monday"`).
    pub fn slug(&self) -> &'static str {
        match self {
            Day::Monday => "monday",
            Day::Tuesday => "tuesday",
            Day::Wednesday => "wednesday",
            Day::Thursday => "thursday",
            Day::Friday => "friday",
            Day::Saturday => "saturday",
            Day::Sunday => "sunday",
        }
    }

    /// Converts from chrono's weekday.
    pub fn from_weekday(weekday: chrono::Weekday) -> Self {
        match weekday {
            chrono::Weekday::Mon => Day::Monday,
            chrono::Weekday::Tue => Day::Tuesday,
            chrono::Weekday::Wed => Day::Wednesday,
            chrono::Weekday::Thu => Day::Thursday,
            chrono::Weekday::Fri => Day::Friday,
            chrono::Weekday::Sat => Day::Saturday,
            chrono::Weekday::Sun => Day::Sunday,
        }
    }
}

impl std::fmt::Display for Day {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Day {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monday" | "mon" => Ok(Day::Monday),
            "tuesday" | "tue" => Ok(Day::Tuesday),
            "wednesday" | "wed" => Ok(Day::Wednesday),
            "thursday" | "thu" => Ok(Day::Thursday),
            "friday" | "fri" => Ok(Day::Friday),
            "saturday" | "sat" => Ok(Day::Saturday),
            "sunday" | "sun" => Ok(Day::Sunday),
            other => Err(format!("Unknown day: '{}'", other)),
        }
    }
}

// =============================================================================
// Bulk Scope
// =============================================================================

/// A named group of days that a single minutes value is applied to.
///
/// ## Expansion
/// ```text
/// AllDays       → Mon Tue Wed Thu Fri Sat Sun
/// SchoolNights  → Sun Mon Tue Wed Thu   (nights before a school day)
/// Weekend       → Fri Sat               (nights before a day off)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BulkScope {
    AllDays,
    SchoolNights,
    Weekend,
}

impl BulkScope {
    pub const ALL: [BulkScope; 3] = [BulkScope::AllDays, BulkScope::SchoolNights, BulkScope::Weekend];

    /// Days this scope covers.
    pub fn days(&self) -> &'static [Day] {
        match self {
            BulkScope::AllDays => &Day::ALL,
            BulkScope::SchoolNights => &[
                Day::Sunday,
                Day::Monday,
                Day::Tuesday,
                Day::Wednesday,
                Day::Thursday,
            ],
            BulkScope::Weekend => &[Day::Friday, Day::Saturday],
        }
    }

    /// Topic spelling (`"school_nights"`).
    pub fn slug(&self) -> &'static str {
        match self {
            BulkScope::AllDays => "all_days",
            BulkScope::SchoolNights => "school_nights",
            BulkScope::Weekend => "weekend",
        }
    }

    /// Human label for discovery.
    pub fn label(&self) -> &'static str {
        match self {
            BulkScope::AllDays => "All Days",
            BulkScope::SchoolNights => "School Nights (Sun-Thu)",
            BulkScope::Weekend => "Weekend (Fri-Sat)",
        }
    }
}

impl std::fmt::Display for BulkScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

impl std::str::FromStr for BulkScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all_days" => Ok(BulkScope::AllDays),
            "school_nights" => Ok(BulkScope::SchoolNights),
            "weekend" => Ok(BulkScope::Weekend),
            other => Err(format!("Unknown bulk scope: '{}'", other)),
        }
    }
}

// =============================================================================
// Schedule Edge
// =============================================================================

/// Which end of a day's allowed usage window a time applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleEdge {
    Start,
    End,
}

impl ScheduleEdge {
    pub fn slug(&self) -> &'static str {
        match self {
            ScheduleEdge::Start => "start",
            ScheduleEdge::End => "end",
        }
    }
}

impl std::fmt::Display for ScheduleEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

// =============================================================================
// Command
// =============================================================================

/// A remote command received from Home Assistant.
///
/// Created by the router from a topic/payload pair and consumed exactly once
/// by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Enable or disable the daily limit for one day.
    ToggleDailyLimit { day: Day, enabled: bool },

    /// Set one day's allowed minutes.
    SetScreenTime { day: Day, minutes: u32 },

    /// Set the allowed minutes for every day in a scope.
    BulkScreenTime { scope: BulkScope, minutes: u32 },

    /// Enable or disable one day's usage window.
    ToggleSchedule { day: Day, enabled: bool },

    /// Move one end of a day's usage window (`HH:MM`).
    SetScheduleTime {
        day: Day,
        edge: ScheduleEdge,
        value: String,
    },

    /// Block all devices for the current block duration.
    Block,

    /// Lift an active block.
    Unblock,

    /// Change the duration used by subsequent blocks.
    SetBlockDuration { minutes: u32 },
}

impl Command {
    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ToggleDailyLimit { .. } => "toggle_daily_limit",
            Command::SetScreenTime { .. } => "set_screen_time",
            Command::BulkScreenTime { .. } => "bulk_screen_time",
            Command::ToggleSchedule { .. } => "toggle_schedule",
            Command::SetScheduleTime { .. } => "set_schedule_time",
            Command::Block => "block",
            Command::Unblock => "unblock",
            Command::SetBlockDuration { .. } => "set_block_duration",
        }
    }

    /// True for commands whose failure republishes the pre-command value.
    pub fn is_toggle(&self) -> bool {
        matches!(
            self,
            Command::ToggleDailyLimit { .. } | Command::ToggleSchedule { .. }
        )
    }

    /// True when executing the command needs the upstream service.
    pub fn requires_upstream(&self) -> bool {
        !matches!(self, Command::SetBlockDuration { .. })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::ToggleDailyLimit { day, enabled } => {
                write!(f, "limit {} {}", day, on_off(*enabled))
            }
            Command::SetScreenTime { day, minutes } => write!(f, "minutes {} = {}", day, minutes),
            Command::BulkScreenTime { scope, minutes } => {
                write!(f, "bulk {} = {}", scope, minutes)
            }
            Command::ToggleSchedule { day, enabled } => {
                write!(f, "schedule {} {}", day, on_off(*enabled))
            }
            Command::SetScheduleTime { day, edge, value } => {
                write!(f, "schedule {} {} = {}", day, edge, value)
            }
            Command::Block => write!(f, "block"),
            Command::Unblock => write!(f, "unblock"),
            Command::SetBlockDuration { minutes } => write!(f, "block duration = {}", minutes),
        }
    }
}

/// Canonical switch payload for a flag.
pub fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}
