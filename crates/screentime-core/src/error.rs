//! # Error Types
//!
//! Domain-specific error types for screentime-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  screentime-core errors (this file)                                    │
//! │  ├── RouteError       - Topic/payload could not become a Command       │
//! │  └── CoreError        - Snapshot and payload shape failures            │
//! │                                                                         │
//! │  screentime-bridge errors (separate crate)                             │
//! │  └── BridgeError      - Session, upstream, broker and config failures  │
//! │                                                                         │
//! │  Flow: RouteError → logged and dropped                                 │
//! │        CoreError  → BridgeError::InvalidResponse → logged              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::Day;

// =============================================================================
// Route Error
// =============================================================================

/// Why an inbound topic/payload pair did not produce a Command.
///
/// ## Handling
/// ```text
/// UnknownTopic  → debug log, dropped silently
/// Malformed     → warn log, dropped (never enqueued)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Topic does not match any known entity grammar.
    #[error("Unrecognised topic: {0}")]
    UnknownTopic(String),

    /// Topic is known but the payload cannot be coerced.
    #[error("Malformed command on {topic}: {reason}")]
    Malformed { topic: String, reason: String },
}

impl RouteError {
    /// Returns true when the message should be dropped without a diagnostic.
    pub fn is_silent(&self) -> bool {
        matches!(self, RouteError::UnknownTopic(_))
    }

    pub(crate) fn malformed(topic: &str, reason: impl Into<String>) -> Self {
        RouteError::Malformed {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while reading or mutating upstream payloads.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// The week snapshot has no entry for the requested day.
    ///
    /// ## When This Occurs
    /// - Upstream returned fewer than seven period configurations
    /// - A day was renamed or localised upstream
    #[error("No period configuration for {0}")]
    DayNotFound(Day),

    /// A response lacked an expected top-level field.
    #[error("Missing field in upstream payload: {0}")]
    MissingField(&'static str),

    /// A response field had an unexpected shape.
    #[error("Invalid upstream payload: {0}")]
    InvalidPayload(String),

    /// A schedule time is not `HH:MM`.
    #[error("Invalid time '{0}': expected HH:MM")]
    InvalidTime(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidPayload(err.to_string())
    }
}
