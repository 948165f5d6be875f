//! # screentime-core: Pure Domain Logic for the Screen Time Bridge
//!
//! This crate holds everything the bridge knows about its domain that can be
//! expressed without touching the network, the broker or the file system.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Screen Time Bridge Architecture                     │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                Home Assistant (MQTT discovery)                  │   │
//! │  │   sensors ◄── state topics        set topics ──► actuators      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ MQTT                                   │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              screentime-bridge (async engine)                   │   │
//! │  │   router ─► queue ─► dispatcher ─► upstream client ─► session   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ screentime-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────────┐  │   │
//! │  │   │  types   │ │  router  │ │   week   │ │    credential    │  │   │
//! │  │   │ Command  │ │  topic   │ │ snapshot │ │ cookies, expiry  │  │   │
//! │  │   │ Day      │ │ grammar  │ │ mutation │ │                  │  │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────────────┘  │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐                       │   │
//! │  │   │ activity │ │discovery │ │ subject  │                       │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘                       │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO CLOCK • PURE FUNCTIONS               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Days, bulk scopes, schedule edges and the [`Command`] union
//! - [`router`] - Topic grammar and payload coercion
//! - [`week`] - Day-config snapshot model and its mutations
//! - [`credential`] - Stored cookies and expiry inspection
//! - [`activity`] - Usage and viewing summaries from activity aggregates
//! - [`discovery`] - Home Assistant entity descriptors and topics
//! - [`subject`] - Subject identifier extraction from URLs and pages
//! - [`validation`] - Payload validators
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use screentime_core::router::TopicRouter;
//! use screentime_core::{Command, Day};
//!
//! let router = TopicRouter::new("homeassistant", "alice");
//! let command = router
//!     .parse("homeassistant/number/alice_minutes_tuesday/set", b"90")
//!     .unwrap();
//!
//! assert_eq!(command, Command::SetScreenTime { day: Day::Tuesday, minutes: 90 });
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod activity;
pub mod credential;
pub mod discovery;
pub mod error;
pub mod router;
pub mod subject;
pub mod types;
pub mod validation;
pub mod week;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use credential::{Cookie, ExpiryReport, StorageState};
pub use discovery::{Entity, EntityClass, Topics};
pub use error::{CoreError, RouteError};
pub use router::TopicRouter;
pub use types::*;
pub use week::WeekConfig;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default Home Assistant discovery prefix.
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// Upper bound for a daily minutes entity (8 hours).
pub const MAX_DAILY_MINUTES: u32 = 480;

/// Block duration bounds (minutes) advertised to Home Assistant.
pub const MIN_BLOCK_MINUTES: u32 = 5;
pub const MAX_BLOCK_MINUTES: u32 = 720;

/// Block duration used until the first `SetBlockDuration` arrives.
pub const DEFAULT_BLOCK_MINUTES: u32 = 60;

/// Window start used when a day has no curfew entry yet.
pub const DEFAULT_SCHEDULE_START: &str = "00:00";

/// Window end used when a day has no curfew entry yet.
pub const DEFAULT_SCHEDULE_END: &str = "23:59";
