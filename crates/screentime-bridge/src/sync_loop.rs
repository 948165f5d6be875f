//! # Sync Loop
//!
//! Periodic pull of dashboard state into Home Assistant.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  run_cycle()                                                           │
//! │    1. GET week snapshot     → limit / minutes / schedule / start / end │
//! │    2. POST weekly activity  → usage sensor, viewing sensor             │
//! │                                                                         │
//! │  any fetch failed?                                                     │
//! │    no  → consecutive_failures = 0                                      │
//! │    yes → consecutive_failures += 1                                     │
//! │          at threshold: close transport, create a new one, login,       │
//! │          consecutive_failures = 0                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed fetch publishes nothing for its entities, so Home Assistant keeps
//! showing the last known values.

use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, error, info, warn};

use screentime_core::activity::{latest_viewing, summarize_usage};
use screentime_core::{on_off, Day, Entity, ScheduleEdge, WeekConfig};

use crate::api::DashboardApi;
use crate::error::BridgeResult;
use crate::publisher::EntityPublisher;

/// Result of one sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Synced,
    Failed { consecutive: u32 },
    /// Threshold reached; the session was rebuilt.
    Recreated,
}

pub struct SyncLoop {
    publisher: EntityPublisher,
    failure_threshold: u32,
    consecutive_failures: u32,
}

impl SyncLoop {
    pub fn new(publisher: EntityPublisher, failure_threshold: u32) -> Self {
        SyncLoop {
            publisher,
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub async fn run_cycle(&mut self, api: &mut DashboardApi) -> CycleOutcome {
        self.run_cycle_at(api, Utc::now()).await
    }

    pub async fn run_cycle_at(&mut self, api: &mut DashboardApi, now: DateTime<Utc>) -> CycleOutcome {
        debug!("Sync cycle starting");

        let week = match api.week_config().await {
            Ok(week) => {
                self.publish_week(&week);
                Some(week)
            }
            Err(e) => {
                warn!(%e, retryable = e.is_retryable(), "Week configuration fetch failed");
                None
            }
        };

        let activity_ok = match self.sync_activity(api, now, week.as_ref()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%e, retryable = e.is_retryable(), "Activity fetch failed");
                false
            }
        };

        if week.is_some() && activity_ok {
            if self.consecutive_failures > 0 {
                info!(after = self.consecutive_failures, "Sync recovered");
            }
            self.consecutive_failures = 0;
            debug!("Sync cycle complete");
            return CycleOutcome::Synced;
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures < self.failure_threshold {
            warn!(
                consecutive = self.consecutive_failures,
                threshold = self.failure_threshold,
                "Sync cycle failed"
            );
            return CycleOutcome::Failed {
                consecutive: self.consecutive_failures,
            };
        }

        error!(
            consecutive = self.consecutive_failures,
            "Repeated sync failures, recreating session"
        );
        self.consecutive_failures = 0;
        if let Err(e) = api.session_mut().recreate_transport().await {
            error!(%e, "Failed to recreate transport");
        } else if let Err(e) = api.login().await {
            error!(%e, "Login after recreation failed");
        }
        CycleOutcome::Recreated
    }

    fn publish_week(&self, week: &WeekConfig) {
        for limit in week.daily_limits() {
            self.publisher
                .publish_state(&Entity::Limit(limit.day), on_off(limit.enabled));
            if let Some(minutes) = limit.minutes {
                self.publisher
                    .publish_state(&Entity::Minutes(limit.day), &minutes.to_string());
            }
        }

        for schedule in week.schedules() {
            let day = schedule.day;
            self.publisher
                .publish_state(&Entity::Schedule(day), on_off(schedule.enabled));
            self.publisher
                .publish_state(&Entity::ScheduleTime(day, ScheduleEdge::Start), &schedule.start);
            self.publisher
                .publish_state(&Entity::ScheduleTime(day, ScheduleEdge::End), &schedule.end);
        }
    }

    async fn sync_activity(
        &self,
        api: &mut DashboardApi,
        now: DateTime<Utc>,
        week: Option<&WeekConfig>,
    ) -> BridgeResult<()> {
        let response = api.weekly_activities(now).await?;

        // "Today" is the dashboard's day, not the host's.
        let zone = api.time_zone();
        let local = now.with_timezone(&zone);
        let today = Day::from_weekday(local.weekday());
        let today_start = local
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| midnight.and_local_timezone(zone).earliest())
            .map(|midnight| midnight.with_timezone(&Utc))
            .unwrap_or(now);

        let usage = summarize_usage(&response, today_start)?;
        let limit = week.and_then(|w| w.limit_for(today));
        self.publisher
            .publish_json(&Entity::Usage, &usage.to_state(limit, now));

        if let Some(entry) = latest_viewing(&response)? {
            self.publisher
                .publish_json(&Entity::Viewing, &entry.to_state(now));
        }

        debug!(
            today_minutes = usage.today_minutes,
            week_minutes = usage.week_minutes,
            "Usage published"
        );
        Ok(())
    }
}
