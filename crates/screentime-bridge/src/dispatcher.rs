//! # Command Dispatcher
//!
//! Executes queued commands against the dashboard and publishes the result.
//!
//! ## Command States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Received ──► Executing ──┬──► Published   new state published         │
//! │                            ├──► Reverted    toggle failed, !enabled     │
//! │                            └──► Failed      logged, nothing published   │
//! │                                                                         │
//! │   Week-config commands always run the full cycle:                       │
//! │   GET snapshot → mutate day(s) → PUT snapshot → publish                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Errors stop here. A failing command never prevents the next one in the
//! queue from running. A raised stop flag does: draining ends before the next
//! command and the rest stay queued.

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use screentime_core::{on_off, Command, Day, Entity, MAX_BLOCK_MINUTES, MIN_BLOCK_MINUTES};

use crate::api::DashboardApi;
use crate::error::BridgeResult;
use crate::publisher::EntityPublisher;
use crate::queue::CommandQueue;

/// Terminal state of one dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Published,
    Reverted,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Published => write!(f, "published"),
            Outcome::Reverted => write!(f, "reverted"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

pub struct Dispatcher {
    publisher: EntityPublisher,
    block_minutes: u32,
}

impl Dispatcher {
    pub fn new(publisher: EntityPublisher, block_minutes: u32) -> Self {
        Dispatcher {
            publisher,
            block_minutes: clamp_block(block_minutes),
        }
    }

    pub fn block_minutes(&self) -> u32 {
        self.block_minutes
    }

    /// Publishes the current block duration so the number entity has a value.
    pub fn announce_block_duration(&self) {
        self.publisher
            .publish_state(&Entity::BlockDuration, &self.block_minutes.to_string());
    }

    /// Runs every command currently queued, without waiting for more.
    /// Checks `stop` before each command.
    pub async fn drain(
        &mut self,
        queue: &mut CommandQueue,
        api: &mut DashboardApi,
        stop: &watch::Receiver<bool>,
    ) -> usize {
        let mut handled = 0;
        while !*stop.borrow() {
            let Some(command) = queue.try_next() else {
                break;
            };
            self.dispatch(api, command).await;
            handled += 1;
        }
        if handled > 0 {
            debug!(handled, "Command queue drained");
        }
        handled
    }

    /// Executes one command and publishes its outcome.
    pub async fn dispatch(&mut self, api: &mut DashboardApi, command: Command) -> Outcome {
        info!(kind = command.kind(), %command, "Executing command");

        match self.execute(api, &command).await {
            Ok(()) => Outcome::Published,
            Err(e) => match command {
                Command::ToggleDailyLimit { day, enabled } => {
                    warn!(%e, %day, retryable = e.is_retryable(), "Limit toggle failed, reverting");
                    self.publisher.publish_state(&Entity::Limit(day), on_off(!enabled));
                    Outcome::Reverted
                }
                Command::ToggleSchedule { day, enabled } => {
                    warn!(%e, %day, retryable = e.is_retryable(), "Schedule toggle failed, reverting");
                    self.publisher.publish_state(&Entity::Schedule(day), on_off(!enabled));
                    Outcome::Reverted
                }
                _ => {
                    error!(%e, kind = command.kind(), retryable = e.is_retryable(), "Command failed");
                    Outcome::Failed
                }
            },
        }
    }

    async fn execute(&mut self, api: &mut DashboardApi, command: &Command) -> BridgeResult<()> {
        let now_ms = Utc::now().timestamp_millis();

        match command {
            Command::ToggleDailyLimit { day, enabled } => {
                let mut week = api.week_config().await?;
                week.set_limit_enabled(*day, *enabled, now_ms)?;
                api.put_week_config(&week).await?;
                self.publisher.publish_state(&Entity::Limit(*day), on_off(*enabled));
            }

            Command::SetScreenTime { day, minutes } => {
                let mut week = api.week_config().await?;
                week.set_minutes(&[*day], *minutes, now_ms)?;
                api.put_week_config(&week).await?;
                self.publisher
                    .publish_state(&Entity::Minutes(*day), &minutes.to_string());
            }

            Command::BulkScreenTime { scope, minutes } => {
                let days: &[Day] = scope.days();
                let mut week = api.week_config().await?;
                week.set_minutes(days, *minutes, now_ms)?;
                api.put_week_config(&week).await?;

                let value = minutes.to_string();
                for day in days {
                    self.publisher.publish_state(&Entity::Minutes(*day), &value);
                }
                self.publisher.publish_state(&Entity::Bulk(*scope), &value);
                info!(scope = scope.label(), days = days.len(), minutes, "Bulk limit applied");
            }

            Command::ToggleSchedule { day, enabled } => {
                let mut week = api.week_config().await?;
                week.set_schedule_enabled(*day, *enabled, now_ms)?;
                api.put_week_config(&week).await?;
                self.publisher.publish_state(&Entity::Schedule(*day), on_off(*enabled));
            }

            Command::SetScheduleTime { day, edge, value } => {
                let mut week = api.week_config().await?;
                week.set_schedule_edge(*day, *edge, value, now_ms)?;
                api.put_week_config(&week).await?;
                self.publisher
                    .publish_state(&Entity::ScheduleTime(*day, *edge), value);
            }

            Command::Block => {
                api.set_offscreen(self.block_minutes).await?;
                info!(minutes = self.block_minutes, "Devices blocked");
            }

            Command::Unblock => {
                api.set_offscreen(0).await?;
                info!("Block lifted");
            }

            Command::SetBlockDuration { minutes } => {
                let clamped = clamp_block(*minutes);
                if clamped != *minutes {
                    warn!(requested = minutes, applied = clamped, "Block duration clamped");
                }
                self.block_minutes = clamped;
                self.announce_block_duration();
            }
        }

        Ok(())
    }
}

fn clamp_block(minutes: u32) -> u32 {
    minutes.clamp(MIN_BLOCK_MINUTES, MAX_BLOCK_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{logged_in_api, week_response};
    use crate::api::OFFSCREEN_PATH;
    use crate::queue::command_queue;
    use crate::testing::{FakeUpstream, RecordingPublisher};
    use crate::transport::Method;
    use screentime_core::{BulkScope, ScheduleEdge, Topics};
    use serde_json::json;
    use std::sync::Arc;

    fn dispatcher() -> (Dispatcher, Arc<RecordingPublisher>, Topics) {
        let recorder = RecordingPublisher::new();
        let topics = Topics::new("homeassistant", "kid");
        let publisher = EntityPublisher::new(recorder.clone(), topics.clone());
        (Dispatcher::new(publisher, 60), recorder, topics)
    }

    #[tokio::test]
    async fn test_toggles_publish_or_revert_for_every_day() {
        let upstream = FakeUpstream::new();
        let mut api = logged_in_api(&upstream).await;
        let (mut dispatcher, recorder, topics) = dispatcher();

        for day in Day::ALL {
            for enabled in [true, false] {
                let commands = [
                    (Command::ToggleDailyLimit { day, enabled }, Entity::Limit(day)),
                    (Command::ToggleSchedule { day, enabled }, Entity::Schedule(day)),
                ];
                for (command, entity) in commands {
                    let topic = topics.state(&entity);

                    upstream.respond(200, week_response());
                    upstream.respond(200, json!({}));
                    let outcome = dispatcher.dispatch(&mut api, command.clone()).await;
                    assert_eq!(outcome, Outcome::Published, "{}", command);
                    assert_eq!(recorder.last(&topic).as_deref(), Some(on_off(enabled)));

                    upstream.respond_raw(500, "boom");
                    let outcome = dispatcher.dispatch(&mut api, command.clone()).await;
                    assert_eq!(outcome, Outcome::Reverted, "{}", command);
                    assert_eq!(recorder.last(&topic).as_deref(), Some(on_off(!enabled)));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_set_screen_time_preserves_other_days() {
        let upstream = FakeUpstream::new();
        let mut api = logged_in_api(&upstream).await;
        let (mut dispatcher, recorder, topics) = dispatcher();

        let original = week_response();
        upstream.respond(200, original.clone());
        upstream.respond(200, json!({}));

        let command = Command::SetScreenTime { day: Day::Tuesday, minutes: 90 };
        assert_eq!(dispatcher.dispatch(&mut api, command).await, Outcome::Published);

        let put = upstream.requests().into_iter().find(|r| r.method == Method::Put).unwrap();
        let body = put.body.unwrap();
        assert_eq!(body["childDirectedId"], "kid");

        let written = body["periodConfigurations"].as_array().unwrap();
        let fetched = original["periodConfigurations"].as_array().unwrap();
        for (before, after) in fetched.iter().zip(written) {
            if before["name"] == "Tuesday" {
                assert_eq!(after["timeLimits"]["contentTimeLimits"]["ALL"], 90);
                assert!(after["time"].is_i64());
            } else {
                assert_eq!(before, after);
            }
        }
        assert_eq!(
            recorder.last(&topics.state(&Entity::Minutes(Day::Tuesday))).as_deref(),
            Some("90")
        );
    }

    #[tokio::test]
    async fn test_bulk_publishes_each_day() {
        let upstream = FakeUpstream::new();
        let mut api = logged_in_api(&upstream).await;
        let (mut dispatcher, recorder, topics) = dispatcher();
        upstream.respond(200, week_response());
        upstream.respond(200, json!({}));

        let command = Command::BulkScreenTime { scope: BulkScope::SchoolNights, minutes: 45 };
        assert_eq!(dispatcher.dispatch(&mut api, command).await, Outcome::Published);

        for day in Day::ALL {
            let published = recorder.last(&topics.state(&Entity::Minutes(day)));
            if BulkScope::SchoolNights.days().contains(&day) {
                assert_eq!(published.as_deref(), Some("45"), "{}", day);
            } else {
                assert_eq!(published, None, "{}", day);
            }
        }
        assert_eq!(
            recorder.last(&topics.state(&Entity::Bulk(BulkScope::SchoolNights))).as_deref(),
            Some("45")
        );
    }

    #[tokio::test]
    async fn test_schedule_time() {
        let upstream = FakeUpstream::new();
        let mut api = logged_in_api(&upstream).await;
        let (mut dispatcher, recorder, topics) = dispatcher();
        upstream.respond(200, week_response());
        upstream.respond(200, json!({}));

        let command = Command::SetScheduleTime {
            day: Day::Friday,
            edge: ScheduleEdge::End,
            value: "21:30".into(),
        };
        assert_eq!(dispatcher.dispatch(&mut api, command).await, Outcome::Published);
        assert_eq!(
            recorder
                .last(&topics.state(&Entity::ScheduleTime(Day::Friday, ScheduleEdge::End)))
                .as_deref(),
            Some("21:30")
        );
    }

    #[tokio::test]
    async fn test_block_uses_stored_duration() {
        let upstream = FakeUpstream::new();
        let mut api = logged_in_api(&upstream).await;
        let (mut dispatcher, recorder, topics) = dispatcher();

        let outcome = dispatcher
            .dispatch(&mut api, Command::SetBlockDuration { minutes: 2000 })
            .await;
        assert_eq!(outcome, Outcome::Published);
        assert_eq!(dispatcher.block_minutes(), MAX_BLOCK_MINUTES);
        assert_eq!(
            recorder.last(&topics.state(&Entity::BlockDuration)).as_deref(),
            Some("720")
        );
        assert!(upstream.requests().is_empty());

        dispatcher.dispatch(&mut api, Command::SetBlockDuration { minutes: 30 }).await;
        upstream.respond(200, json!({}));
        upstream.respond(200, json!({}));
        dispatcher.dispatch(&mut api, Command::Block).await;
        dispatcher.dispatch(&mut api, Command::Unblock).await;

        let requests = upstream.requests();
        assert!(requests.iter().all(|r| r.path == OFFSCREEN_PATH));
        assert_eq!(requests[0].body.as_ref().unwrap()["expirationTimeInSeconds"], 1800);
        assert_eq!(requests[1].body.as_ref().unwrap()["expirationTimeInSeconds"], 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_drain() {
        let upstream = FakeUpstream::new();
        let mut api = logged_in_api(&upstream).await;
        let (mut dispatcher, recorder, topics) = dispatcher();
        let (sender, mut queue) = command_queue();

        sender.enqueue(Command::SetScreenTime { day: Day::Monday, minutes: 30 }).unwrap();
        sender.enqueue(Command::Block).unwrap();
        sender.enqueue(Command::SetBlockDuration { minutes: 15 }).unwrap();

        upstream.fail("reset");
        upstream.respond_raw(400, "bad");

        let (_stop_tx, stop) = watch::channel(false);
        assert_eq!(dispatcher.drain(&mut queue, &mut api, &stop).await, 3);
        assert_eq!(recorder.last(&topics.state(&Entity::Minutes(Day::Monday))), None);
        assert_eq!(
            recorder.last(&topics.state(&Entity::BlockDuration)).as_deref(),
            Some("15")
        );
        assert_eq!(dispatcher.drain(&mut queue, &mut api, &stop).await, 0);
    }

    #[tokio::test]
    async fn test_drain_stops_between_commands() {
        let upstream = FakeUpstream::new();
        let mut api = logged_in_api(&upstream).await;
        let (mut dispatcher, _recorder, _topics) = dispatcher();
        let (sender, mut queue) = command_queue();
        let (stop_tx, stop) = watch::channel(false);

        sender.enqueue(Command::Block).unwrap();
        sender.enqueue(Command::Unblock).unwrap();
        stop_tx.send_replace(true);

        assert_eq!(dispatcher.drain(&mut queue, &mut api, &stop).await, 0);
        assert!(upstream.requests().is_empty());
        assert_eq!(queue.try_next(), Some(Command::Block));
    }

    #[tokio::test]
    async fn test_missing_subject_fails_cleanly() {
        let upstream = FakeUpstream::new();
        upstream.navigate_to(200, "https://parents.amazon.co.uk/intro", "");
        upstream.respond(200, json!({ "members": [] }));
        let mut api = crate::api::tests::fresh_api(&upstream);
        api.login().await.unwrap();
        let (mut dispatcher, recorder, topics) = dispatcher();

        let outcome = dispatcher
            .dispatch(&mut api, Command::ToggleDailyLimit { day: Day::Sunday, enabled: true })
            .await;
        assert_eq!(outcome, Outcome::Reverted);
        assert_eq!(
            recorder.last(&topics.state(&Entity::Limit(Day::Sunday))).as_deref(),
            Some("OFF")
        );
    }
}
