//! Typed dashboard endpoints over the [`UpstreamClient`].
//!
//! Login lives here too: the session manager verifies the credential, then
//! the subject is discovered from the landing page or the household listing,
//! which goes through the same authenticated call path as every endpoint.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use screentime_core::activity::activity_request;
use screentime_core::subject::{subject_from_household, subject_from_page, subject_from_url};
use screentime_core::WeekConfig;

use crate::error::BridgeResult;
use crate::session::SessionManager;
use crate::transport::{Method, Navigation};
use crate::upstream::UpstreamClient;

pub const WEEKLY_ACTIVITIES_PATH: &str = "/ajax/get-weekly-activities-v2";
pub const TIME_LIMITS_PATH: &str = "/ajax/get-adjusted-time-limits";
pub const SET_TIME_LIMITS_PATH: &str = "/ajax/set-time-limit-v2";
pub const OFFSCREEN_PATH: &str = "/ajax/set-offscreen-time";
pub const HOUSEHOLD_PATH: &str = "/ajax/get-household";

/// Window covered by the activity fetch.
const ACTIVITY_WINDOW_DAYS: i64 = 7;

pub struct DashboardApi {
    client: UpstreamClient,
    time_zone: Tz,
}

impl DashboardApi {
    pub fn new(client: UpstreamClient, time_zone: Tz) -> Self {
        DashboardApi { client, time_zone }
    }

    /// The dashboard's time zone.
    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    pub fn session(&self) -> &SessionManager {
        self.client.session()
    }

    pub fn session_mut(&mut self) -> &mut SessionManager {
        self.client.session_mut()
    }

    /// Logs in and discovers the subject.
    pub async fn login(&mut self) -> BridgeResult<()> {
        let landing = self.client.session_mut().login().await?;
        let subject_id = self.discover_subject(&landing).await;
        self.client.session_mut().set_subject(subject_id.clone());

        info!(subject = subject_id.as_deref().unwrap_or("<unknown>"), "Logged in");
        Ok(())
    }

    /// Configured id, then the landing URL, the household listing and
    /// finally links on the landing page. First hit wins.
    async fn discover_subject(&mut self, landing: &Navigation) -> Option<String> {
        if let Some(id) = self.session().options().subject_override.clone() {
            debug!("Using configured subject id");
            return Some(id);
        }

        if let Some(id) = subject_from_url(&landing.final_url) {
            debug!("Subject id found in landing URL");
            return Some(id);
        }

        match self.household().await {
            Ok(household) => match subject_from_household(&household) {
                Some(id) => {
                    debug!("Subject id found in household listing");
                    return Some(id);
                }
                None => debug!("Household listing has no child"),
            },
            Err(e) => warn!(%e, "Household lookup failed"),
        }

        if let Some(id) = subject_from_page(&landing.body, &landing.final_url) {
            debug!("Subject id found in page links");
            return Some(id);
        }

        warn!("Could not discover the subject id; set subject.id in the config");
        None
    }

    fn subject(&self) -> BridgeResult<String> {
        self.client.session().subject_id().map(str::to_string)
    }

    /// Activity aggregates for the seven days up to `now`.
    pub async fn weekly_activities(&mut self, now: DateTime<Utc>) -> BridgeResult<Value> {
        let subject = self.subject()?;
        let start = now - chrono::Duration::days(ACTIVITY_WINDOW_DAYS);
        let body = activity_request(&subject, start, now, self.time_zone.name());
        self.client.call(Method::Post, WEEKLY_ACTIVITIES_PATH, Some(&body)).await
    }

    /// Fresh week snapshot. Never cached.
    pub async fn week_config(&mut self) -> BridgeResult<WeekConfig> {
        let subject = self.subject()?;
        let encoded: String = url::form_urlencoded::byte_serialize(subject.as_bytes()).collect();
        let path = format!("{}?childDirectedId={}", TIME_LIMITS_PATH, encoded);
        let response = self.client.call(Method::Get, &path, None).await?;
        Ok(WeekConfig::from_response(&response)?)
    }

    /// Writes the whole week back.
    pub async fn put_week_config(&mut self, week: &WeekConfig) -> BridgeResult<()> {
        let subject = self.subject()?;
        let body = week.to_request(&subject);
        self.client.call(Method::Put, SET_TIME_LIMITS_PATH, Some(&body)).await?;
        debug!("Week configuration written");
        Ok(())
    }

    /// Blocks the device for `minutes`; zero lifts the block.
    pub async fn set_offscreen(&mut self, minutes: u32) -> BridgeResult<()> {
        let subject = self.subject()?;
        let body = json!({
            "directedIds": [subject],
            "expirationTimeInSeconds": u64::from(minutes) * 60,
        });
        self.client.call(Method::Post, OFFSCREEN_PATH, Some(&body)).await?;
        Ok(())
    }

    pub async fn household(&mut self) -> BridgeResult<Value> {
        self.client.call(Method::Get, HOUSEHOLD_PATH, None).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::testing::{fresh_credential, session_manager, FakeUpstream, MemoryCredentialStore};
    use chrono::TimeZone;

    const LANDING: &str = "https://parents.amazon.co.uk/intro";

    pub(crate) fn fresh_api(upstream: &FakeUpstream) -> DashboardApi {
        fresh_api_in(upstream, chrono_tz::Europe::London)
    }

    pub(crate) fn fresh_api_in(upstream: &FakeUpstream, zone: Tz) -> DashboardApi {
        let session = session_manager(upstream, MemoryCredentialStore::with(fresh_credential()));
        DashboardApi::new(UpstreamClient::new(session, "ft-panda-csrf-token"), zone)
    }

    /// Logged-in API for subject `kid`.
    pub(crate) async fn logged_in_api(upstream: &FakeUpstream) -> DashboardApi {
        logged_in_api_in(upstream, chrono_tz::Europe::London).await
    }

    pub(crate) async fn logged_in_api_in(upstream: &FakeUpstream, zone: Tz) -> DashboardApi {
        upstream.navigate_to(200, &format!("{}?childDirectedId=kid", LANDING), "");
        let mut api = fresh_api_in(upstream, zone);
        api.login().await.unwrap();
        api
    }

    /// A week where every day has limits on at 120 minutes.
    pub(crate) fn week_response() -> Value {
        let days: Vec<Value> = screentime_core::Day::ALL
            .iter()
            .map(|day| {
                json!({
                    "name": day.name(),
                    "enabled": true,
                    "timeLimits": {
                        "contentTimeLimitsEnabled": true,
                        "contentTimeLimits": { "ALL": 120 }
                    },
                    "curfewConfigList": [
                        { "start": "07:00", "end": "19:00", "enabled": true, "type": null }
                    ]
                })
            })
            .collect();
        json!({ "periodConfigurations": days })
    }

    #[tokio::test]
    async fn test_login_subject_from_url() {
        let upstream = FakeUpstream::new();
        upstream.navigate_to(200, &format!("{}?childDirectedId=kid-1", LANDING), "");

        let mut api = fresh_api(&upstream);
        api.login().await.unwrap();

        assert_eq!(api.session().subject_id().unwrap(), "kid-1");
        assert!(upstream.requests().is_empty());
    }

    #[tokio::test]
    async fn test_login_subject_from_household() {
        let upstream = FakeUpstream::new();
        upstream.navigate_to(200, LANDING, "<html></html>");
        upstream.respond(200, json!({ "members": [{ "role": "CHILD", "directedId": "kid-2" }] }));

        let mut api = fresh_api(&upstream);
        api.login().await.unwrap();

        assert_eq!(api.session().subject_id().unwrap(), "kid-2");
        let request = &upstream.requests()[0];
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, HOUSEHOLD_PATH);
    }

    #[tokio::test]
    async fn test_login_subject_from_page() {
        let upstream = FakeUpstream::new();
        upstream.navigate_to(200, LANDING, r#"<a href="/dashboard?childDirectedId=kid-3">x</a>"#);
        upstream.respond(500, json!({}));

        let mut api = fresh_api(&upstream);
        api.login().await.unwrap();

        assert_eq!(api.session().subject_id().unwrap(), "kid-3");
    }

    #[tokio::test]
    async fn test_login_without_subject_still_succeeds() {
        let upstream = FakeUpstream::new();
        upstream.navigate_to(200, LANDING, "");
        upstream.respond(200, json!({ "members": [] }));

        let mut api = fresh_api(&upstream);
        api.login().await.unwrap();

        assert!(api.session().is_authenticated());
        assert!(matches!(api.session().subject_id(), Err(BridgeError::MissingSubject)));
    }

    #[tokio::test]
    async fn test_week_config_request() {
        let upstream = FakeUpstream::new();
        let mut api = logged_in_api(&upstream).await;
        upstream.respond(200, week_response());

        let week = api.week_config().await.unwrap();
        assert_eq!(week.limit_for(screentime_core::Day::Monday), Some(120));

        let request = &upstream.requests()[0];
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "/ajax/get-adjusted-time-limits?childDirectedId=kid");
    }

    #[tokio::test]
    async fn test_activity_window() {
        let upstream = FakeUpstream::new();
        let mut api = logged_in_api(&upstream).await;
        upstream.respond(200, json!({}));

        let now = Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap();
        api.weekly_activities(now).await.unwrap();

        let body = upstream.requests()[0].body.clone().unwrap();
        assert_eq!(body["childDirectedId"], "kid");
        assert_eq!(body["endTime"], now.timestamp());
        assert_eq!(body["startTime"], now.timestamp() - 7 * 86_400);
        assert_eq!(body["timeZone"], "Europe/London");
    }

    #[tokio::test]
    async fn test_offscreen_body() {
        let upstream = FakeUpstream::new();
        let mut api = logged_in_api(&upstream).await;
        upstream.respond(200, json!({}));

        api.set_offscreen(45).await.unwrap();
        let request = &upstream.requests()[0];
        assert_eq!(request.path, OFFSCREEN_PATH);
        assert_eq!(
            request.body,
            Some(json!({ "directedIds": ["kid"], "expirationTimeInSeconds": 2700 }))
        );
    }

    #[tokio::test]
    async fn test_bad_week_response() {
        let upstream = FakeUpstream::new();
        let mut api = logged_in_api(&upstream).await;
        upstream.respond(200, json!({ "unexpected": true }));

        let err = api.week_config().await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidResponse(_)));
    }
}
