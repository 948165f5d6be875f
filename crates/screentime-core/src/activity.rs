//! # Activity Summaries
//!
//! Reduces the `get-weekly-activities-v2` response to the two sensors the
//! bridge publishes: usage totals and the most recent viewing entry.
//!
//! ## Response Shape
//! ```text
//! activityV2Data: [
//!   { category, aggregatedDuration (s),
//!     intervals: [
//!       { startTime (epoch s), aggregatedDuration (s),
//!         aggregatedActivityResults: [
//!           { attributes: { TITLE, THUMBNAIL_URL },
//!             activityDuration (s), lastActivityTimeStamp, activityCount } ] } ] } ]
//! ```

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::CoreError;

/// Aggregation bucket requested from the upstream service (one day).
pub const AGGREGATION_INTERVAL_SECS: i64 = 86_400;

// =============================================================================
// Upstream Shapes
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoryActivity {
    #[serde(default = "unknown")]
    category: String,
    #[serde(default)]
    aggregated_duration: f64,
    #[serde(default)]
    intervals: Vec<ActivityInterval>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityInterval {
    #[serde(default)]
    start_time: i64,
    #[serde(default)]
    aggregated_duration: f64,
    #[serde(default)]
    aggregated_activity_results: Vec<ActivityResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityResult {
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
    #[serde(default)]
    activity_duration: f64,
    #[serde(default)]
    last_activity_time_stamp: Option<i64>,
}

fn unknown() -> String {
    "Unknown".to_string()
}

fn parse_categories(response: &Value) -> Result<Vec<CategoryActivity>, CoreError> {
    match response.get("activityV2Data") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(data) => Ok(serde_json::from_value(data.clone())?),
    }
}

// =============================================================================
// Usage Summary
// =============================================================================

/// Usage totals derived from one activity response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub today_minutes: u32,
    pub week_minutes: u32,
    /// Minutes per calendar day (UTC date of the interval start).
    pub daily: BTreeMap<NaiveDate, u32>,
    pub last_active: Option<DateTime<Utc>>,
}

impl UsageSummary {
    /// Builds the usage sensor state.
    ///
    /// `limit_minutes` is today's configured limit if one applies.
    pub fn to_state(&self, limit_minutes: Option<u32>, now: DateTime<Utc>) -> Value {
        json!({
            "today_minutes": self.today_minutes,
            "week_minutes": self.week_minutes,
            "limit_minutes": limit_minutes.unwrap_or(0),
            "remaining_minutes": limit_minutes
                .map(|limit| limit.saturating_sub(self.today_minutes))
                .unwrap_or(0),
            "last_active": self.last_active.map(|t| t.to_rfc3339()),
            "updated": now.to_rfc3339(),
        })
    }
}

/// Summarises usage. Intervals starting at or after `today_start` count as today.
pub fn summarize_usage(
    response: &Value,
    today_start: DateTime<Utc>,
) -> Result<UsageSummary, CoreError> {
    let categories = parse_categories(response)?;

    let mut week_secs = 0.0;
    let mut today_secs = 0.0;
    let mut daily_secs: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    let mut last_active: Option<DateTime<Utc>> = None;

    for category in &categories {
        week_secs += category.aggregated_duration;

        for interval in &category.intervals {
            let Some(start) = Utc.timestamp_opt(interval.start_time, 0).single() else {
                continue;
            };
            *daily_secs.entry(start.date_naive()).or_default() += interval.aggregated_duration;
            if start >= today_start {
                today_secs += interval.aggregated_duration;
            }

            for result in &interval.aggregated_activity_results {
                if let Some(at) = result.last_activity_time_stamp.and_then(epoch_to_utc) {
                    last_active = Some(last_active.map_or(at, |prev| prev.max(at)));
                }
            }
        }
    }

    Ok(UsageSummary {
        today_minutes: secs_to_minutes(today_secs),
        week_minutes: secs_to_minutes(week_secs),
        daily: daily_secs
            .into_iter()
            .map(|(date, secs)| (date, secs_to_minutes(secs)))
            .collect(),
        last_active,
    })
}

// =============================================================================
// Viewing Entry
// =============================================================================

/// One title the subject used.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewingEntry {
    pub content_title: String,
    pub content_type: String,
    pub duration_minutes: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub thumbnail: Option<String>,
}

impl ViewingEntry {
    pub fn to_state(&self, now: DateTime<Utc>) -> Value {
        json!({
            "content_title": self.content_title,
            "content_type": self.content_type,
            "duration_minutes": self.duration_minutes,
            "timestamp": self.timestamp.map(|t| t.to_rfc3339()),
            "updated": now.to_rfc3339(),
        })
    }
}

/// Every activity result in the response, most recent first.
pub fn viewing_history(response: &Value) -> Result<Vec<ViewingEntry>, CoreError> {
    let categories = parse_categories(response)?;

    let mut entries: Vec<ViewingEntry> = categories
        .iter()
        .flat_map(|category| {
            category.intervals.iter().flat_map(move |interval| {
                interval.aggregated_activity_results.iter().map(move |result| ViewingEntry {
                    content_title: result
                        .attributes
                        .get("TITLE")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown")
                        .to_string(),
                    content_type: category.category.clone(),
                    duration_minutes: (result.activity_duration / 6.0).round() / 10.0,
                    timestamp: result.last_activity_time_stamp.and_then(epoch_to_utc),
                    thumbnail: result
                        .attributes
                        .get("THUMBNAIL_URL")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            })
        })
        .collect();

    // Stable sort: entries without a timestamp keep response order at the end.
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(entries)
}

/// The most recent viewing entry, if any.
pub fn latest_viewing(response: &Value) -> Result<Option<ViewingEntry>, CoreError> {
    Ok(viewing_history(response)?.into_iter().next())
}

// =============================================================================
// Helpers
// =============================================================================

fn secs_to_minutes(secs: f64) -> u32 {
    (secs.max(0.0) / 60.0).round() as u32
}

/// Accepts both epoch seconds and epoch milliseconds.
fn epoch_to_utc(value: i64) -> Option<DateTime<Utc>> {
    if value <= 0 {
        return None;
    }
    if value > 100_000_000_000 {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

/// Request body for the weekly activities endpoint.
pub fn activity_request(
    subject_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    time_zone: &str,
) -> Value {
    json!({
        "childDirectedId": subject_id,
        "startTime": start.timestamp(),
        "endTime": end.timestamp(),
        "aggregationInterval": AGGREGATION_INTERVAL_SECS,
        "timeZone": time_zone,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn sample() -> Value {
        let yesterday = ts("2024-03-04T00:00:00Z").timestamp();
        let today = ts("2024-03-05T00:00:00Z").timestamp();
        json!({
            "activityV2Data": [
                {
                    "category": "VIDEO",
                    "aggregatedDuration": 5400,
                    "intervals": [
                        { "startTime": yesterday, "aggregatedDuration": 3600,
                          "aggregatedActivityResults": [
                            { "attributes": { "TITLE": "Bluey" }, "activityDuration": 3600,
                              "lastActivityTimeStamp": yesterday + 4000 } ] },
                        { "startTime": today, "aggregatedDuration": 1800,
                          "aggregatedActivityResults": [
                            { "attributes": { "TITLE": "Octonauts", "THUMBNAIL_URL": "http://t" },
                              "activityDuration": 1800, "lastActivityTimeStamp": today + 2000 } ] }
                    ]
                },
                {
                    "category": "APP",
                    "aggregatedDuration": 600,
                    "intervals": [
                        { "startTime": today, "aggregatedDuration": 600,
                          "aggregatedActivityResults": [
                            { "attributes": { "TITLE": "Drawing" }, "activityDuration": 600 } ] }
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_usage_summary() {
        let summary = summarize_usage(&sample(), ts("2024-03-05T00:00:00Z")).unwrap();
        assert_eq!(summary.week_minutes, 100);
        assert_eq!(summary.today_minutes, 40);
        assert_eq!(summary.daily.len(), 2);
        assert_eq!(summary.last_active.unwrap(), ts("2024-03-05T00:33:20Z"));
    }

    #[test]
    fn test_usage_state_remaining() {
        let summary = summarize_usage(&sample(), ts("2024-03-05T00:00:00Z")).unwrap();
        let state = summary.to_state(Some(30), ts("2024-03-05T12:00:00Z"));
        assert_eq!(state["limit_minutes"], 30);
        assert_eq!(state["remaining_minutes"], 0);

        let state = summary.to_state(None, ts("2024-03-05T12:00:00Z"));
        assert_eq!(state["limit_minutes"], 0);
    }

    #[test]
    fn test_latest_viewing() {
        let latest = latest_viewing(&sample()).unwrap().unwrap();
        assert_eq!(latest.content_title, "Octonauts");
        assert_eq!(latest.content_type, "VIDEO");
        assert_eq!(latest.duration_minutes, 30.0);
        assert_eq!(latest.thumbnail.as_deref(), Some("http://t"));

        let history = viewing_history(&sample()).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content_title, "Drawing");
    }

    #[test]
    fn test_empty_response() {
        let summary = summarize_usage(&json!({}), Utc::now()).unwrap();
        assert_eq!(summary.today_minutes, 0);
        assert!(latest_viewing(&json!({})).unwrap().is_none());
    }

    #[test]
    fn test_activity_request() {
        let body = activity_request("c1", ts("2024-03-01T00:00:00Z"), ts("2024-03-08T00:00:00Z"), "Europe/London");
        assert_eq!(body["aggregationInterval"], 86_400);
        assert_eq!(body["endTime"].as_i64().unwrap() - body["startTime"].as_i64().unwrap(), 7 * 86_400);
    }
}
