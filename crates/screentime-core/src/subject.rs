//! Subject discovery.
//!
//! The dashboard identifies a child by a `childDirectedId`. After login the
//! bridge tries three sources in order: the landing URL query, the household
//! listing, and finally any `href` on the landing page that carries the id.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use url::Url;

const SUBJECT_PARAM: &str = "childDirectedId";

/// Role the household endpoint assigns to a managed child.
pub const CHILD_ROLE: &str = "CHILD";

/// Reads `childDirectedId` from a URL's query string.
pub fn subject_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == SUBJECT_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// First household member whose role is `CHILD`.
pub fn subject_from_household(household: &Value) -> Option<String> {
    household
        .get("members")
        .and_then(Value::as_array)?
        .iter()
        .filter(|member| member.get("role").and_then(Value::as_str) == Some(CHILD_ROLE))
        .find_map(|member| member.get("directedId").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn href_regex() -> Option<&'static Regex> {
    static HREF: OnceLock<Option<Regex>> = OnceLock::new();
    HREF.get_or_init(|| Regex::new(r#"href\s*=\s*["']([^"']*childDirectedId=[^"']*)["']"#).ok())
        .as_ref()
}

/// Scans page markup for the first link carrying a subject id.
pub fn subject_from_page(html: &str, base: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    href_regex()?.captures_iter(html).find_map(|caps| {
        let href = caps.get(1)?.as_str().replace("&amp;", "&");
        let absolute = base.join(&href).ok()?;
        subject_from_url(absolute.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subject_from_url() {
        assert_eq!(
            subject_from_url("https://www.amazon.co.uk/parentaldashboard/activities?childDirectedId=amzn1.account.X&x=1"),
            Some("amzn1.account.X".to_string())
        );
        assert_eq!(subject_from_url("https://www.amazon.co.uk/parentaldashboard/intro"), None);
        assert_eq!(subject_from_url("https://x/?childDirectedId="), None);
        assert_eq!(subject_from_url("not a url"), None);
    }

    #[test]
    fn test_subject_from_household() {
        let household = json!({
            "members": [
                { "role": "ADULT", "directedId": "parent" },
                { "role": "CHILD", "directedId": "kid-1" },
                { "role": "CHILD", "directedId": "kid-2" }
            ]
        });
        assert_eq!(subject_from_household(&household), Some("kid-1".to_string()));
        assert_eq!(subject_from_household(&json!({ "members": [] })), None);
        assert_eq!(subject_from_household(&json!({})), None);
    }

    #[test]
    fn test_subject_from_page() {
        let html = r#"<a href="/about">x</a>
            <a class="card" href="/parentaldashboard/activities?childDirectedId=kid-9&amp;tab=1">Alice</a>"#;
        assert_eq!(
            subject_from_page(html, "https://www.amazon.co.uk/parentaldashboard/intro"),
            Some("kid-9".to_string())
        );
        assert_eq!(subject_from_page("<p>nothing</p>", "https://www.amazon.co.uk/"), None);
    }
}
