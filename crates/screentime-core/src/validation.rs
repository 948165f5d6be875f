//! # Validation Module
//!
//! Payload coercion and validation for inbound commands.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Home Assistant entity                                        │
//! │  ├── number min/max/step, text pattern                                 │
//! │  └── UI-side feedback only, not trusted                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Router (THIS MODULE)                                         │
//! │  ├── ON/OFF literals                                                   │
//! │  ├── float → whole minutes                                             │
//! │  └── HH:MM pattern                                                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Upstream service                                             │
//! │  └── rejects with non-200, surfaced as UpstreamError                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use regex::Regex;
use std::sync::OnceLock;

/// Pattern advertised to Home Assistant for schedule times.
pub const TIME_PATTERN: &str = r"^([01]?[0-9]|2[0-3]):[0-5][0-9]$";

fn time_regex() -> Option<&'static Regex> {
    static TIME_RE: OnceLock<Option<Regex>> = OnceLock::new();
    TIME_RE.get_or_init(|| Regex::new(TIME_PATTERN).ok()).as_ref()
}

/// Coerces a switch payload. Only `ON` and `OFF` are accepted.
pub fn coerce_switch(payload: &str) -> Result<bool, String> {
    match payload {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        other => Err(format!("expected ON or OFF, got '{}'", other)),
    }
}

/// Coerces a number payload into whole minutes.
///
/// ## Rules
/// - Any float literal is accepted (`"45"`, `"45.0"`, `" 45.9 "`)
/// - The value is truncated toward zero
/// - Negative, infinite and NaN values are rejected
///
/// ## Example
/// ```rust
/// use screentime_core::validation::coerce_minutes;
///
/// assert_eq!(coerce_minutes("45.0"), Ok(45));
/// assert_eq!(coerce_minutes("90.9"), Ok(90));
/// assert!(coerce_minutes("abc").is_err());
/// ```
pub fn coerce_minutes(payload: &str) -> Result<u32, String> {
    let value: f64 = payload
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", payload))?;

    if !value.is_finite() {
        return Err(format!("'{}' is not a finite number", payload));
    }

    if value < 0.0 {
        return Err(format!("minutes must not be negative, got {}", value));
    }

    if value >= f64::from(u32::MAX) {
        return Err(format!("minutes out of range: {}", value));
    }

    Ok(value.trunc() as u32)
}

/// Returns true if `value` is a valid `HH:MM` schedule time.
pub fn is_valid_time(value: &str) -> bool {
    time_regex().is_some_and(|re| re.is_match(value))
}

/// Validates a schedule time, returning the trimmed value.
pub fn validate_time(value: &str) -> Result<String, String> {
    let value = value.trim();
    if is_valid_time(value) {
        Ok(value.to_string())
    } else {
        Err(format!("'{}' is not a valid HH:MM time", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_literals() {
        assert_eq!(coerce_switch("ON"), Ok(true));
        assert_eq!(coerce_switch("OFF"), Ok(false));
        assert!(coerce_switch("on").is_err());
        assert!(coerce_switch("true").is_err());
        assert!(coerce_switch("").is_err());
    }

    #[test]
    fn test_minutes_coercion() {
        assert_eq!(coerce_minutes("90"), Ok(90));
        assert_eq!(coerce_minutes("45.0"), Ok(45));
        assert_eq!(coerce_minutes("59.99"), Ok(59));
        assert_eq!(coerce_minutes(" 30 "), Ok(30));
        assert_eq!(coerce_minutes("0"), Ok(0));
    }

    #[test]
    fn test_minutes_rejections() {
        assert!(coerce_minutes("abc").is_err());
        assert!(coerce_minutes("").is_err());
        assert!(coerce_minutes("-5").is_err());
        assert!(coerce_minutes("NaN").is_err());
        assert!(coerce_minutes("inf").is_err());
    }

    #[test]
    fn test_time_validation() {
        assert!(is_valid_time("07:30"));
        assert!(is_valid_time("7:30"));
        assert!(is_valid_time("23:59"));
        assert!(!is_valid_time("24:00"));
        assert!(!is_valid_time("12:60"));
        assert!(!is_valid_time("noon"));
        assert_eq!(validate_time(" 08:15 "), Ok("08:15".to_string()));
    }
}
