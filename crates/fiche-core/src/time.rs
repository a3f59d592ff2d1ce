//! Timestamp helpers.
//!
//! All timestamps in the data model are milliseconds since the Unix epoch.
//! History payloads sometimes carry ISO 8601 strings instead; those are
//! converted here. Nothing in this crate reads the wall clock.

use chrono::DateTime;
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};

/// Parse a timestamp given either as integer milliseconds or as RFC 3339.
///
/// Returns `None` for anything unparseable or before the epoch, which the
/// timeline treats as "sorts last".
pub fn parse_timestamp_ms(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(ms) = trimmed.parse::<u64>() {
        return Some(ms);
    }
    let parsed = DateTime::parse_from_rfc3339(trimmed).ok()?;
    u64::try_from(parsed.timestamp_millis()).ok()
}

/// Convert fractional milliseconds, dropping the fraction.
///
/// Negative, NaN, and infinite values yield `None`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn float_timestamp_ms(raw: f64) -> Option<u64> {
    (raw.is_finite() && raw >= 0.0 && raw < u64::MAX as f64).then(|| raw.trunc() as u64)
}

/// Any JSON value a sender might put in a timestamp slot.
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseTimestamp {
    Millis(u64),
    Fractional(f64),
    Text(String),
    Other(IgnoredAny),
}

/// Serde adapter for optional event timestamps.
///
/// Accepts integer or fractional milliseconds and the string forms
/// [`parse_timestamp_ms`] understands. Anything else decodes to `None`
/// rather than failing the surrounding event. Use together with
/// `#[serde(default)]` so an absent field is also `None`.
pub fn deserialize_lenient_ms<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<LooseTimestamp>::deserialize(deserializer)?;
    Ok(raw.and_then(|raw| match raw {
        LooseTimestamp::Millis(ms) => Some(ms),
        LooseTimestamp::Fractional(ms) => float_timestamp_ms(ms),
        LooseTimestamp::Text(text) => parse_timestamp_ms(&text),
        LooseTimestamp::Other(_) => None,
    }))
}

/// Elapsed milliseconds between two instants, clamped at zero.
pub fn elapsed_ms(started_at: u64, ended_at: u64) -> u64 {
    ended_at.saturating_sub(started_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_millis() {
        assert_eq!(parse_timestamp_ms("1700000000123"), Some(1_700_000_000_123));
    }

    #[test]
    fn parses_rfc3339() {
        assert_eq!(parse_timestamp_ms("1970-01-01T00:00:01.500Z"), Some(1500));
        assert_eq!(parse_timestamp_ms("1970-01-01T01:00:00+01:00"), Some(0));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp_ms(""), None);
        assert_eq!(parse_timestamp_ms("   "), None);
        assert_eq!(parse_timestamp_ms("yesterday"), None);
    }

    #[test]
    fn rejects_pre_epoch() {
        assert_eq!(parse_timestamp_ms("1969-12-31T23:59:59Z"), None);
    }

    #[test]
    fn fractional_millis_truncate() {
        assert_eq!(float_timestamp_ms(1200.9), Some(1200));
        assert_eq!(float_timestamp_ms(-1.0), None);
        assert_eq!(float_timestamp_ms(f64::NAN), None);
        assert_eq!(float_timestamp_ms(f64::INFINITY), None);
    }

    #[derive(Deserialize)]
    struct Stamped {
        #[serde(default, deserialize_with = "deserialize_lenient_ms")]
        at: Option<u64>,
    }

    fn stamped(json: &str) -> Option<u64> {
        serde_json::from_str::<Stamped>(json).unwrap().at
    }

    #[test]
    fn lenient_timestamp_accepts_every_sender_shape() {
        assert_eq!(stamped(r#"{"at":1200}"#), Some(1200));
        assert_eq!(stamped(r#"{"at":1200.5}"#), Some(1200));
        assert_eq!(stamped(r#"{"at":"1970-01-01T00:00:01.200Z"}"#), Some(1200));
        assert_eq!(stamped(r#"{"at":"1200"}"#), Some(1200));
        assert_eq!(stamped(r"{}"), None);
        assert_eq!(stamped(r#"{"at":null}"#), None);
    }

    #[test]
    fn lenient_timestamp_drops_unusable_values() {
        assert_eq!(stamped(r#"{"at":-5}"#), None);
        assert_eq!(stamped(r#"{"at":"soon"}"#), None);
        assert_eq!(stamped(r#"{"at":true}"#), None);
        assert_eq!(stamped(r#"{"at":{"seconds":1}}"#), None);
    }

    #[test]
    fn elapsed_clamps_negative() {
        assert_eq!(elapsed_ms(100, 250), 150);
        assert_eq!(elapsed_ms(250, 100), 0);
    }
}
