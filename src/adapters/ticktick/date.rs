//! Timestamp parsing for TickTick payloads.
//!
//! The Open API emits offsets without a colon (`2025-10-23T01:00:00.000+0000`),
//! which RFC 3339 parsers reject.

use chrono::{DateTime, Utc};

/// Parse a TickTick timestamp. Returns `None` when absent or unparseable.
pub fn parse_ticktick_date(input: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = input?.trim();
    if raw.is_empty() {
        return None;
    }
    let normalized = normalize_offset(raw);
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Rewrite a trailing `+HHMM`/`-HHMM` into `+HH:MM`.
fn normalize_offset(raw: &str) -> String {
    let bytes = raw.as_bytes();
    if bytes.len() < 5 {
        return raw.to_string();
    }
    let tail = &bytes[bytes.len() - 5..];
    let sign_ok = tail[0] == b'+' || tail[0] == b'-';
    if sign_ok && tail[1..].iter().all(u8::is_ascii_digit) {
        let split = raw.len() - 2;
        format!("{}:{}", &raw[..split], &raw[split..])
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_offset_without_colon() {
        let parsed = parse_ticktick_date(Some("2025-10-23T01:00:00.000+0000")).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 10, 23, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_negative_offset_converted_to_utc() {
        let parsed = parse_ticktick_date(Some("2025-10-23T01:00:00.000-0230")).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 10, 23, 3, 30, 0).unwrap());
    }

    #[test]
    fn test_already_rfc3339() {
        let parsed = parse_ticktick_date(Some("2025-10-23T01:00:00Z")).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 10, 23, 1, 0, 0).unwrap());
        assert!(parse_ticktick_date(Some("2025-10-23T01:00:00+01:00")).is_some());
    }

    #[test]
    fn test_garbage_and_empty() {
        assert_eq!(parse_ticktick_date(None), None);
        assert_eq!(parse_ticktick_date(Some("")), None);
        assert_eq!(parse_ticktick_date(Some("tomorrow")), None);
    }
}
