//! Elapsed-time figures for runs and phases.
//!
//! Timestamps stay opaque strings in the model; they are parsed here only for display.

use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Parse an RFC 3339 timestamp. Also accepts the space-separated form some
/// database change payloads use.
pub fn parse_timestamp(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    OffsetDateTime::parse(s, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(&s.replacen(' ', "T", 1), &Rfc3339))
        .ok()
}

/// Time between `started` and `completed`, or `now` while still open.
pub fn elapsed(
    started: Option<&str>,
    completed: Option<&str>,
    now: OffsetDateTime,
) -> Option<Duration> {
    let start = parse_timestamp(started?)?;
    let end = match completed {
        Some(c) => parse_timestamp(c)?,
        None => now,
    };
    Duration::try_from(end - start).ok()
}

/// `42s`, `3m 05s`, `1h 02m`.
pub fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_both_timestamp_forms() {
        let a = parse_timestamp("2025-01-01T00:00:00Z").unwrap();
        let b = parse_timestamp("2025-01-01 00:00:00.5+00:00").unwrap();
        assert_eq!((b - a).whole_milliseconds(), 500);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn elapsed_uses_now_while_open() {
        let now = datetime!(2025-01-01 00:01:30 UTC);
        assert_eq!(
            elapsed(Some("2025-01-01T00:00:00Z"), None, now),
            Some(Duration::from_secs(90))
        );
        assert_eq!(
            elapsed(
                Some("2025-01-01T00:00:00Z"),
                Some("2025-01-01T00:00:10Z"),
                now
            ),
            Some(Duration::from_secs(10))
        );
        assert_eq!(elapsed(None, None, now), None);
        // Clock skew between backend and client.
        assert_eq!(elapsed(Some("2025-01-01T00:05:00Z"), None, now), None);
    }

    #[test]
    fn formats_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(42)), "42s");
        assert_eq!(format_elapsed(Duration::from_secs(185)), "3m 05s");
        assert_eq!(format_elapsed(Duration::from_secs(3720)), "1h 02m");
    }
}
