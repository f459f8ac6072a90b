//! UTC timestamp helpers.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC time.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Render a timestamp as ISO-8601 with millisecond precision, e.g.
/// `2026-08-07T12:00:00.000Z`.
pub fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn iso8601_renders_millis_and_zulu() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 7, 12, 30, 0).unwrap();
        assert_eq!(iso8601(ts), "2026-08-07T12:30:00.000Z");
    }
}
