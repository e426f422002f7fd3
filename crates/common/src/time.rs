//! Timestamp helpers. All persisted timestamps are unix milliseconds.

/// Current time as unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Render a unix-millisecond timestamp as RFC 3339 for API responses.
pub fn to_rfc3339(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_round_trip() {
        let rendered = to_rfc3339(1_700_000_000_000);
        assert!(rendered.starts_with("2023-11-14T"));
    }

    #[test]
    fn out_of_range_renders_empty() {
        assert_eq!(to_rfc3339(i64::MAX), "");
    }
}
