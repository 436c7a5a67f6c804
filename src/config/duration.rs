//! Duration parsing utilities.
//!
//! Stack files spell timeouts as human-readable strings like "500ms",
//! "10s" or "5m".

use std::time::Duration;

/// Parse a duration string like "500ms", "10s", "5m", "1h".
///
/// Supported formats:
/// - `"Nms"` - N milliseconds
/// - `"Ns"` - N seconds
/// - `"Nm"` - N minutes
/// - `"Nh"` - N hours
/// - `"N"` - N seconds (no suffix)
///
/// Returns `None` if the string cannot be parsed.
///
/// # Examples
///
/// ```
/// use stack_provider::config::parse_duration_string;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration_string("10s"), Some(Duration::from_secs(10)));
/// assert_eq!(parse_duration_string("500ms"), Some(Duration::from_millis(500)));
/// assert_eq!(parse_duration_string("5m"), Some(Duration::from_secs(300)));
/// ```
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();

    if s.is_empty() {
        return None;
    }

    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().and_then(|m| m.checked_mul(60)).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().and_then(|h| h.checked_mul(3600)).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Parse an optional duration setting, falling back to `default` when the
/// value is absent or malformed. Malformed values are logged.
pub(crate) fn duration_or(value: Option<&str>, field: &str, default: Duration) -> Duration {
    match value {
        None => default,
        Some(raw) => parse_duration_string(raw).unwrap_or_else(|| {
            tracing::warn!(
                "Ignoring invalid duration '{}' for '{}', using {:?}",
                raw,
                field,
                default
            );
            default
        }),
    }
}
