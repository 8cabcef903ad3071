//! Human-readable rendering of millisecond timestamps

use std::time::{Duration, UNIX_EPOCH};

use clocksync_core::Timestamp;

/// First millisecond of year 10000, beyond what RFC 3339 can render
const RFC3339_END_MS: u64 = 253_402_300_800_000;

/// RFC 3339 with millisecond precision, e.g. `2024-03-01T12:00:00.250Z`.
/// Times before the epoch or after year 9999 fall back to the raw
/// millisecond count.
pub fn fmt_millis(t: Timestamp) -> String {
    match u64::try_from(t.as_millis()) {
        Ok(ms) if ms < RFC3339_END_MS => {
            let at = UNIX_EPOCH + Duration::from_millis(ms);
            humantime::format_rfc3339_millis(at).to_string()
        }
        _ => format!("{}ms", t.as_millis()),
    }
}

/// Seconds with three decimals, e.g. `-29.000`
pub fn fmt_secs(millis: i64) -> String {
    format!("{:.3}", millis as f64 / 1000.0)
}
