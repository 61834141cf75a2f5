//! Timestamp utilities

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// The instant one day before `at`, used as the initial scalar watermark
pub fn one_day_before(at: DateTime<Utc>) -> DateTime<Utc> {
    at - ChronoDuration::days(1)
}

/// Convert seconds to duration
pub fn secs_to_duration(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Format a period as `H:MM:SS`, or `Dd-H:MM:SS` once it reaches a day
pub fn format_period(period: Duration) -> String {
    let total = period.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;

    if days > 0 {
        format!("{}d-{}:{:02}:{:02}", days, hours, mins, secs)
    } else {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    }
}
