use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Remaining time below which the countdown is flagged as running low.
pub(crate) const LOW_TIME_THRESHOLD_SECONDS: u64 = 300;

pub(crate) fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

/// `mm:ss`; minutes are not wrapped into hours.
pub(crate) fn format_countdown(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

pub(crate) fn is_low_time(seconds: u64) -> bool {
    seconds < LOW_TIME_THRESHOLD_SECONDS
}
