use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A stored timestamp rendered for display in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedTimestamp {
    /// Local-date representation in `YYYY-MM-DD` form.
    pub iso_date: String,
    /// Local wall-clock time in `HH:MM:SS` form.
    pub local_time: String,
}

pub fn format_local(at: DateTime<Utc>) -> FormattedTimestamp {
    let local = at.with_timezone(&Local);
    FormattedTimestamp {
        iso_date: local.format("%Y-%m-%d").to_string(),
        local_time: local.format("%H:%M:%S").to_string(),
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix, the format used in
/// object metadata and error bodies.
pub fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn rfc3339_now() -> String {
    rfc3339(Utc::now())
}
