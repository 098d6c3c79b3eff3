//! UTC timestamp formatting shared by signable rows and health snapshots.

use std::time::SystemTime;

/// ISO-8601 UTC with millisecond precision, e.g. `2017-07-10T15:54:26.123Z`.
pub fn to_iso8601(time: SystemTime) -> String {
    humantime::format_rfc3339_millis(time).to_string()
}
