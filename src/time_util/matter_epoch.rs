use chrono::{DateTime, Utc};

/// Seconds between 1970-01-01 and 2000-01-01, the epoch device attributes are expressed in.
pub const MATTER_EPOCH_OFFSET_SECS: i64 = 946_684_800;

pub fn to_matter_epoch_seconds(unix_seconds: i64) -> i64 {
    unix_seconds - MATTER_EPOCH_OFFSET_SECS
}

pub fn matter_epoch_of(time: &DateTime<Utc>) -> i64 {
    to_matter_epoch_seconds(time.timestamp())
}
