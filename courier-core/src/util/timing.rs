use chrono::prelude::*;

/// Get the time since the UNIX epoch in seconds
pub fn sec_since_epoch() -> i64 {
    Utc::now().timestamp()
}

/// Get the time since the UNIX epoch in milliseconds
pub fn ms_since_epoch() -> i64 {
    Utc::now().timestamp_millis()
}

/// Get the time since the UNIX epoch in nanoseconds.
///
/// Outbox timestamps are nanosecond-resolution so that bulk inserts can
/// hand out `base + i` offsets without colliding with neighboring batches.
pub fn ns_since_epoch() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
