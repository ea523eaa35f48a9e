use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock nanoseconds since the unix epoch.
///
/// Used for the atomic last-read / last-write stamps the connection
/// reaper compares against, and for the throttle deadline.
pub fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_nanos() as i64
}
