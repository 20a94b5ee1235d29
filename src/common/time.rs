use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::config::Timestamp;

/// Microseconds since the unix epoch. Used for access-tracking metadata and
/// WAL record timestamps.
pub fn now_micros() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Seconds since the unix epoch, for the persisted header timestamps.
pub fn now_secs() -> Timestamp {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_micros_monotonic_enough() {
        let a = now_micros();
        let b = now_micros();
        assert!(b >= a);
    }

    #[test]
    fn test_now_secs_nonzero() {
        assert!(now_secs() > 1_500_000_000);
    }
}
