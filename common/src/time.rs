//! Time utilities and constants for the caja ledger.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, Utc};

/// Ledger timing constants.
pub mod constants {
    use super::Duration;

    /// Default bound on waiting for a session lock (5 seconds).
    pub fn default_lock_timeout() -> Duration {
        Duration::seconds(5)
    }

    /// Suggested client back-off after a lock timeout (250 milliseconds).
    pub fn busy_retry_after() -> Duration {
        Duration::milliseconds(250)
    }
}

/// A timestamp with timezone (always stored as UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Business date and wall-clock time of a timestamp, in the local timezone.
///
/// Movements carry both (fecha/hora) because receipts and the till history
/// are read in local time.
pub fn local_date_time(ts: Timestamp) -> (NaiveDate, NaiveTime) {
    let local = ts.with_timezone(&Local);
    (local.date_naive(), local.time())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_date_time_roundtrip() {
        let ts = now();
        let (date, time) = local_date_time(ts);
        let local = date.and_time(time);
        assert_eq!(local, ts.with_timezone(&Local).naive_local());
    }

    #[test]
    fn test_constants() {
        assert!(constants::busy_retry_after() < constants::default_lock_timeout());
    }
}
