//! Heartbeat lease helpers.
//!
//! The deadline itself is computed here, in process time, purely as an
//! argument to hand the database — the repository's `GREATEST()` refresh
//! is what actually enforces monotonicity server-side.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// The next `next_report_by` deadline, `interval` from now.
pub fn next_deadline(interval: Duration) -> DateTime<Utc> {
    Utc::now() + ChronoDuration::from_std(interval).unwrap_or(ChronoDuration::seconds(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_deadline_is_in_the_future() {
        let deadline = next_deadline(Duration::from_secs(30));
        assert!(deadline > Utc::now());
    }
}
