//! Ingestion rate reporting.

use std::time::{Duration, Instant};

/// Periodically logs the average ingestion rate.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    interval: Duration,
    last_block: u64,
    last_tick: Option<Instant>,
}

impl ProgressTracker {
    /// Creates a tracker reporting at most once per `interval`.
    pub const fn new(interval: Duration) -> Self {
        Self { interval, last_block: 0, last_tick: None }
    }

    /// Records that block `number` was processed at `now`.
    ///
    /// Returns the rate in blocks per second when a report is due. The first call only primes
    /// the tracker.
    pub fn record(&mut self, number: u64, now: Instant) -> Option<f64> {
        let Some(last_tick) = self.last_tick else {
            self.prime(number, now);
            return None;
        };

        let elapsed = now.saturating_duration_since(last_tick);
        if elapsed <= self.interval {
            return None;
        }

        let rate = number.saturating_sub(self.last_block) as f64 / elapsed.as_secs_f64();
        info!(
            target: "loader",
            block_number = number,
            last_tick_block = self.last_block,
            block_sec = rate,
            "Average insert rate"
        );
        self.prime(number, now);
        Some(rate)
    }

    const fn prime(&mut self, number: u64, now: Instant) {
        self.last_block = number;
        self.last_tick = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_record_primes() {
        let mut tracker = ProgressTracker::new(Duration::from_secs(5));
        let start = Instant::now();

        assert_eq!(tracker.record(100, start), None);
        assert_eq!(tracker.record(200, start + Duration::from_secs(5)), None);
    }

    #[test]
    fn test_reports_average_rate() {
        let mut tracker = ProgressTracker::new(Duration::from_secs(5));
        let start = Instant::now();

        tracker.record(100, start);
        let rate = tracker.record(1_100, start + Duration::from_secs(10)).unwrap();
        assert!((rate - 100.0).abs() < f64::EPSILON);

        // The report resets the window.
        assert_eq!(tracker.record(1_200, start + Duration::from_secs(12)), None);
    }

    #[test]
    fn test_backwards_number_reports_zero() {
        let mut tracker = ProgressTracker::new(Duration::from_secs(5));
        let start = Instant::now();

        tracker.record(500, start);
        let rate = tracker.record(400, start + Duration::from_secs(6)).unwrap();
        assert_eq!(rate, 0.0);
    }
}
