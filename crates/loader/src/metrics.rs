//! Metrics for the loader.

use crate::StepKind;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Container for the loader metrics.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the gauge tracking the number of the last processed head block.
    pub const HEAD_BLOCK_NUMBER: &'static str = "blockloader_head_block_number";
    /// Identifier for the gauge tracking how far the head block timestamp lags behind now.
    pub const HEAD_BLOCK_TIME_DRIFT: &'static str = "blockloader_head_block_time_drift_seconds";
    /// Identifier for the gauge exposing loader health.
    pub const HEALTHY: &'static str = "blockloader_healthy";
    /// Identifier for the counter of processed steps, labeled by step kind.
    pub const STEPS_PROCESSED_TOTAL: &'static str = "blockloader_steps_processed_total";
    /// Identifier for the counter of successful flushes.
    pub const FLUSH_TOTAL: &'static str = "blockloader_flush_total";
    /// Identifier for the counter of failed flushes.
    pub const FLUSH_ERROR_TOTAL: &'static str = "blockloader_flush_error_total";
    /// Identifier for the histogram of flush latencies.
    pub const FLUSH_DURATION_SECONDS: &'static str = "blockloader_flush_duration_seconds";

    /// Initializes metrics for the loader.
    ///
    /// This does two things:
    /// * Describes the metrics.
    /// * Initializes metrics to 0 so they can be queried immediately.
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_gauge!(
            Self::HEAD_BLOCK_NUMBER,
            metrics::Unit::Count,
            "Number of the last head block processed by the loader",
        );

        metrics::describe_gauge!(
            Self::HEAD_BLOCK_TIME_DRIFT,
            metrics::Unit::Seconds,
            "Seconds between now and the timestamp of the last head block",
        );

        metrics::describe_gauge!(
            Self::HEALTHY,
            "Whether the loader is healthy, 1 for healthy and 0 otherwise",
        );

        metrics::describe_counter!(
            Self::STEPS_PROCESSED_TOTAL,
            metrics::Unit::Count,
            "Total number of fork steps processed by the loader",
        );

        metrics::describe_counter!(
            Self::FLUSH_TOTAL,
            metrics::Unit::Count,
            "Total number of successful flushes",
        );

        metrics::describe_counter!(
            Self::FLUSH_ERROR_TOTAL,
            metrics::Unit::Count,
            "Total number of failed or timed out flushes",
        );

        metrics::describe_histogram!(
            Self::FLUSH_DURATION_SECONDS,
            metrics::Unit::Seconds,
            "Latency of commit target flushes",
        );
    }

    fn zero() {
        metrics::gauge!(Self::HEAD_BLOCK_NUMBER).set(0.0);
        metrics::gauge!(Self::HEAD_BLOCK_TIME_DRIFT).set(0.0);
        metrics::gauge!(Self::HEALTHY).set(0.0);

        for step in [StepKind::New, StepKind::Irreversible] {
            metrics::counter!(Self::STEPS_PROCESSED_TOTAL, "step" => step.to_string()).increment(0);
        }

        metrics::counter!(Self::FLUSH_TOTAL).increment(0);
        metrics::counter!(Self::FLUSH_ERROR_TOTAL).increment(0);
    }

    pub(crate) fn record_head_block_number(number: u64) {
        metrics::gauge!(Self::HEAD_BLOCK_NUMBER).set(number as f64);
    }

    /// Publishes how far the head block lags `now`. Future timestamps publish zero.
    pub(crate) fn record_head_block_time(timestamp: u64, now: SystemTime) {
        metrics::gauge!(Self::HEAD_BLOCK_TIME_DRIFT).set(Self::head_block_drift(timestamp, now));
    }

    fn head_block_drift(timestamp: u64, now: SystemTime) -> f64 {
        UNIX_EPOCH
            .checked_add(Duration::from_secs(timestamp))
            .and_then(|block_time| now.duration_since(block_time).ok())
            .unwrap_or_default()
            .as_secs_f64()
    }

    pub(crate) fn record_health(healthy: bool) {
        metrics::gauge!(Self::HEALTHY).set(if healthy { 1.0 } else { 0.0 });
    }

    pub(crate) fn record_step(step: StepKind) {
        metrics::counter!(Self::STEPS_PROCESSED_TOTAL, "step" => step.to_string()).increment(1);
    }

    pub(crate) fn record_flush(duration: Duration, success: bool) {
        if success {
            metrics::counter!(Self::FLUSH_TOTAL).increment(1);
            metrics::histogram!(Self::FLUSH_DURATION_SECONDS).record(duration.as_secs_f64());
        } else {
            metrics::counter!(Self::FLUSH_ERROR_TOTAL).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const NOW: u64 = 1_700_000_000;

    #[rstest]
    #[case::lagging(NOW - 12, 12.0)]
    #[case::current(NOW, 0.0)]
    #[case::future(NOW + 30, 0.0)]
    #[case::unrepresentable(u64::MAX, 0.0)]
    fn test_head_block_drift(#[case] timestamp: u64, #[case] expected: f64) {
        let now = UNIX_EPOCH + Duration::from_secs(NOW);
        assert_eq!(Metrics::head_block_drift(timestamp, now), expected);
        Metrics::record_head_block_time(timestamp, now);
    }
}
