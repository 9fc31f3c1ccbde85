//! Reconciliation metrics.
//!
//! Recorded through the `metrics` crate facade; nothing is exported unless
//! the host installs a recorder.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `fresco_ticks_total` | Counter | `outcome` |
//! | `fresco_tick_duration_seconds` | Histogram | - |
//! | `fresco_planned_assets_total` | Counter | `reason` |
//! | `fresco_stale_assets` | Gauge | - |
//! | `fresco_late_policies` | Gauge | - |
//! | `fresco_in_flight_assets` | Gauge | - |
//! | `fresco_completions_total` | Counter | `outcome` |
//! | `fresco_submission_failures_total` | Counter | `backend` |
//! | `fresco_in_flight_evictions_total` | Counter | - |
//!
//! ```rust,no_run
//! use fresco_flow::metrics::ReconcileMetrics;
//!
//! let metrics = ReconcileMetrics::new();
//! metrics.record_tick("submitted");
//! metrics.set_stale_assets(3);
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Ticks by outcome.
    pub const TICKS_TOTAL: &str = "fresco_ticks_total";
    /// Histogram: Tick processing time in seconds.
    pub const TICK_DURATION_SECONDS: &str = "fresco_tick_duration_seconds";
    /// Counter: Planned assets by primary inclusion reason.
    pub const PLANNED_ASSETS_TOTAL: &str = "fresco_planned_assets_total";
    /// Gauge: Stale assets at the last tick.
    pub const STALE_ASSETS: &str = "fresco_stale_assets";
    /// Gauge: Violated freshness policies at the last tick.
    pub const LATE_POLICIES: &str = "fresco_late_policies";
    /// Gauge: Assets currently in flight.
    pub const IN_FLIGHT_ASSETS: &str = "fresco_in_flight_assets";
    /// Counter: Completion callbacks by outcome.
    pub const COMPLETIONS_TOTAL: &str = "fresco_completions_total";
    /// Counter: Failed plan submissions.
    pub const SUBMISSION_FAILURES_TOTAL: &str = "fresco_submission_failures_total";
    /// Counter: In-flight keys evicted by the host.
    pub const IN_FLIGHT_EVICTIONS_TOTAL: &str = "fresco_in_flight_evictions_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Tick or completion outcome.
    pub const OUTCOME: &str = "outcome";
    /// Why an asset was planned (stale, policy).
    pub const REASON: &str = "reason";
    /// Execution backend name.
    pub const BACKEND: &str = "backend";
}

/// Records reconciliation metrics. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ReconcileMetrics;

impl ReconcileMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a tick outcome (`submitted`, `idle`, `aborted`,
    /// `submission_failed`).
    pub fn record_tick(&self, outcome: &'static str) {
        counter!(names::TICKS_TOTAL, labels::OUTCOME => outcome).increment(1);
    }

    /// Records tick duration.
    pub fn observe_tick_duration(&self, duration: Duration) {
        histogram!(names::TICK_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records one planned asset.
    pub fn record_planned(&self, reason: &'static str) {
        counter!(names::PLANNED_ASSETS_TOTAL, labels::REASON => reason).increment(1);
    }

    /// Sets the stale asset gauge.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small
    pub fn set_stale_assets(&self, count: usize) {
        gauge!(names::STALE_ASSETS).set(count as f64);
    }

    /// Sets the violated policy gauge.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small
    pub fn set_late_policies(&self, count: usize) {
        gauge!(names::LATE_POLICIES).set(count as f64);
    }

    /// Sets the in-flight gauge.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small
    pub fn set_in_flight(&self, count: usize) {
        gauge!(names::IN_FLIGHT_ASSETS).set(count as f64);
    }

    /// Records a completion callback (`succeeded`, `failed`, `orphaned`,
    /// `unknown`).
    pub fn record_completion(&self, outcome: &'static str) {
        counter!(names::COMPLETIONS_TOTAL, labels::OUTCOME => outcome).increment(1);
    }

    /// Records a failed submission.
    pub fn record_submission_failure(&self, backend: &'static str) {
        counter!(names::SUBMISSION_FAILURES_TOTAL, labels::BACKEND => backend).increment(1);
    }

    /// Records evicted in-flight keys.
    pub fn record_evictions(&self, count: usize) {
        counter!(names::IN_FLIGHT_EVICTIONS_TOTAL).increment(count as u64);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
///
/// ```rust
/// use fresco_flow::metrics::{ReconcileMetrics, TimingGuard};
///
/// let metrics = ReconcileMetrics::new();
/// {
///     let _guard = TimingGuard::new(|duration| metrics.observe_tick_duration(duration));
///     // Evaluate...
/// }
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_record_without_recorder() {
        let metrics = ReconcileMetrics::new();

        metrics.record_tick("idle");
        metrics.record_planned("policy");
        metrics.set_stale_assets(2);
        metrics.set_late_policies(1);
        metrics.set_in_flight(4);
        metrics.record_completion("orphaned");
        metrics.record_submission_failure("memory");
        metrics.record_evictions(2);
        metrics.observe_tick_duration(Duration::from_millis(3));
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded = None;
        {
            let _guard = TimingGuard::new(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(recorded.is_some_and(|d| d >= Duration::from_millis(10)));
    }
}
