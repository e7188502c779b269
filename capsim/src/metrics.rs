//! Per-second metrics aggregation.
//!
//! Buckets are keyed by `(server, second)` in a `BTreeMap`, so iteration
//! order is fixed and exports of the same state are byte-identical. A CPU
//! burst that straddles a second boundary contributes its partial time to
//! every second it spans; RAM and disk-queue figures are within-second
//! peaks.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use crate::server::ServerId;

/// Metrics accumulated for one server during one simulated second.
#[derive(Debug, Default, Clone)]
pub struct MetricsBucket {
    /// CPU time consumed within this second, in seconds.
    pub cpu_seconds: f64,
    /// Peak committed RAM observed within this second, in GB.
    pub ram_peak_gb: f64,
    /// Peak disk wait-queue length sampled within this second.
    pub disk_queue_len: usize,
    /// Peak number of steps in flight on this server within this second.
    pub active_requests: u64,
    /// Steps that began within this second.
    pub requests_started: u64,
    /// Steps that finished within this second.
    pub requests_completed: u64,
}

/// Flow-level statistics for one pattern.
#[derive(Debug, Default, Clone)]
pub struct PatternStats {
    /// Flows that selected this pattern.
    pub arrivals: u64,
    /// Flows that ran to completion.
    pub completions: u64,
    /// Completion latencies in seconds, in completion order.
    pub latencies: Vec<f64>,
}

/// The full aggregator state.
#[derive(Debug, Default)]
pub struct MetricsState {
    pub(crate) buckets: BTreeMap<(ServerId, u64), MetricsBucket>,
    active_steps: BTreeMap<ServerId, u64>,
    /// Flows spawned by the arrival generator.
    pub arrivals: u64,
    /// Flows that ran to completion.
    pub completions: u64,
    /// Flows still in flight when a truncating run ended.
    pub incomplete: u64,
    /// All completion latencies in seconds, in completion order.
    pub latencies: Vec<f64>,
    pub(crate) per_pattern: BTreeMap<String, PatternStats>,
}

impl MetricsState {
    fn bucket(&mut self, server: ServerId, at: Duration) -> &mut MetricsBucket {
        self.buckets.entry((server, at.as_secs())).or_default()
    }

    /// Buckets in `(server, second)` order.
    pub fn buckets(&self) -> &BTreeMap<(ServerId, u64), MetricsBucket> {
        &self.buckets
    }

    /// Per-pattern statistics, keyed by pattern id.
    pub fn per_pattern(&self) -> &BTreeMap<String, PatternStats> {
        &self.per_pattern
    }
}

/// Cloneable handle to the shared aggregator.
///
/// Every flow task holds one; all mutation funnels through these methods.
#[derive(Debug, Clone, Default)]
pub struct MetricsHandle {
    inner: Rc<RefCell<MetricsState>>,
}

impl MetricsHandle {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn borrow(&self) -> Ref<'_, MetricsState> {
        self.inner.borrow()
    }

    /// Record a flow arrival for `pattern`.
    pub(crate) fn flow_arrived(&self, pattern: &str) {
        let mut state = self.inner.borrow_mut();
        state.arrivals += 1;
        state
            .per_pattern
            .entry(pattern.to_string())
            .or_default()
            .arrivals += 1;
    }

    /// Record a flow completion with its end-to-end latency.
    pub(crate) fn flow_completed(&self, pattern: &str, latency: Duration) {
        let mut state = self.inner.borrow_mut();
        state.completions += 1;
        state.latencies.push(latency.as_secs_f64());
        let stats = state.per_pattern.entry(pattern.to_string()).or_default();
        stats.completions += 1;
        stats.latencies.push(latency.as_secs_f64());
    }

    /// Record flows cut off by a truncating horizon. They carry no latency
    /// sample.
    pub(crate) fn mark_incomplete(&self) {
        let mut state = self.inner.borrow_mut();
        state.incomplete = state.arrivals - state.completions;
    }

    /// A step began on `server`. Bumps the per-second start counter and the
    /// in-flight peak.
    pub(crate) fn step_started(&self, server: ServerId, at: Duration) {
        let mut state = self.inner.borrow_mut();
        let active = state.active_steps.entry(server).or_insert(0);
        *active += 1;
        let active = *active;
        let bucket = state.bucket(server, at);
        bucket.requests_started += 1;
        bucket.active_requests = bucket.active_requests.max(active);
    }

    /// A step finished on `server`.
    pub(crate) fn step_completed(&self, server: ServerId, at: Duration) {
        let mut state = self.inner.borrow_mut();
        if let Some(active) = state.active_steps.get_mut(&server) {
            *active = active.saturating_sub(1);
        }
        state.bucket(server, at).requests_completed += 1;
    }

    /// Attribute a finished CPU burst to every second it spans.
    pub(crate) fn add_cpu_time(&self, server: ServerId, start: Duration, end: Duration) {
        let mut state = self.inner.borrow_mut();
        let mut cursor = start;
        while cursor < end {
            let second_end = Duration::from_secs(cursor.as_secs() + 1);
            let slice_end = end.min(second_end);
            state.bucket(server, cursor).cpu_seconds += (slice_end - cursor).as_secs_f64();
            cursor = slice_end;
        }
    }

    /// Observe the committed-RAM level after a reservation.
    pub(crate) fn observe_ram(&self, server: ServerId, at: Duration, used_gb: f64) {
        let mut state = self.inner.borrow_mut();
        let bucket = state.bucket(server, at);
        bucket.ram_peak_gb = bucket.ram_peak_gb.max(used_gb);
    }

    /// Observe the disk wait-queue length at acquisition time.
    pub(crate) fn sample_disk_queue(&self, server: ServerId, at: Duration, len: usize) {
        let mut state = self.inner.borrow_mut();
        let bucket = state.bucket(server, at);
        bucket.disk_queue_len = bucket.disk_queue_len.max(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: ServerId = ServerId(0);

    #[test]
    fn cpu_time_splits_across_second_boundaries() {
        let metrics = MetricsHandle::new();
        // 0.8s .. 2.1s: 0.2s in second 0, 1.0s in second 1, 0.1s in second 2.
        metrics.add_cpu_time(
            SERVER,
            Duration::from_millis(800),
            Duration::from_millis(2100),
        );

        let state = metrics.borrow();
        let cpu_at = |second: u64| state.buckets[&(SERVER, second)].cpu_seconds;
        assert!((cpu_at(0) - 0.2).abs() < 1e-9);
        assert!((cpu_at(1) - 1.0).abs() < 1e-9);
        assert!((cpu_at(2) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn cpu_time_within_one_second_stays_there() {
        let metrics = MetricsHandle::new();
        metrics.add_cpu_time(
            SERVER,
            Duration::from_millis(100),
            Duration::from_millis(350),
        );

        let state = metrics.borrow();
        assert_eq!(state.buckets.len(), 1);
        assert!((state.buckets[&(SERVER, 0)].cpu_seconds - 0.25).abs() < 1e-9);
    }

    #[test]
    fn active_requests_tracks_in_flight_peak() {
        let metrics = MetricsHandle::new();
        let at = Duration::from_millis(500);

        metrics.step_started(SERVER, at);
        metrics.step_started(SERVER, at);
        metrics.step_completed(SERVER, at);
        metrics.step_started(SERVER, at);

        let state = metrics.borrow();
        let bucket = &state.buckets[&(SERVER, 0)];
        assert_eq!(bucket.requests_started, 3);
        assert_eq!(bucket.requests_completed, 1);
        assert_eq!(bucket.active_requests, 2);
    }

    #[test]
    fn flow_stats_split_per_pattern() {
        let metrics = MetricsHandle::new();
        metrics.flow_arrived("browse");
        metrics.flow_arrived("browse");
        metrics.flow_arrived("checkout");
        metrics.flow_completed("browse", Duration::from_millis(150));
        metrics.mark_incomplete();

        let state = metrics.borrow();
        assert_eq!(state.arrivals, 3);
        assert_eq!(state.completions, 1);
        assert_eq!(state.incomplete, 2);
        assert_eq!(state.latencies, vec![0.15]);
        assert_eq!(state.per_pattern["browse"].arrivals, 2);
        assert_eq!(state.per_pattern["browse"].completions, 1);
        assert_eq!(state.per_pattern["checkout"].completions, 0);
    }
}
