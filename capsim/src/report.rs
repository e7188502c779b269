//! The run snapshot and its JSON export.
//!
//! A [`Snapshot`] is built once from final aggregator state and is fully
//! self-contained: serializing it twice yields byte-identical output. Maps
//! are `BTreeMap`s and every float is rounded at build time, so no ordering
//! or formatting depends on anything outside the snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arrivals::ArrivalProcess;
use crate::config::{DrainPolicy, ScenarioConfig};
use crate::error::{SimulationError, SimulationResult};
use crate::metrics::MetricsHandle;
use crate::server::Topology;

/// Run-level CPU utilization above which a server is flagged as a
/// bottleneck.
pub const CPU_BOTTLENECK_PERCENT: f64 = 70.0;

/// The scenario options a snapshot was produced under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSummary {
    /// Mean arrival rate in requests per second.
    pub arrival_rate: f64,
    /// Arrival window length in seconds.
    pub horizon_seconds: f64,
    /// The seed the run actually used.
    pub random_seed: u64,
    /// Drain behavior at the horizon.
    pub drain_policy: DrainPolicy,
    /// Inter-arrival gap distribution.
    pub arrival_process: ArrivalProcess,
}

/// One server's static capacities, echoed into the export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSpecReport {
    /// CPU slot count.
    pub cpu_capacity: usize,
    /// RAM capacity in GB.
    pub ram_capacity_gb: f64,
    /// Disk slot count.
    pub disk_queue_capacity: usize,
    /// Network bandwidth in Mbps.
    pub network_bandwidth_mbps: f64,
}

/// One server-second of the utilization timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondReport {
    /// CPU time consumed this second, rounded to 3 decimals.
    pub cpu_usage_seconds: f64,
    /// CPU time as a percentage of capacity, rounded to 2 decimals.
    pub cpu_utilization_percent: f64,
    /// Peak committed RAM this second in GB, rounded to 2 decimals.
    pub ram_used_gb: f64,
    /// Peak RAM as a percentage of capacity, rounded to 2 decimals.
    pub ram_utilization_percent: f64,
    /// Peak disk wait-queue length this second.
    pub disk_queue_length: usize,
    /// Peak in-flight steps this second.
    pub active_requests: u64,
    /// Steps started this second.
    pub requests_started: u64,
    /// Steps completed this second.
    pub requests_completed: u64,
}

/// One server's section of the export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerReport {
    /// Static capacities.
    pub specs: ServerSpecReport,
    /// Per-second timeline, zero-filled for idle seconds. Keyed by second.
    pub per_second_data: BTreeMap<u64, SecondReport>,
}

/// Latency aggregates over completed flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Mean latency in seconds, rounded to 3 decimals.
    pub average_seconds: f64,
    /// 95th percentile in seconds, rounded to 3 decimals.
    pub p95_seconds: f64,
    /// 99th percentile in seconds, rounded to 3 decimals.
    pub p99_seconds: f64,
}

/// Per-pattern outcome counts and latency aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSummary {
    /// Flows that selected this pattern.
    pub arrivals: u64,
    /// Flows that completed.
    pub completions: u64,
    /// Completed over selected, as a percentage rounded to 2 decimals.
    pub success_rate_percent: f64,
    /// Mean latency of completions in seconds, rounded to 3 decimals.
    pub average_latency_seconds: f64,
    /// 95th percentile latency in seconds, rounded to 3 decimals.
    pub p95_seconds: f64,
    /// 99th percentile latency in seconds, rounded to 3 decimals.
    pub p99_seconds: f64,
}

/// A server flagged for sustained CPU saturation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    /// Server name.
    pub server: String,
    /// Run-level CPU utilization percentage, rounded to 2 decimals.
    pub cpu_utilization_percent: f64,
}

/// Flow-level outcome of the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Flows spawned.
    pub total_requests: u64,
    /// Flows completed.
    pub completed_requests: u64,
    /// Flows cut off at a truncating horizon.
    pub incomplete_requests: u64,
    /// Completed over spawned, as a percentage rounded to 2 decimals.
    pub success_rate_percent: f64,
    /// Latency aggregates over completed flows only.
    pub latency: LatencySummary,
    /// Per-pattern breakdown, keyed by pattern id.
    pub patterns: BTreeMap<String, PatternSummary>,
    /// Servers whose run-level CPU utilization exceeds the bottleneck
    /// threshold, in topology order.
    pub bottlenecks: Vec<Bottleneck>,
}

/// A complete, self-contained export of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The options the run used.
    pub scenario: ScenarioSummary,
    /// Per-server timelines, keyed by server name.
    pub servers: BTreeMap<String, ServerReport>,
    /// Flow-level summary.
    pub summary: RunSummary,
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Percentile by sorted-index: `sorted[floor(len * q)]`, clamped to the last
/// sample.
fn percentile(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * quantile) as usize).min(sorted.len() - 1);
    sorted[idx]
}

impl Snapshot {
    /// Build a snapshot from final aggregator state.
    pub fn build(
        config: &ScenarioConfig,
        seed: u64,
        topology: &Topology,
        metrics: &MetricsHandle,
    ) -> Self {
        let state = metrics.borrow();
        let horizon_secs = config.horizon().as_secs();

        // Complete drains run past the horizon; the timeline covers the
        // later of the two.
        let last_second = state
            .buckets()
            .keys()
            .map(|&(_, second)| second)
            .max()
            .unwrap_or(0)
            .max(horizon_secs);

        let mut servers = BTreeMap::new();
        let mut bottlenecks = Vec::new();
        for server in topology.servers() {
            let spec = server.spec();
            let mut per_second_data = BTreeMap::new();
            let mut total_cpu_seconds = 0.0;
            for second in 0..=last_second {
                let bucket = state
                    .buckets()
                    .get(&(server.id(), second))
                    .cloned()
                    .unwrap_or_default();
                total_cpu_seconds += bucket.cpu_seconds;
                per_second_data.insert(
                    second,
                    SecondReport {
                        cpu_usage_seconds: round_to(bucket.cpu_seconds, 3),
                        cpu_utilization_percent: round_to(
                            bucket.cpu_seconds / spec.cpu_capacity as f64 * 100.0,
                            2,
                        ),
                        ram_used_gb: round_to(bucket.ram_peak_gb, 2),
                        ram_utilization_percent: round_to(
                            bucket.ram_peak_gb / spec.ram_capacity_gb * 100.0,
                            2,
                        ),
                        disk_queue_length: bucket.disk_queue_len,
                        active_requests: bucket.active_requests,
                        requests_started: bucket.requests_started,
                        requests_completed: bucket.requests_completed,
                    },
                );
            }

            let run_cpu_percent =
                total_cpu_seconds / config.horizon_seconds / spec.cpu_capacity as f64 * 100.0;
            if run_cpu_percent > CPU_BOTTLENECK_PERCENT {
                bottlenecks.push(Bottleneck {
                    server: spec.name.clone(),
                    cpu_utilization_percent: round_to(run_cpu_percent, 2),
                });
            }

            servers.insert(
                spec.name.clone(),
                ServerReport {
                    specs: ServerSpecReport {
                        cpu_capacity: spec.cpu_capacity,
                        ram_capacity_gb: spec.ram_capacity_gb,
                        disk_queue_capacity: spec.disk_queue_capacity,
                        network_bandwidth_mbps: spec.network_bandwidth_mbps,
                    },
                    per_second_data,
                },
            );
        }

        let mut sorted_latencies = state.latencies.clone();
        sorted_latencies.sort_by(|a, b| a.total_cmp(b));
        let average = if sorted_latencies.is_empty() {
            0.0
        } else {
            sorted_latencies.iter().sum::<f64>() / sorted_latencies.len() as f64
        };

        let patterns = state
            .per_pattern()
            .iter()
            .map(|(id, stats)| {
                let mut sorted = stats.latencies.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let average = if sorted.is_empty() {
                    0.0
                } else {
                    sorted.iter().sum::<f64>() / sorted.len() as f64
                };
                let success_rate = if stats.arrivals == 0 {
                    0.0
                } else {
                    stats.completions as f64 / stats.arrivals as f64 * 100.0
                };
                (
                    id.clone(),
                    PatternSummary {
                        arrivals: stats.arrivals,
                        completions: stats.completions,
                        success_rate_percent: round_to(success_rate, 2),
                        average_latency_seconds: round_to(average, 3),
                        p95_seconds: round_to(percentile(&sorted, 0.95), 3),
                        p99_seconds: round_to(percentile(&sorted, 0.99), 3),
                    },
                )
            })
            .collect();

        let success_rate = if state.arrivals == 0 {
            0.0
        } else {
            state.completions as f64 / state.arrivals as f64 * 100.0
        };

        Self {
            scenario: ScenarioSummary {
                arrival_rate: config.arrival_rate,
                horizon_seconds: config.horizon_seconds,
                random_seed: seed,
                drain_policy: config.drain_policy,
                arrival_process: config.arrival_process,
            },
            servers,
            summary: RunSummary {
                total_requests: state.arrivals,
                completed_requests: state.completions,
                incomplete_requests: state.incomplete,
                success_rate_percent: round_to(success_rate, 2),
                latency: LatencySummary {
                    average_seconds: round_to(average, 3),
                    p95_seconds: round_to(percentile(&sorted_latencies, 0.95), 3),
                    p99_seconds: round_to(percentile(&sorted_latencies, 0.99), 3),
                },
                patterns,
                bottlenecks,
            },
        }
    }

    /// Serialize to pretty-printed JSON. Output for the same snapshot is
    /// byte-identical across calls.
    pub fn to_json(&self) -> SimulationResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|error| SimulationError::InvalidState(error.to_string()))
    }
}
