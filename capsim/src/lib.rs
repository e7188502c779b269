//! # Capsim
//!
//! A deterministic discrete-event simulator for capacity planning of
//! multi-tier service topologies.
//!
//! A scenario describes a set of servers with finite CPU, RAM, disk, and
//! network capacity, a weighted catalog of request patterns (trees of
//! sequential, fork-join parallel, and fire-and-forget steps), and an
//! arrival process. The runner replays the synthetic traffic on a single
//! logical clock and reports per-second utilization timelines, latency
//! percentiles, and bottleneck servers.
//!
//! Runs are reproducible: the same scenario and seed produce the same
//! event schedule and a byte-identical export.
//!
//! ```no_run
//! use capsim::{presets, run_scenario};
//!
//! let mut config = presets::demo_scenario(2.0, 60.0);
//! config.random_seed = Some(42);
//! let report = run_scenario(config)?;
//! println!("{}", report.snapshot.to_json()?);
//! # Ok::<(), capsim::SimulationError>(())
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// The arrival generator and inter-arrival gap distributions.
pub mod arrivals;
/// Scenario configuration descriptors and validation.
pub mod config;
/// Error types and utilities for simulation operations.
pub mod error;
/// The flow executor driving requests through pattern step trees.
mod flow;
/// Per-second metrics aggregation.
pub mod metrics;
/// Pattern catalog, step trees, and the weighted selector.
pub mod pattern;
/// A ready-made demo topology and traffic mix.
pub mod presets;
/// The run snapshot and its JSON export.
pub mod report;
/// The scenario runner and its cooperative event loop.
pub mod runner;
/// Servers, resource pools, and step execution.
pub mod server;
/// Deterministic discrete-event engine internals.
pub mod sim;

// Public API exports
pub use arrivals::ArrivalProcess;
pub use config::{DrainPolicy, ScenarioConfig};
pub use error::{SimulationError, SimulationResult};
pub use metrics::{MetricsBucket, MetricsHandle, PatternStats};
pub use pattern::{PatternCatalog, PatternSpec, Step, WeightedChoice};
pub use report::{RunSummary, Snapshot};
pub use runner::{run_scenario, RunReport, ScenarioRunner};
pub use server::{ServerSpec, Topology};
pub use sim::{SimWorld, WeakSimWorld};
