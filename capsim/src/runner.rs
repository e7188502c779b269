//! The scenario runner: owns the runtime, drives the event loop, and
//! produces the final report.
//!
//! Everything runs on a single-threaded tokio runtime with a `LocalSet`.
//! The driver interleaves the engine and the workload cooperatively: it
//! processes one simulation event, then yields so every task woken by that
//! event runs to its next suspension point before the clock moves again.
//! That one-event-per-yield cadence is what keeps same-instant FIFO
//! semantics intact.

use std::rc::Rc;

use tokio::task::JoinHandle;

use crate::arrivals::generate_arrivals;
use crate::config::{DrainPolicy, ScenarioConfig};
use crate::error::{SimulationError, SimulationResult};
use crate::flow::TaskSet;
use crate::metrics::MetricsHandle;
use crate::pattern::PatternCatalog;
use crate::report::Snapshot;
use crate::server::Topology;
use crate::sim::events::Event;
use crate::sim::world::SimWorld;

/// Iterations without events or task progress before the run is declared
/// stuck.
const STALL_LIMIT: u32 = 10;

/// Iterations allowed for aborted tasks to unwind after a truncating cut.
const ABORT_DRAIN_LIMIT: u32 = 1000;

/// The outcome of one run.
#[derive(Debug)]
pub struct RunReport {
    /// The full metrics export.
    pub snapshot: Snapshot,
    /// The seed the run used. Re-running with this seed reproduces the run
    /// exactly.
    pub seed: u64,
    /// Total simulation events processed.
    pub events_processed: u64,
}

/// Flags a run where tasks are waiting but nothing will ever wake them.
#[derive(Debug)]
struct StallDetector {
    no_progress: u32,
    limit: u32,
}

impl StallDetector {
    fn new(limit: u32) -> Self {
        Self {
            no_progress: 0,
            limit,
        }
    }

    fn check(&mut self, made_progress: bool) -> bool {
        if made_progress {
            self.no_progress = 0;
        } else {
            self.no_progress += 1;
        }
        self.no_progress >= self.limit
    }
}

/// Runs scenarios on a dedicated single-threaded runtime.
#[derive(Debug)]
pub struct ScenarioRunner {
    config: ScenarioConfig,
}

impl ScenarioRunner {
    /// Validate the scenario's scalar options and wrap it for running.
    pub fn new(config: ScenarioConfig) -> SimulationResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run the scenario to its terminal state and return the report.
    ///
    /// Blocks the calling thread. With an explicit seed the run is fully
    /// reproducible; without one a seed is drawn and reported.
    pub fn run(&self) -> SimulationResult<RunReport> {
        let seed = self.config.random_seed.unwrap_or_else(rand::random);
        tracing::info!(seed, "starting run");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|error| {
                SimulationError::InvalidState(format!("failed to build runtime: {error}"))
            })?;
        let local = tokio::task::LocalSet::new();
        local.block_on(&runtime, drive(&self.config, seed))
    }
}

/// Validate and run `config` in one call.
pub fn run_scenario(config: ScenarioConfig) -> SimulationResult<RunReport> {
    ScenarioRunner::new(config)?.run()
}

async fn drive(config: &ScenarioConfig, seed: u64) -> SimulationResult<RunReport> {
    let mut world = SimWorld::new_with_seed(seed);
    let topology = Topology::build(&config.servers)?;
    let catalog = Rc::new(PatternCatalog::compile(&config.patterns, &topology)?);
    let metrics = MetricsHandle::new();
    let tasks = TaskSet::new();
    let horizon = config.horizon();

    // Scheduled before anything else, so at the horizon instant the marker
    // sorts ahead of every workload event and the cut is exact.
    if config.drain_policy == DrainPolicy::Truncate {
        world.schedule_event_at(Event::Horizon, horizon);
    }

    let generator: JoinHandle<SimulationResult<()>> = tokio::task::spawn_local(generate_arrivals(
        world.downgrade(),
        metrics.clone(),
        Rc::clone(&catalog),
        tasks.clone(),
        config.arrival_process,
        config.arrival_rate,
        horizon,
    ));

    let mut detector = StallDetector::new(STALL_LIMIT);
    let mut truncated = false;
    loop {
        // Every task woken since the last step must reach its next
        // suspension before the clock moves; the first pass lets the
        // generator schedule its initial events ahead of any marker.
        tokio::task::yield_now().await;

        let mut made_progress = false;
        if world.has_pending_events() {
            world.step();
            made_progress = true;
            if config.drain_policy == DrainPolicy::Truncate && world.current_time() >= horizon {
                truncated = true;
                break;
            }
        }

        let workload_done = generator.is_finished() && tasks.all_finished();
        if workload_done && !world.has_pending_events() {
            break;
        }

        if detector.check(made_progress) {
            return Err(SimulationError::InvalidState(format!(
                "simulation stalled with seed {seed}: tasks pending but no events scheduled"
            )));
        }
    }

    if truncated {
        tracing::debug!(?horizon, "truncating at horizon");
        generator.abort();
        tasks.abort_all();
        let mut drain_iterations = 0;
        while !(generator.is_finished() && tasks.all_finished()) {
            drain_iterations += 1;
            if drain_iterations > ABORT_DRAIN_LIMIT {
                return Err(SimulationError::InvalidState(
                    "aborted tasks failed to unwind after truncation".to_string(),
                ));
            }
            tokio::task::yield_now().await;
        }
        metrics.mark_incomplete();
    } else {
        match generator.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SimulationError::InvalidState(
                    "arrival generator panicked".to_string(),
                ))
            }
        }
    }

    let events_processed = world.events_processed();
    let snapshot = Snapshot::build(config, seed, &topology, &metrics);
    tracing::info!(
        seed,
        events_processed,
        arrivals = snapshot.summary.total_requests,
        completed = snapshot.summary.completed_requests,
        "run finished"
    );
    Ok(RunReport {
        snapshot,
        seed,
        events_processed,
    })
}
