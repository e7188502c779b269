//! The arrival generator: spawns flows until the horizon.
//!
//! The first arrival fires at t=0; each subsequent gap is drawn from the
//! configured process. The horizon gates new arrivals only, it never stops
//! work already in flight.

use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SimulationResult;
use crate::flow::{spawn_flow, TaskSet};
use crate::metrics::MetricsHandle;
use crate::pattern::PatternCatalog;
use crate::sim::rng::sim_random_f64;
use crate::sim::world::WeakSimWorld;

/// How inter-arrival gaps are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalProcess {
    /// Exponentially distributed gaps (Poisson arrivals) at the configured
    /// mean rate.
    #[default]
    Poisson,
    /// A constant gap of `1 / rate`, for fully deterministic scenarios.
    Fixed,
}

impl ArrivalProcess {
    /// Draw the next inter-arrival gap for `rate` requests per second.
    pub(crate) fn next_gap(&self, rate: f64) -> Duration {
        match self {
            ArrivalProcess::Fixed => Duration::from_secs_f64(1.0 / rate),
            ArrivalProcess::Poisson => {
                let uniform = sim_random_f64();
                // Inverse-CDF of the exponential distribution. 1 - u keeps
                // the argument of ln strictly positive.
                Duration::from_secs_f64(-(1.0 - uniform).ln() / rate)
            }
        }
    }
}

/// Run the arrival loop until the horizon passes.
pub(crate) async fn generate_arrivals(
    world: WeakSimWorld,
    metrics: MetricsHandle,
    catalog: Rc<PatternCatalog>,
    tasks: TaskSet,
    process: ArrivalProcess,
    rate: f64,
    horizon: Duration,
) -> SimulationResult<()> {
    loop {
        let now = world.now()?;
        if now >= horizon {
            break;
        }
        let pattern = Rc::clone(catalog.select());
        tracing::trace!(pattern = %pattern.id(), ?now, "arrival");
        spawn_flow(world.clone(), metrics.clone(), pattern, &tasks);
        world.sleep(process.next_gap(rate))?.await?;
    }
    tracing::debug!(?horizon, "arrival generator stopped");
    Ok(())
}
