//! Scenario configuration: structured descriptors for the topology, the
//! pattern catalog, and run options.
//!
//! Validation happens before any event is scheduled. Scalar options are
//! checked here; server specs and pattern step trees are checked when the
//! topology and catalog are built from them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::arrivals::ArrivalProcess;
use crate::error::{SimulationError, SimulationResult};
use crate::pattern::PatternSpec;
use crate::server::ServerSpec;

/// What happens to in-flight flows when the horizon is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Stop new arrivals, then let every in-flight flow run to completion.
    /// The reported timeline extends past the horizon.
    #[default]
    Complete,
    /// Cut the run at the horizon exactly. In-flight flows are aborted,
    /// their resources released, and they are counted as incomplete with no
    /// latency sample.
    Truncate,
}

/// A full scenario: topology, catalog, and run options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// The server topology.
    pub servers: Vec<ServerSpec>,
    /// The weighted pattern catalog.
    pub patterns: Vec<PatternSpec>,
    /// Mean arrival rate in requests per second.
    pub arrival_rate: f64,
    /// Arrival window length in seconds.
    pub horizon_seconds: f64,
    /// RNG seed. `None` lets the runner pick one and report it.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Drain behavior at the horizon.
    #[serde(default)]
    pub drain_policy: DrainPolicy,
    /// Inter-arrival gap distribution.
    #[serde(default)]
    pub arrival_process: ArrivalProcess,
}

impl ScenarioConfig {
    /// Parse a scenario from JSON.
    pub fn from_json(json: &str) -> SimulationResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|error| SimulationError::Configuration(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check scalar options. Topology and catalog contents are validated
    /// when they are built.
    pub fn validate(&self) -> SimulationResult<()> {
        if !self.arrival_rate.is_finite() || self.arrival_rate <= 0.0 {
            return Err(SimulationError::Configuration(format!(
                "arrival_rate must be positive, got {}",
                self.arrival_rate
            )));
        }
        if !self.horizon_seconds.is_finite() || self.horizon_seconds <= 0.0 {
            return Err(SimulationError::Configuration(format!(
                "horizon_seconds must be positive, got {}",
                self.horizon_seconds
            )));
        }
        Ok(())
    }

    /// The horizon as a duration.
    pub fn horizon(&self) -> Duration {
        Duration::from_secs_f64(self.horizon_seconds)
    }
}
