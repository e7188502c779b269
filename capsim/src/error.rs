//! Error types for simulation operations.

use thiserror::Error;

/// Errors surfaced by the simulation engine.
///
/// Configuration problems are fatal before the run begins. Contention and
/// horizon truncation are never errors; they are absorbed into metrics.
/// Resource-accounting invariant violations are programming errors and abort
/// via panic rather than flowing through this type.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Malformed topology, catalog, or scenario. The run never begins.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A pattern step references a server that is not in the topology.
    #[error("pattern '{pattern}' references unknown server '{server}'")]
    UnknownServer {
        /// The offending pattern id.
        pattern: String,
        /// The dangling server name.
        server: String,
    },

    /// The simulation world has been dropped and is no longer accessible.
    #[error("simulation has been shut down")]
    SimulationShutdown,

    /// The simulation is in an invalid state.
    #[error("invalid simulation state: {0}")]
    InvalidState(String),
}

/// A type alias for `Result<T, SimulationError>`.
pub type SimulationResult<T> = Result<T, SimulationError>;
