//! Request patterns: the weighted catalog, its compiled form, and the
//! discrete weighted-choice selector.
//!
//! A pattern is a tree of steps. Descriptor form ([`Step`]) names servers by
//! string and deserializes from config; compiled form resolves every server
//! reference up front, so a dangling name fails at startup instead of
//! mid-run.

use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SimulationError, SimulationResult};
use crate::server::{Server, Topology};
use crate::sim::rng::sim_random_f64;

/// One step of a pattern, in descriptor form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Execute on one server, blocking the flow until done.
    Sequential {
        /// Name of the server the step runs on.
        server: String,
        /// CPU burst in milliseconds.
        #[serde(default)]
        cpu_ms: f64,
        /// RAM held for the step's duration, in GB.
        #[serde(default)]
        ram_gb: f64,
        /// Disk I/O volume in MB.
        #[serde(default)]
        disk_mb: f64,
        /// Network transfer volume in MB.
        #[serde(default)]
        net_mb: f64,
    },
    /// Run all children concurrently; the flow resumes once every child is
    /// done.
    Parallel {
        /// Concurrent child steps.
        children: Vec<Step>,
    },
    /// Spawn the child detached; the flow continues immediately.
    Async {
        /// The detached child step.
        child: Box<Step>,
    },
}

/// One pattern in descriptor form: an id, a selection weight, and the root
/// step list (executed in order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSpec {
    /// Unique pattern id.
    pub id: String,
    /// Relative selection weight. Weights need not sum to anything.
    pub weight: f64,
    /// Root steps, executed sequentially.
    pub steps: Vec<Step>,
}

/// Resource costs of one sequential step, in runtime units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepCosts {
    /// CPU burst duration.
    pub cpu: Duration,
    /// RAM held across the step, in GB.
    pub ram_gb: f64,
    /// Disk volume in MB.
    pub disk_mb: f64,
    /// Network volume in MB.
    pub net_mb: f64,
}

/// A step with its server reference resolved.
#[derive(Debug, Clone)]
pub(crate) enum CompiledStep {
    Sequential {
        server: Rc<Server>,
        costs: StepCosts,
    },
    Parallel {
        children: Vec<CompiledStep>,
    },
    Async {
        child: Box<CompiledStep>,
    },
}

/// A compiled pattern, shared by every flow instance that selects it.
#[derive(Debug)]
pub struct CompiledPattern {
    pub(crate) id: Rc<str>,
    pub(crate) steps: Vec<CompiledStep>,
}

impl CompiledPattern {
    /// The pattern's id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// A discrete distribution over indices, sampled by prefix sums and binary
/// search.
#[derive(Debug, Clone)]
pub struct WeightedChoice {
    prefix: Vec<f64>,
    total: f64,
    // Highest index with positive weight, used when rounding pushes a draw
    // past the final prefix.
    fallback: usize,
}

impl WeightedChoice {
    /// Build from raw weights. Every weight must be finite and non-negative,
    /// and the total must be positive.
    pub fn new(weights: &[f64]) -> SimulationResult<Self> {
        let mut prefix = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        let mut fallback = None;
        for (idx, &weight) in weights.iter().enumerate() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(SimulationError::Configuration(format!(
                    "weight at index {idx} must be finite and non-negative, got {weight}"
                )));
            }
            if weight > 0.0 {
                fallback = Some(idx);
            }
            total += weight;
            prefix.push(total);
        }
        let fallback = fallback.ok_or_else(|| {
            SimulationError::Configuration(
                "total selection weight must be positive".to_string(),
            )
        })?;
        Ok(Self {
            prefix,
            total,
            fallback,
        })
    }

    /// Map a uniform draw in `[0, 1)` to an index. Zero-weight entries are
    /// never selected.
    pub fn sample(&self, uniform: f64) -> usize {
        let value = uniform * self.total;
        let idx = self.prefix.partition_point(|&p| p <= value);
        if idx >= self.prefix.len() {
            self.fallback
        } else {
            idx
        }
    }

    /// Sample using the simulation RNG.
    pub fn sample_sim(&self) -> usize {
        self.sample(sim_random_f64())
    }

    /// The sum of all weights.
    pub fn total_weight(&self) -> f64 {
        self.total
    }
}

/// The compiled, weighted pattern catalog.
#[derive(Debug)]
pub struct PatternCatalog {
    patterns: Vec<Rc<CompiledPattern>>,
    selector: WeightedChoice,
}

impl PatternCatalog {
    /// Compile pattern specs against a topology, validating weights and
    /// server references.
    pub fn compile(specs: &[PatternSpec], topology: &Topology) -> SimulationResult<Self> {
        let mut seen = HashSet::new();
        let mut patterns = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.id.is_empty() {
                return Err(SimulationError::Configuration(
                    "pattern id must not be empty".to_string(),
                ));
            }
            if !seen.insert(spec.id.clone()) {
                return Err(SimulationError::Configuration(format!(
                    "duplicate pattern id '{}'",
                    spec.id
                )));
            }
            let mut steps = Vec::with_capacity(spec.steps.len());
            for step in &spec.steps {
                steps.push(compile_step(step, &spec.id, topology)?);
            }
            patterns.push(Rc::new(CompiledPattern {
                id: Rc::from(spec.id.as_str()),
                steps,
            }));
        }

        let weights: Vec<f64> = specs.iter().map(|spec| spec.weight).collect();
        let selector = WeightedChoice::new(&weights).map_err(|_| {
            SimulationError::Configuration(
                "pattern catalog has zero total weight; nothing can be selected".to_string(),
            )
        })?;

        Ok(Self { patterns, selector })
    }

    /// Draw one pattern with the simulation RNG.
    pub fn select(&self) -> &Rc<CompiledPattern> {
        &self.patterns[self.selector.sample_sim()]
    }

    /// All compiled patterns, in declaration order.
    pub fn patterns(&self) -> &[Rc<CompiledPattern>] {
        &self.patterns
    }

    /// The underlying selector.
    pub fn selector(&self) -> &WeightedChoice {
        &self.selector
    }
}

fn compile_step(
    step: &Step,
    pattern: &str,
    topology: &Topology,
) -> SimulationResult<CompiledStep> {
    match step {
        Step::Sequential {
            server,
            cpu_ms,
            ram_gb,
            disk_mb,
            net_mb,
        } => {
            for (label, cost) in [
                ("cpu_ms", cpu_ms),
                ("ram_gb", ram_gb),
                ("disk_mb", disk_mb),
                ("net_mb", net_mb),
            ] {
                if !cost.is_finite() || *cost < 0.0 {
                    return Err(SimulationError::Configuration(format!(
                        "pattern '{pattern}': {label} must be finite and non-negative, got {cost}"
                    )));
                }
            }
            let server = topology
                .get(server)
                .ok_or_else(|| SimulationError::UnknownServer {
                    pattern: pattern.to_string(),
                    server: server.clone(),
                })?;
            // A reservation larger than the server can ever grant would
            // stall forever at runtime.
            if *ram_gb > server.spec().ram_capacity_gb {
                return Err(SimulationError::Configuration(format!(
                    "pattern '{pattern}': ram_gb {ram_gb} exceeds server '{}' capacity {}",
                    server.spec().name,
                    server.spec().ram_capacity_gb
                )));
            }
            Ok(CompiledStep::Sequential {
                server: Rc::clone(server),
                costs: StepCosts {
                    cpu: Duration::from_secs_f64(cpu_ms / 1000.0),
                    ram_gb: *ram_gb,
                    disk_mb: *disk_mb,
                    net_mb: *net_mb,
                },
            })
        }
        Step::Parallel { children } => {
            let children = children
                .iter()
                .map(|child| compile_step(child, pattern, topology))
                .collect::<SimulationResult<Vec<_>>>()?;
            Ok(CompiledStep::Parallel { children })
        }
        Step::Async { child } => Ok(CompiledStep::Async {
            child: Box::new(compile_step(child, pattern, topology)?),
        }),
    }
}
