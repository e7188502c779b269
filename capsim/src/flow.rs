//! The flow executor: drives one request through its pattern's step tree.
//!
//! Sequential steps run inline. Parallel groups spawn each child as its own
//! local task and AND-join them, so the group costs the maximum of its
//! children's durations rather than their sum. Async steps spawn the child
//! detached; the parent's completion timestamp never waits on it.
//!
//! Every spawned task is registered in a [`TaskSet`] so a truncating run can
//! abort the lot at the horizon. Aborted tasks drop their resource guards,
//! which returns the capacity they held.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use tokio::task::{AbortHandle, JoinHandle};

use crate::error::{SimulationError, SimulationResult};
use crate::metrics::MetricsHandle;
use crate::pattern::{CompiledPattern, CompiledStep};
use crate::sim::world::WeakSimWorld;

/// Registry of every task spawned on behalf of flows.
///
/// The runner polls [`TaskSet::all_finished`] when draining and calls
/// [`TaskSet::abort_all`] when truncating.
#[derive(Debug, Clone, Default)]
pub(crate) struct TaskSet {
    inner: Rc<RefCell<TaskSetInner>>,
}

#[derive(Debug, Default)]
struct TaskSetInner {
    handles: Vec<JoinHandle<()>>,
    aborts: Vec<AbortHandle>,
}

impl TaskSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn register(&self, handle: JoinHandle<()>) {
        let mut inner = self.inner.borrow_mut();
        inner.aborts.push(handle.abort_handle());
        inner.handles.push(handle);
    }

    fn register_abort(&self, abort: AbortHandle) {
        self.inner.borrow_mut().aborts.push(abort);
    }

    /// True once every registered task has run to completion or been
    /// aborted.
    pub(crate) fn all_finished(&self) -> bool {
        self.inner
            .borrow()
            .handles
            .iter()
            .all(|handle| handle.is_finished())
    }

    /// Abort every registered task. Idempotent; finished tasks are
    /// unaffected.
    pub(crate) fn abort_all(&self) {
        for abort in &self.inner.borrow().aborts {
            abort.abort();
        }
    }
}

/// Spawn one flow for `pattern` as a root task.
pub(crate) fn spawn_flow(
    world: WeakSimWorld,
    metrics: MetricsHandle,
    pattern: Rc<CompiledPattern>,
    tasks: &TaskSet,
) {
    let tasks_clone = tasks.clone();
    let handle = tokio::task::spawn_local(async move {
        if let Err(error) = run_flow(world, metrics, pattern, tasks_clone).await {
            // Shutdown mid-flow only happens when a truncating run tears the
            // world down; the flow is already counted as incomplete.
            tracing::debug!(%error, "flow ended early");
        }
    });
    tasks.register(handle);
}

async fn run_flow(
    world: WeakSimWorld,
    metrics: MetricsHandle,
    pattern: Rc<CompiledPattern>,
    tasks: TaskSet,
) -> SimulationResult<()> {
    let arrival = world.now()?;
    metrics.flow_arrived(&pattern.id);
    tracing::debug!(pattern = %pattern.id, ?arrival, "flow started");

    for step in &pattern.steps {
        execute_step(
            world.clone(),
            metrics.clone(),
            step.clone(),
            Rc::clone(&pattern.id),
            tasks.clone(),
        )
        .await?;
    }

    let completion = world.now()?;
    metrics.flow_completed(&pattern.id, completion - arrival);
    tracing::debug!(pattern = %pattern.id, ?completion, "flow completed");
    Ok(())
}

/// Execute one step of a flow. Boxed because parallel and async variants
/// recurse.
fn execute_step(
    world: WeakSimWorld,
    metrics: MetricsHandle,
    step: CompiledStep,
    pattern: Rc<str>,
    tasks: TaskSet,
) -> Pin<Box<dyn Future<Output = SimulationResult<()>>>> {
    Box::pin(async move {
        match step {
            CompiledStep::Sequential { server, costs } => {
                server.execute_step(&world, &metrics, &costs, &pattern).await
            }
            CompiledStep::Parallel { children } => {
                let mut handles = Vec::with_capacity(children.len());
                for child in children {
                    let handle = tokio::task::spawn_local(execute_step(
                        world.clone(),
                        metrics.clone(),
                        child,
                        Rc::clone(&pattern),
                        tasks.clone(),
                    ));
                    tasks.register_abort(handle.abort_handle());
                    handles.push(handle);
                }
                // AND-join: wait for every child even if one errors, so each
                // child's resource guards run their course.
                let mut first_error = None;
                for handle in handles {
                    match handle.await {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => {
                            if first_error.is_none() {
                                first_error = Some(error);
                            }
                        }
                        Err(join_error) if join_error.is_cancelled() => {
                            if first_error.is_none() {
                                first_error = Some(SimulationError::SimulationShutdown);
                            }
                        }
                        Err(join_error) => {
                            if first_error.is_none() {
                                first_error = Some(SimulationError::InvalidState(format!(
                                    "parallel child panicked: {join_error}"
                                )));
                            }
                        }
                    }
                }
                match first_error {
                    Some(error) => Err(error),
                    None => Ok(()),
                }
            }
            CompiledStep::Async { child } => {
                let child_pattern = Rc::clone(&pattern);
                let child_tasks = tasks.clone();
                let handle = tokio::task::spawn_local(async move {
                    if let Err(error) = execute_step(
                        world,
                        metrics,
                        *child,
                        child_pattern,
                        child_tasks,
                    )
                    .await
                    {
                        tracing::debug!(%error, "detached step ended early");
                    }
                });
                tasks.register(handle);
                Ok(())
            }
        }
    })
}
