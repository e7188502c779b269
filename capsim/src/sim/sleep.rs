//! Sleep functionality for simulation time.
//!
//! Sleeping in simulation time is an async future that integrates with the
//! event system: the future completes when its Timer event is processed by
//! the simulation engine.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::SimulationResult;
use crate::sim::world::WeakSimWorld;

/// Future that completes after a specified simulation-time duration.
///
/// Created by [`SimWorld::sleep`](crate::SimWorld::sleep), which schedules a
/// Timer event for the duration; the future registers a waker and returns
/// `Poll::Pending` until that event fires.
pub struct SleepFuture {
    /// Weak reference to the simulation world
    sim: WeakSimWorld,
    /// Unique identifier for this sleep task
    task_id: u64,
    /// Whether this future has already completed
    completed: bool,
}

impl SleepFuture {
    /// Creates a new sleep future.
    ///
    /// Typically called by `SimWorld::sleep`, not constructed directly.
    pub(crate) fn new(sim: WeakSimWorld, task_id: u64) -> Self {
        Self {
            sim,
            task_id,
            completed: false,
        }
    }
}

impl Future for SleepFuture {
    type Output = SimulationResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.completed {
            return Poll::Ready(Ok(()));
        }

        let sim = match self.sim.upgrade() {
            Ok(sim) => sim,
            Err(e) => return Poll::Ready(Err(e)),
        };

        if sim.is_task_awake(self.task_id) {
            self.completed = true;
            Poll::Ready(Ok(()))
        } else {
            sim.register_task_waker(self.task_id, cx.waker().clone());
            Poll::Pending
        }
    }
}
