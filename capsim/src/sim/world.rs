//! Core simulation world and coordination logic.
//!
//! The central `SimWorld` coordinator owns the logical clock and the event
//! queue, and hands out handle-based access so futures can register wakers
//! without borrow conflicts.

use std::{
    cell::RefCell,
    collections::HashSet,
    rc::{Rc, Weak},
    task::Waker,
    time::Duration,
};

use crate::error::{SimulationError, SimulationResult};
use crate::sim::rng::{reset_sim_rng, set_sim_seed};

use super::{
    events::{Event, EventQueue, ScheduledEvent},
    sleep::SleepFuture,
    wakers::WakerRegistry,
};

/// Internal simulation state holder
#[derive(Debug)]
pub(crate) struct SimInner {
    pub(crate) current_time: Duration,
    pub(crate) event_queue: EventQueue,
    pub(crate) next_sequence: u64,

    // Async coordination
    pub(crate) wakers: WakerRegistry,
    pub(crate) next_task_id: u64,
    pub(crate) awakened_tasks: HashSet<u64>,

    // Event processing counter
    pub(crate) events_processed: u64,
}

impl SimInner {
    fn new() -> Self {
        Self {
            current_time: Duration::ZERO,
            event_queue: EventQueue::new(),
            next_sequence: 0,
            wakers: WakerRegistry::default(),
            next_task_id: 0,
            awakened_tasks: HashSet::new(),
            events_processed: 0,
        }
    }
}

/// The central simulation coordinator that manages time and event processing.
///
/// `SimWorld` owns all mutable engine state behind an `Rc<RefCell<_>>` and
/// provides the main interface for scheduling events and advancing
/// simulation time. Futures hold [`WeakSimWorld`] handles.
#[derive(Debug)]
pub struct SimWorld {
    pub(crate) inner: Rc<RefCell<SimInner>>,
}

impl SimWorld {
    /// Creates a new simulation world with the default seed (0).
    ///
    /// For custom seeds use [`SimWorld::new_with_seed`].
    pub fn new() -> Self {
        Self::new_with_seed(0)
    }

    /// Creates a new simulation world with a specific seed for deterministic
    /// randomness.
    ///
    /// Resets the thread-local RNG before seeding, so consecutive
    /// simulations on the same thread start from clean state.
    pub fn new_with_seed(seed: u64) -> Self {
        reset_sim_rng();
        set_sim_seed(seed);

        Self {
            inner: Rc::new(RefCell::new(SimInner::new())),
        }
    }

    /// Processes the next scheduled event and advances time.
    ///
    /// Returns `true` if more events are available for processing,
    /// `false` if this was the last event or none were available.
    pub fn step(&mut self) -> bool {
        let mut inner = self.inner.borrow_mut();

        if let Some(scheduled_event) = inner.event_queue.pop_earliest() {
            // Advance logical time to the event timestamp
            inner.current_time = scheduled_event.time();

            Self::process_event_with_inner(&mut inner, scheduled_event.into_event());

            !inner.event_queue.is_empty()
        } else {
            false
        }
    }

    /// Processes all scheduled events until the queue is empty.
    pub fn run_until_empty(&mut self) {
        while self.step() {}
    }

    /// Returns the current simulation time.
    pub fn current_time(&self) -> Duration {
        self.inner.borrow().current_time
    }

    /// Returns the current simulation time (alias for scheduling code).
    pub fn now(&self) -> Duration {
        self.inner.borrow().current_time
    }

    /// Schedules an event to execute after the specified delay from now.
    pub fn schedule_event(&self, event: Event, delay: Duration) {
        let mut inner = self.inner.borrow_mut();
        let scheduled_time = inner.current_time + delay;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        inner
            .event_queue
            .schedule(ScheduledEvent::new(scheduled_time, event, sequence));
    }

    /// Schedules an event to execute at the specified absolute time.
    pub fn schedule_event_at(&self, event: Event, time: Duration) {
        let mut inner = self.inner.borrow_mut();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        inner
            .event_queue
            .schedule(ScheduledEvent::new(time, event, sequence));
    }

    /// Creates a weak reference to this simulation world.
    ///
    /// Weak references give futures and long-lived components access to the
    /// simulation without keeping it alive past the runner.
    pub fn downgrade(&self) -> WeakSimWorld {
        WeakSimWorld {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Returns `true` if there are events waiting to be processed.
    pub fn has_pending_events(&self) -> bool {
        !self.inner.borrow().event_queue.is_empty()
    }

    /// Returns the number of events waiting to be processed.
    pub fn pending_event_count(&self) -> usize {
        self.inner.borrow().event_queue.len()
    }

    /// Returns the number of events processed so far.
    pub fn events_processed(&self) -> u64 {
        self.inner.borrow().events_processed
    }

    /// Sleep for the specified duration in simulation time.
    ///
    /// Returns a future that completes once simulation time has advanced by
    /// `duration`. A zero-duration sleep still suspends until the engine
    /// processes its timer event, which is how tasks yield to the current
    /// instant's remaining events.
    pub fn sleep(&self, duration: Duration) -> SleepFuture {
        let task_id = self.generate_task_id();

        self.schedule_event(Event::Timer { task_id }, duration);

        SleepFuture::new(self.downgrade(), task_id)
    }

    /// Generate a unique task ID for sleep operations.
    fn generate_task_id(&self) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let task_id = inner.next_task_id;
        inner.next_task_id += 1;
        task_id
    }

    /// Check if a sleep task has been awakened.
    pub(crate) fn is_task_awake(&self, task_id: u64) -> bool {
        self.inner.borrow().awakened_tasks.contains(&task_id)
    }

    /// Register a waker for a sleep task.
    pub(crate) fn register_task_waker(&self, task_id: u64, waker: Waker) {
        let mut inner = self.inner.borrow_mut();
        inner.wakers.task_wakers.insert(task_id, waker);
    }

    /// Static event processor working on the inner state.
    fn process_event_with_inner(inner: &mut SimInner, event: Event) {
        inner.events_processed += 1;

        match event {
            Event::Timer { task_id } => {
                inner.awakened_tasks.insert(task_id);

                if let Some(waker) = inner.wakers.task_wakers.remove(&task_id) {
                    waker.wake();
                }
            }
            Event::Horizon => {
                tracing::debug!(
                    now = ?inner.current_time,
                    "horizon marker reached"
                );
            }
        }
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// A weak reference to a [`SimWorld`].
///
/// Upgrading fails with [`SimulationError::SimulationShutdown`] once the
/// owning runner has dropped the world.
#[derive(Debug, Clone)]
pub struct WeakSimWorld {
    pub(crate) inner: Weak<RefCell<SimInner>>,
}

impl WeakSimWorld {
    /// Attempts to upgrade this weak reference to a strong reference.
    pub fn upgrade(&self) -> SimulationResult<SimWorld> {
        self.inner
            .upgrade()
            .map(|inner| SimWorld { inner })
            .ok_or(SimulationError::SimulationShutdown)
    }

    /// Returns the current simulation time.
    pub fn now(&self) -> SimulationResult<Duration> {
        Ok(self.upgrade()?.now())
    }

    /// Sleep for the specified duration in simulation time.
    pub fn sleep(&self, duration: Duration) -> SimulationResult<SleepFuture> {
        Ok(self.upgrade()?.sleep(duration))
    }
}
