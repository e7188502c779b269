//! Servers, their resource pools, and single-step execution.
//!
//! Each server owns three bounded resources: a CPU slot pool, a RAM capacity
//! counter, and a disk-slot pool, plus a network bandwidth figure used to
//! derive transfer delays. Acquisition suspends the calling task until
//! capacity frees up; waiters are served in strict arrival order via ticket
//! queues. Releases happen through RAII guards, so resources are returned on
//! every exit path, including a task aborted mid-step.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SimulationError, SimulationResult};
use crate::metrics::MetricsHandle;
use crate::pattern::StepCosts;
use crate::sim::world::WeakSimWorld;

/// Fixed disk throughput used to turn a disk cost (MB) into a hold duration.
pub const DISK_THROUGHPUT_MB_PER_SEC: f64 = 500.0;

/// Static description of one server in the topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Unique server name.
    pub name: String,
    /// Number of concurrent CPU execution slots.
    pub cpu_capacity: usize,
    /// RAM capacity in GB.
    pub ram_capacity_gb: f64,
    /// Number of concurrent disk I/O slots.
    #[serde(default = "default_disk_queue_capacity")]
    pub disk_queue_capacity: usize,
    /// Network bandwidth in Mbps.
    #[serde(default = "default_network_bandwidth_mbps")]
    pub network_bandwidth_mbps: f64,
}

fn default_disk_queue_capacity() -> usize {
    16
}

fn default_network_bandwidth_mbps() -> f64 {
    1000.0
}

impl ServerSpec {
    fn validate(&self) -> SimulationResult<()> {
        if self.name.is_empty() {
            return Err(SimulationError::Configuration(
                "server name must not be empty".to_string(),
            ));
        }
        if self.cpu_capacity == 0 {
            return Err(SimulationError::Configuration(format!(
                "server '{}': cpu_capacity must be positive",
                self.name
            )));
        }
        if self.ram_capacity_gb <= 0.0 {
            return Err(SimulationError::Configuration(format!(
                "server '{}': ram_capacity_gb must be positive",
                self.name
            )));
        }
        if self.disk_queue_capacity == 0 {
            return Err(SimulationError::Configuration(format!(
                "server '{}': disk_queue_capacity must be positive",
                self.name
            )));
        }
        if self.network_bandwidth_mbps <= 0.0 {
            return Err(SimulationError::Configuration(format!(
                "server '{}': network_bandwidth_mbps must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Index of a server within its [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub(crate) usize);

impl ServerId {
    /// The raw index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A pool of identical slots (CPU threads, disk I/O slots).
///
/// FIFO is enforced with a ticket queue: a claim succeeds only when the
/// claimant is at the front of the queue (or the queue is empty) and a slot
/// is free, so a late arrival can never overtake an earlier waiter.
#[derive(Debug)]
pub(crate) struct SlotPool {
    label: &'static str,
    capacity: usize,
    held: usize,
    queue: VecDeque<u64>,
    wakers: HashMap<u64, Waker>,
    next_ticket: u64,
}

impl SlotPool {
    fn new(label: &'static str, capacity: usize) -> Self {
        Self {
            label,
            capacity,
            held: 0,
            queue: VecDeque::new(),
            wakers: HashMap::new(),
            next_ticket: 0,
        }
    }

    fn claim(&mut self) {
        self.held += 1;
        assert!(
            self.held <= self.capacity,
            "{} pool over capacity: {} slots held of {}",
            self.label,
            self.held,
            self.capacity
        );
    }

    fn release(&mut self) {
        assert!(
            self.held > 0,
            "{} pool: released a slot that was never acquired",
            self.label
        );
        self.held -= 1;
        self.wake_front();
    }

    fn wake_front(&mut self) {
        if let Some(&ticket) = self.queue.front() {
            if let Some(waker) = self.wakers.remove(&ticket) {
                waker.wake();
            }
        }
    }

    fn enqueue(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.queue.push_back(ticket);
        ticket
    }

    fn abandon(&mut self, ticket: u64) {
        self.queue.retain(|&queued| queued != ticket);
        self.wakers.remove(&ticket);
        // The abandoned waiter may have been blocking the front of the line.
        if self.held < self.capacity {
            self.wake_front();
        }
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    fn held(&self) -> usize {
        self.held
    }
}

/// RAII guard for one held slot. Dropping it releases the slot and wakes the
/// next waiter in line.
#[derive(Debug)]
pub struct SlotGuard {
    pool: Rc<RefCell<SlotPool>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pool.borrow_mut().release();
    }
}

/// Future resolving to a [`SlotGuard`] once a slot is granted in FIFO order.
pub struct AcquireSlot {
    pool: Rc<RefCell<SlotPool>>,
    ticket: Option<u64>,
    acquired: bool,
}

impl AcquireSlot {
    fn new(pool: Rc<RefCell<SlotPool>>) -> Self {
        Self {
            pool,
            ticket: None,
            acquired: false,
        }
    }
}

impl Future for AcquireSlot {
    type Output = SlotGuard;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut pool = self.pool.borrow_mut();

        match self.ticket {
            None => {
                if pool.queue.is_empty() && pool.held < pool.capacity {
                    pool.claim();
                    drop(pool);
                    self.acquired = true;
                    return Poll::Ready(SlotGuard {
                        pool: Rc::clone(&self.pool),
                    });
                }
                let ticket = pool.enqueue();
                pool.wakers.insert(ticket, cx.waker().clone());
                drop(pool);
                self.ticket = Some(ticket);
                Poll::Pending
            }
            Some(ticket) => {
                if pool.queue.front() == Some(&ticket) && pool.held < pool.capacity {
                    pool.queue.pop_front();
                    pool.wakers.remove(&ticket);
                    pool.claim();
                    // More capacity may remain for the next waiter at this
                    // same instant.
                    if pool.held < pool.capacity {
                        pool.wake_front();
                    }
                    drop(pool);
                    self.acquired = true;
                    Poll::Ready(SlotGuard {
                        pool: Rc::clone(&self.pool),
                    })
                } else {
                    pool.wakers.insert(ticket, cx.waker().clone());
                    Poll::Pending
                }
            }
        }
    }
}

impl Drop for AcquireSlot {
    fn drop(&mut self) {
        // Cancelled while still queued: withdraw the ticket so later
        // waiters are not stuck behind a dead claimant.
        if !self.acquired {
            if let Some(ticket) = self.ticket {
                self.pool.borrow_mut().abandon(ticket);
            }
        }
    }
}

/// A counting pool for RAM, reserved in fractional-GB amounts.
///
/// Reservation applies back-pressure: a request larger than the free
/// capacity suspends until enough is returned. Waiters are strictly FIFO; a
/// small request never bypasses a larger one ahead of it.
#[derive(Debug)]
pub(crate) struct CapacityPool {
    capacity: f64,
    used: f64,
    queue: VecDeque<(u64, f64)>,
    wakers: HashMap<u64, Waker>,
    next_ticket: u64,
}

// Tolerance for accumulated floating-point error in the RAM counter.
const RAM_EPSILON: f64 = 1e-9;

impl CapacityPool {
    fn new(capacity: f64) -> Self {
        Self {
            capacity,
            used: 0.0,
            queue: VecDeque::new(),
            wakers: HashMap::new(),
            next_ticket: 0,
        }
    }

    fn fits(&self, amount: f64) -> bool {
        self.used + amount <= self.capacity + RAM_EPSILON
    }

    fn claim(&mut self, amount: f64) {
        self.used += amount;
        assert!(
            self.used <= self.capacity + RAM_EPSILON,
            "ram pool over capacity: {:.3} GB committed of {:.3}",
            self.used,
            self.capacity
        );
    }

    fn release(&mut self, amount: f64) {
        assert!(
            self.used + RAM_EPSILON >= amount,
            "ram pool: freed {:.3} GB but only {:.3} committed",
            amount,
            self.used
        );
        self.used = (self.used - amount).max(0.0);
        self.wake_front();
    }

    fn wake_front(&mut self) {
        if let Some(&(ticket, _)) = self.queue.front() {
            if let Some(waker) = self.wakers.remove(&ticket) {
                waker.wake();
            }
        }
    }

    fn enqueue(&mut self, amount: f64) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.queue.push_back((ticket, amount));
        ticket
    }

    fn abandon(&mut self, ticket: u64) {
        self.queue.retain(|&(queued, _)| queued != ticket);
        self.wakers.remove(&ticket);
        self.wake_front();
    }

    pub(crate) fn used(&self) -> f64 {
        self.used
    }
}

/// RAII guard for a RAM reservation. Dropping it frees the amount and wakes
/// the next waiter.
#[derive(Debug)]
pub struct RamGuard {
    pool: Rc<RefCell<CapacityPool>>,
    amount: f64,
}

impl Drop for RamGuard {
    fn drop(&mut self) {
        self.pool.borrow_mut().release(self.amount);
    }
}

/// Future resolving to a [`RamGuard`] once the requested amount fits.
pub struct ReserveRam {
    pool: Rc<RefCell<CapacityPool>>,
    amount: f64,
    ticket: Option<u64>,
    acquired: bool,
}

impl ReserveRam {
    fn new(pool: Rc<RefCell<CapacityPool>>, amount: f64) -> Self {
        Self {
            pool,
            amount,
            ticket: None,
            acquired: false,
        }
    }
}

impl Future for ReserveRam {
    type Output = RamGuard;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let amount = self.amount;
        let mut pool = self.pool.borrow_mut();

        match self.ticket {
            None => {
                if pool.queue.is_empty() && pool.fits(amount) {
                    pool.claim(amount);
                    drop(pool);
                    self.acquired = true;
                    return Poll::Ready(RamGuard {
                        pool: Rc::clone(&self.pool),
                        amount,
                    });
                }
                let ticket = pool.enqueue(amount);
                pool.wakers.insert(ticket, cx.waker().clone());
                drop(pool);
                self.ticket = Some(ticket);
                Poll::Pending
            }
            Some(ticket) => {
                let at_front = pool.queue.front().map(|&(t, _)| t) == Some(ticket);
                if at_front && pool.fits(amount) {
                    pool.queue.pop_front();
                    pool.wakers.remove(&ticket);
                    pool.claim(amount);
                    pool.wake_front();
                    drop(pool);
                    self.acquired = true;
                    Poll::Ready(RamGuard {
                        pool: Rc::clone(&self.pool),
                        amount,
                    })
                } else {
                    pool.wakers.insert(ticket, cx.waker().clone());
                    Poll::Pending
                }
            }
        }
    }
}

impl Drop for ReserveRam {
    fn drop(&mut self) {
        if !self.acquired {
            if let Some(ticket) = self.ticket {
                self.pool.borrow_mut().abandon(ticket);
            }
        }
    }
}

/// One server in the topology: its spec plus its live resource pools.
///
/// Pool counters are mutated exclusively through the acquire/reserve futures
/// and the guards they return; nothing else touches them.
#[derive(Debug)]
pub struct Server {
    id: ServerId,
    spec: ServerSpec,
    cpu: Rc<RefCell<SlotPool>>,
    ram: Rc<RefCell<CapacityPool>>,
    disk: Rc<RefCell<SlotPool>>,
}

impl Server {
    fn new(id: ServerId, spec: ServerSpec) -> Self {
        let cpu = Rc::new(RefCell::new(SlotPool::new("cpu", spec.cpu_capacity)));
        let ram = Rc::new(RefCell::new(CapacityPool::new(spec.ram_capacity_gb)));
        let disk = Rc::new(RefCell::new(SlotPool::new(
            "disk",
            spec.disk_queue_capacity,
        )));
        Self {
            id,
            spec,
            cpu,
            ram,
            disk,
        }
    }

    /// This server's topology index.
    pub fn id(&self) -> ServerId {
        self.id
    }

    /// This server's static spec.
    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    /// Acquire one CPU slot, suspending until one is free.
    pub fn acquire_cpu(&self) -> AcquireSlot {
        AcquireSlot::new(Rc::clone(&self.cpu))
    }

    /// Reserve `amount_gb` of RAM, suspending under back-pressure.
    pub fn reserve_ram(&self, amount_gb: f64) -> ReserveRam {
        ReserveRam::new(Rc::clone(&self.ram), amount_gb)
    }

    /// Acquire one disk I/O slot, queuing on exhaustion.
    pub fn acquire_disk_slot(&self) -> AcquireSlot {
        AcquireSlot::new(Rc::clone(&self.disk))
    }

    /// Delay incurred by transferring `size_mb` over this server's link.
    pub fn transfer_delay(&self, size_mb: f64) -> Duration {
        Duration::from_secs_f64(size_mb / (self.spec.network_bandwidth_mbps / 8.0))
    }

    /// Hold duration for a disk operation of `size_mb`.
    pub fn disk_delay(size_mb: f64) -> Duration {
        Duration::from_secs_f64(size_mb / DISK_THROUGHPUT_MB_PER_SEC)
    }

    /// Current disk wait-queue length (an observed metric).
    pub fn disk_queue_len(&self) -> usize {
        self.disk.borrow().queue_len()
    }

    /// Currently committed RAM in GB.
    pub fn ram_used(&self) -> f64 {
        self.ram.borrow().used()
    }

    /// Execute one sequential step on this server.
    ///
    /// Resource order follows the original model: reserve RAM up front, hold
    /// a CPU slot for the burst, then an optional disk slot, then an optional
    /// network delay; RAM is freed last. Zero-cost dimensions are skipped
    /// entirely rather than acquired-and-released. Every second the CPU burst
    /// spans receives its share of cpu-seconds.
    pub(crate) async fn execute_step(
        &self,
        world: &WeakSimWorld,
        metrics: &MetricsHandle,
        costs: &StepCosts,
        pattern: &Rc<str>,
    ) -> SimulationResult<()> {
        let start = world.now()?;
        metrics.step_started(self.id, start);
        tracing::trace!(server = %self.spec.name, pattern = %pattern, ?start, "step started");

        let ram_guard = if costs.ram_gb > 0.0 {
            let guard = self.reserve_ram(costs.ram_gb).await;
            let now = world.now()?;
            metrics.observe_ram(self.id, now, self.ram.borrow().used());
            Some(guard)
        } else {
            None
        };

        if costs.cpu > Duration::ZERO {
            let cpu_guard = self.acquire_cpu().await;
            let burst_start = world.now()?;
            world.sleep(costs.cpu)?.await?;
            let burst_end = world.now()?;
            metrics.add_cpu_time(self.id, burst_start, burst_end);
            drop(cpu_guard);
        }

        if costs.disk_mb > 0.0 {
            let disk_guard = self.acquire_disk_slot().await;
            let now = world.now()?;
            metrics.sample_disk_queue(self.id, now, self.disk.borrow().queue_len());
            world.sleep(Self::disk_delay(costs.disk_mb))?.await?;
            drop(disk_guard);
        }

        if costs.net_mb > 0.0 {
            world.sleep(self.transfer_delay(costs.net_mb))?.await?;
        }

        drop(ram_guard);

        let end = world.now()?;
        metrics.step_completed(self.id, end);
        tracing::trace!(server = %self.spec.name, ?end, "step completed");
        Ok(())
    }
}

/// The fixed registry of named servers.
///
/// Built once at setup from a validated list of specs; servers live for the
/// whole run and are never destroyed.
#[derive(Debug)]
pub struct Topology {
    servers: Vec<Rc<Server>>,
    by_name: HashMap<String, usize>,
}

impl Topology {
    /// Build and validate a topology from server specs.
    pub fn build(specs: &[ServerSpec]) -> SimulationResult<Self> {
        if specs.is_empty() {
            return Err(SimulationError::Configuration(
                "topology must define at least one server".to_string(),
            ));
        }

        let mut servers = Vec::with_capacity(specs.len());
        let mut by_name = HashMap::new();
        for (idx, spec) in specs.iter().enumerate() {
            spec.validate()?;
            if by_name.insert(spec.name.clone(), idx).is_some() {
                return Err(SimulationError::Configuration(format!(
                    "duplicate server name '{}'",
                    spec.name
                )));
            }
            servers.push(Rc::new(Server::new(ServerId(idx), spec.clone())));
        }

        Ok(Self { servers, by_name })
    }

    /// Look up a server by name.
    pub fn get(&self, name: &str) -> Option<&Rc<Server>> {
        self.by_name.get(name).map(|&idx| &self.servers[idx])
    }

    /// All servers, in declaration order.
    pub fn servers(&self) -> &[Rc<Server>] {
        &self.servers
    }

    /// Number of servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether the topology is empty (never true for a built topology).
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
