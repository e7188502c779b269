//! Event scheduling and processing for the simulation engine.

use std::{cmp::Ordering, collections::BinaryHeap, time::Duration};

/// Events that can be scheduled in the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Timer event for waking a sleeping task.
    Timer {
        /// The unique identifier for the task to wake.
        task_id: u64,
    },

    /// Marker event that advances the clock to the scenario horizon.
    ///
    /// Carries no payload; the runner schedules it under the truncate drain
    /// policy so the cut happens at exactly the configured horizon even when
    /// no workload event lands on that instant.
    Horizon,
}

/// An event scheduled for execution at a specific simulation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent {
    time: Duration,
    event: Event,
    sequence: u64, // For deterministic ordering
}

impl ScheduledEvent {
    /// Creates a new scheduled event.
    pub fn new(time: Duration, event: Event, sequence: u64) -> Self {
        Self {
            time,
            event,
            sequence,
        }
    }

    /// Returns the scheduled execution time.
    pub fn time(&self) -> Duration {
        self.time
    }

    /// Returns a reference to the event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Consumes the scheduled event and returns the event.
    pub fn into_event(self) -> Event {
        self.event
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap, but we want earliest time first,
        // so the time comparison is reversed.
        match other.time.cmp(&self.time) {
            // Events at the same instant are processed in scheduling order
            // (sequence numbers, also reversed for the max heap).
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other => other,
        }
    }
}

/// A priority queue for scheduling events in chronological order.
///
/// Events are processed in time order, with deterministic FIFO ordering for
/// events scheduled at the same instant via sequence numbers.
#[derive(Debug)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
}

impl EventQueue {
    /// Creates a new empty event queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Schedules an event for execution.
    pub fn schedule(&mut self, event: ScheduledEvent) {
        self.heap.push(event);
    }

    /// Removes and returns the earliest scheduled event.
    pub fn pop_earliest(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop()
    }

    /// Returns a reference to the earliest scheduled event without removing it.
    pub fn peek_earliest(&self) -> Option<&ScheduledEvent> {
        self.heap.peek()
    }

    /// Returns `true` if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns the number of events in the queue.
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_queue_ordering() {
        let mut queue = EventQueue::new();

        // Schedule events out of order
        queue.schedule(ScheduledEvent::new(
            Duration::from_millis(300),
            Event::Timer { task_id: 3 },
            2,
        ));
        queue.schedule(ScheduledEvent::new(
            Duration::from_millis(100),
            Event::Timer { task_id: 1 },
            0,
        ));
        queue.schedule(ScheduledEvent::new(
            Duration::from_millis(200),
            Event::Timer { task_id: 2 },
            1,
        ));

        // Should pop in time order
        let event1 = queue.pop_earliest().unwrap();
        assert_eq!(event1.time(), Duration::from_millis(100));
        assert_eq!(event1.event(), &Event::Timer { task_id: 1 });

        let event2 = queue.pop_earliest().unwrap();
        assert_eq!(event2.time(), Duration::from_millis(200));

        let event3 = queue.pop_earliest().unwrap();
        assert_eq!(event3.time(), Duration::from_millis(300));
        assert_eq!(event3.event(), &Event::Timer { task_id: 3 });

        assert!(queue.is_empty());
    }

    #[test]
    fn same_time_deterministic_ordering() {
        let mut queue = EventQueue::new();
        let same_time = Duration::from_millis(100);

        queue.schedule(ScheduledEvent::new(same_time, Event::Timer { task_id: 3 }, 2));
        queue.schedule(ScheduledEvent::new(same_time, Event::Timer { task_id: 1 }, 0));
        queue.schedule(ScheduledEvent::new(same_time, Event::Timer { task_id: 2 }, 1));

        // Should pop in sequence order when times are equal
        assert_eq!(
            queue.pop_earliest().unwrap().event(),
            &Event::Timer { task_id: 1 }
        );
        assert_eq!(
            queue.pop_earliest().unwrap().event(),
            &Event::Timer { task_id: 2 }
        );
        assert_eq!(
            queue.pop_earliest().unwrap().event(),
            &Event::Timer { task_id: 3 }
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn horizon_before_same_instant_later_sequence() {
        let mut queue = EventQueue::new();
        let horizon = Duration::from_secs(5);

        // The horizon marker is scheduled at setup (sequence 0), so it must
        // sort ahead of workload timers landing on the same instant.
        queue.schedule(ScheduledEvent::new(horizon, Event::Horizon, 0));
        queue.schedule(ScheduledEvent::new(horizon, Event::Timer { task_id: 7 }, 9));

        assert_eq!(queue.pop_earliest().unwrap().event(), &Event::Horizon);
        assert_eq!(
            queue.pop_earliest().unwrap().event(),
            &Event::Timer { task_id: 7 }
        );
    }
}
