//! Deterministic discrete-event engine: logical clock, event queue,
//! seeded randomness, and simulation-time sleep.

pub mod events;
pub mod rng;
pub mod sleep;
pub(crate) mod wakers;
pub mod world;

pub use events::{Event, EventQueue, ScheduledEvent};
pub use sleep::SleepFuture;
pub use world::{SimWorld, WeakSimWorld};
