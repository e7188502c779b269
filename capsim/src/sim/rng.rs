//! Thread-local random number generation for simulation.
//!
//! Deterministic randomness lives in thread-local storage so components can
//! draw random values without threading an RNG handle through every call.
//! Each thread maintains its own RNG state, keeping runs reproducible while
//! supporting parallel test execution.

use rand::distr::{uniform::SampleUniform, Distribution, StandardUniform};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::cell::RefCell;

thread_local! {
    /// Thread-local random number generator for simulation.
    ///
    /// Uses ChaCha8Rng for deterministic, reproducible randomness.
    static SIM_RNG: RefCell<ChaCha8Rng> = RefCell::new(ChaCha8Rng::seed_from_u64(0));

    /// The seed last set via [`set_sim_seed`], kept for error reporting.
    static CURRENT_SEED: RefCell<u64> = const { RefCell::new(0) };
}

/// Generate a random value using the thread-local simulation RNG.
///
/// The same seed always produces the same sequence of values within a
/// single thread.
pub fn sim_random<T>() -> T
where
    StandardUniform: Distribution<T>,
{
    SIM_RNG.with(|rng| rng.borrow_mut().sample(StandardUniform))
}

/// Generate a random value within a range (exclusive upper bound) using the
/// thread-local simulation RNG.
pub fn sim_random_range<T>(range: std::ops::Range<T>) -> T
where
    T: SampleUniform + PartialOrd,
{
    SIM_RNG.with(|rng| rng.borrow_mut().random_range(range))
}

/// Generate a random f64 in `[0.0, 1.0)` using the simulation RNG.
pub fn sim_random_f64() -> f64 {
    SIM_RNG.with(|rng| rng.borrow_mut().sample(StandardUniform))
}

/// Set the seed for the thread-local simulation RNG.
pub fn set_sim_seed(seed: u64) {
    SIM_RNG.with(|rng| {
        *rng.borrow_mut() = ChaCha8Rng::seed_from_u64(seed);
    });
    CURRENT_SEED.with(|current| {
        *current.borrow_mut() = seed;
    });
}

/// Get the current simulation seed.
///
/// Returns the seed last set via [`set_sim_seed`], or 0 if none was set.
/// Useful for reporting which seed reproduces a failing run.
pub fn current_sim_seed() -> u64 {
    CURRENT_SEED.with(|current| *current.borrow())
}

/// Reset the thread-local simulation RNG to a fresh state.
///
/// Call before setting a new seed to guarantee clean state between
/// consecutive simulation runs on the same thread.
pub fn reset_sim_rng() {
    SIM_RNG.with(|rng| {
        *rng.borrow_mut() = ChaCha8Rng::seed_from_u64(0);
    });
    CURRENT_SEED.with(|current| {
        *current.borrow_mut() = 0;
    });
}
