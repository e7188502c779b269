//! Waker management for async coordination.

use std::collections::HashMap;
use std::task::Waker;

/// Registry of wakers for tasks suspended on timed delays.
#[derive(Debug, Default)]
pub(crate) struct WakerRegistry {
    pub(crate) task_wakers: HashMap<u64, Waker>,
}
