//! The platform sleep/wake collaborator (the `sema_{create,destroy,wait,signal}`
//! pair from the spec), generalized as a small object-safe trait so a blocked
//! dispatcher can be woken by a `post` or `break_dispatch` on another thread.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Wakes a sleeping dispatcher, or tells it how long to sleep.
///
/// Implementations must treat `wait` as a hint with a spurious-wakeup-tolerant
/// contract: the dispatch loop always re-checks its own state after `wait`
/// returns, so a `WakeSource` that wakes early (or even immediately) is safe,
/// merely less efficient.
pub trait WakeSource: Send + Sync {
    /// Blocks the calling thread until `notify` is called or `timeout` elapses
    /// (or forever if `timeout` is `None`).
    fn wait(&self, timeout: Option<Duration>);
    /// Wakes one waiter blocked in `wait`, if any.
    fn notify(&self);
}

/// Default [`WakeSource`] backed by a [`Condvar`].
pub struct CondvarWakeSource {
    inner: Mutex<()>,
    condvar: Condvar,
}

impl CondvarWakeSource {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }
}

impl Default for CondvarWakeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSource for CondvarWakeSource {
    fn wait(&self, timeout: Option<Duration>) {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match timeout {
            Some(timeout) => {
                let _ = self.condvar.wait_timeout(guard, timeout);
            }
            None => {
                let _ = self.condvar.wait(guard);
            }
        }
    }

    fn notify(&self) {
        self.condvar.notify_all();
    }
}
