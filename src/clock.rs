//! The platform monotonic tick source collaborator.
//!
//! Out of scope for the core per the spec, but a usable crate needs a default:
//! [`SystemClock`] wraps a [`std::time::Instant`] captured once and truncates
//! elapsed milliseconds into the 32-bit, wrap-safe tick domain the rest of the
//! queue operates in.

use std::sync::OnceLock;
use std::time::Instant;

/// A monotonic millisecond tick source, wrapping at 2^32 ms (~49.7 days).
///
/// Implementations are not required to start counting from any particular
/// reference point -- only to be monotonic (in the wrap-safe sense) for the
/// lifetime of a single queue.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u32;
}

/// Default [`Clock`] backed by [`std::time::Instant`].
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }
}

static GLOBAL_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Freestanding convenience mirroring the spec's `tick()` collaborator
/// operation, backed by a process-wide monotonic epoch established on first
/// use. Queues are not required to use this -- it exists for callers that
/// want a tick value outside of any particular [`EventQueue`](crate::queue::EventQueue).
pub fn tick() -> u32 {
    let epoch = GLOBAL_EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u32
}
