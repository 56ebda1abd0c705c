//! Embeddable, allocation-free event queue for embedded and realtime systems.
//!
//! An [`EventQueue`] carves fixed event-sized chunks out of a single
//! contiguous backing buffer (no further system allocation occurs after
//! construction), schedules user callbacks against a monotonic, wrap-safe
//! tick source, and dispatches them in deadline order from a loop the caller
//! drives. Posting and cancelling are safe to call concurrently with
//! dispatch -- including from an interrupt context, if the mutex type
//! parameter is an IRQ-masking critical section rather than a real lock.
//!
//! ```
//! use equeue::EventQueue;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! let queue = EventQueue::new(2048).unwrap();
//! let touched = Arc::new(AtomicBool::new(false));
//! let t = touched.clone();
//! queue.call(move || t.store(true, Ordering::SeqCst));
//! queue.dispatch(0);
//! assert!(touched.load(Ordering::SeqCst));
//! ```

mod call;
mod clock;
mod error;
mod event;
mod queue;
mod slab;
mod sync;
mod wake;

pub use clock::{tick, Clock, SystemClock};
pub use error::CreateError;
pub use event::{EventId, RawCallback, RawDtor};
pub use queue::EventQueue;
pub use sync::{DefaultRawMutex, RawMutex};
pub use wake::{CondvarWakeSource, WakeSource};
