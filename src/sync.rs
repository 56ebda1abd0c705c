//! The platform mutex collaborator (C5), generalized as a type parameter.
//!
//! The spec models the queue's mutex as an opaque interface that may be a
//! no-op, an IRQ-masking critical section, or a real mutex. `lock_api::RawMutex`
//! is exactly that interface in Rust: `lock`/`try_lock`/`unlock` with no
//! assumptions about what backs them. [`EventQueue`](crate::queue::EventQueue)
//! is generic over it; [`DefaultRawMutex`] is a real spinlock, suitable for both
//! hosted and bare-metal targets without pulling in an OS dependency.

pub use lock_api::{Mutex, MutexGuard, RawMutex};

/// Default mutex backing for [`EventQueue`](crate::queue::EventQueue) when the
/// caller does not need a platform-specific critical section.
pub type DefaultRawMutex = spin::RawMutex;
