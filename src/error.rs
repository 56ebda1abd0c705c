//! Error types. Per the spec's error handling design, `create` is the only
//! operation that can fail in a way worth a typed error -- everything else
//! (`alloc`, `post`, `cancel`) keeps its zero/null sentinel contract, because
//! those are called from contexts (an ISR, a destructor) that must not unwind
//! or branch on an error enum they can't format.

pub use crate::slab::SlabCreateError as CreateError;
