//! Event header layout and the chunk/generation identifier scheme (C2, C4).
//!
//! Every chunk handed out by the [`slab`](crate::slab) allocator, whether free or live,
//! carries an [`EventHeader`] at offset 0, followed immediately by the opaque payload
//! the caller asked for. All fields here are mutated only while the owning queue's
//! mutex is held; there is no internal synchronization in this module.

use std::mem;
use std::ptr;

/// Bits of an [`EventId`] reserved for the generation counter. The remaining high
/// bits hold the chunk's byte offset (in units of `align_of::<EventHeader>()`)
/// within the backing buffer.
pub(crate) const GENERATION_BITS: u32 = 16;
pub(crate) const GENERATION_MASK: u64 = (1u64 << GENERATION_BITS) - 1;

/// External identifier returned by `post`/`call*`. Zero means "invalid" (a failed
/// post, or a chunk that was never handed out with this generation).
pub type EventId = u64;

/// A function pointer invoked with the event's opaque payload pointer.
///
/// This is the "polymorphic callback" of the spec: a function-pointer-equivalent
/// paired with a context value, rather than a boxed closure, so that posting an
/// event never allocates on top of the slab.
pub type RawCallback = unsafe fn(*mut u8);

/// A function pointer invoked to tear down a payload before its chunk is reclaimed.
pub type RawDtor = unsafe fn(*mut u8);

/// Either "not periodic" or a positive millisecond interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Period {
    Once,
    Every(u32),
}

/// Fixed-layout header preceding every chunk's payload.
///
/// `next`/`prev_link` double as the linkage for whichever list currently owns the
/// chunk (the slab's free list, or the queue's pending list) -- a chunk is a member
/// of exactly one such list at a time, per the buffer-partition invariant. `chain`
/// is the free-list-only secondary chain used to keep same-size chunks out of the
/// primary (ascending, distinct-size) search path.
pub(crate) struct EventHeader {
    pub(crate) next: *mut EventHeader,
    pub(crate) prev_link: *mut *mut EventHeader,
    pub(crate) chain: *mut EventHeader,
    pub(crate) target: u32,
    pub(crate) period: Period,
    pub(crate) generation: u16,
    pub(crate) dtor: Option<RawDtor>,
    pub(crate) callback: Option<RawCallback>,
    pub(crate) size: u32,
    /// True while the chunk is linked into the queue's pending list. Without this,
    /// a stale id whose generation happens to collide with a freshly-recycled,
    /// not-yet-posted chunk could make `cancel` unlink garbage; the spec promises
    /// `cancel` is safe on any integer, and this is what makes that true in Rust
    /// rather than merely documented.
    pub(crate) linked: bool,
}

pub(crate) const HEADER_SIZE: usize = {
    let raw = mem::size_of::<EventHeader>();
    let align = mem::align_of::<EventHeader>();
    (raw + align - 1) & !(align - 1)
};

pub(crate) const HEADER_ALIGN: usize = mem::align_of::<EventHeader>();

/// Total chunk size (header + payload) for a requested payload size, rounded so the
/// next chunk in the bump region stays aligned.
pub(crate) fn chunk_size_for(payload_size: usize) -> usize {
    let raw = HEADER_SIZE + payload_size;
    (raw + HEADER_ALIGN - 1) & !(HEADER_ALIGN - 1)
}

/// # Safety
/// `chunk` must point at a live `EventHeader` at the start of a chunk.
pub(crate) unsafe fn payload_ptr(chunk: *mut EventHeader) -> *mut u8 {
    (chunk as *mut u8).add(HEADER_SIZE)
}

/// # Safety
/// `payload` must be a pointer previously returned by [`payload_ptr`] (i.e. by
/// `alloc`) for a chunk that is still live.
pub(crate) unsafe fn header_of(payload: *mut u8) -> *mut EventHeader {
    payload.sub(HEADER_SIZE) as *mut EventHeader
}

/// Initializes a freshly carved or recycled chunk's header in place.
///
/// # Safety
/// `chunk` must point at `size` writable, properly aligned bytes.
pub(crate) unsafe fn init_header(chunk: *mut EventHeader, size: u32) {
    ptr::write(
        chunk,
        EventHeader {
            next: ptr::null_mut(),
            prev_link: ptr::null_mut(),
            chain: ptr::null_mut(),
            target: 0,
            period: Period::Once,
            generation: 0,
            dtor: None,
            callback: None,
            size,
            linked: false,
        },
    );
}

/// Bumps a chunk's generation, skipping zero (zero is reserved for "invalid").
pub(crate) fn next_generation(current: u16) -> u16 {
    let bumped = current.wrapping_add(1);
    if bumped == 0 {
        1
    } else {
        bumped
    }
}

pub(crate) fn encode_id(offset_units: usize, generation: u16) -> EventId {
    debug_assert_ne!(generation, 0);
    ((offset_units as u64) << GENERATION_BITS) | generation as u64
}

pub(crate) fn decode_id(id: EventId) -> (usize, u16) {
    let generation = (id & GENERATION_MASK) as u16;
    let offset_units = (id >> GENERATION_BITS) as usize;
    (offset_units, generation)
}
