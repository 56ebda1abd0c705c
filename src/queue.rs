//! The ordered dispatch queue, concurrency shell, and dispatch loop (C3, C5, C6).
//!
//! [`EventQueue`] ties the [`slab`](crate::slab) allocator to a time-ordered
//! pending list guarded by a single [`lock_api::RawMutex`]. The mutex is never
//! held while a callback or destructor runs, so `post`/`cancel` may safely be
//! called from inside a callback, and (if `R` is an IRQ-masking critical
//! section) from an interrupt handler concurrently with dispatch on another
//! context.

use crate::clock::{Clock, SystemClock};
use crate::event::{self, EventHeader, EventId, Period, RawCallback, RawDtor};
use crate::slab::Slab;
use crate::sync::{DefaultRawMutex, Mutex, RawMutex};
use crate::wake::{CondvarWakeSource, WakeSource};
use crate::CreateError;

use std::ptr;
use std::sync::Arc;
use std::time::Duration;

#[inline]
fn wrap_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

#[inline]
fn wrap_before(a: u32, b: u32) -> bool {
    wrap_diff(a, b) < 0
}

struct QueueState {
    slab: Slab,
    pending_head: *mut EventHeader,
    break_count: u32,
}

// SAFETY: all access to the raw pointers inside `QueueState` is gated by the
// queue's mutex; the state never escapes without it.
unsafe impl Send for QueueState {}

impl QueueState {
    fn is_new_head(&self, target: u32) -> bool {
        match unsafe { self.pending_head.as_ref() } {
            None => true,
            Some(head) => wrap_before(target, head.target),
        }
    }

    /// # Safety
    /// `chunk` must not already be linked into `pending` or the free list.
    unsafe fn pending_insert(&mut self, chunk: *mut EventHeader) {
        let mut link = &mut self.pending_head as *mut *mut EventHeader;
        loop {
            let node = *link;
            if node.is_null() || wrap_before((*chunk).target, (*node).target) {
                (*chunk).next = node;
                (*chunk).prev_link = link;
                if !node.is_null() {
                    (*node).prev_link = &mut (*chunk).next as *mut _;
                }
                *link = chunk;
                (*chunk).linked = true;
                return;
            }
            link = &mut (*node).next as *mut _;
        }
    }

    /// # Safety
    /// `chunk` must currently be linked into `pending` (`chunk.linked` true).
    unsafe fn pending_unlink(&mut self, chunk: *mut EventHeader) {
        debug_assert!((*chunk).linked);
        let next = (*chunk).next;
        *(*chunk).prev_link = next;
        if !next.is_null() {
            (*next).prev_link = (*chunk).prev_link;
        }
        (*chunk).linked = false;
        (*chunk).next = ptr::null_mut();
        (*chunk).prev_link = ptr::null_mut();
    }

    /// Splits off the prefix of `pending` whose `target - now <= 0`, returning
    /// it as a standalone singly-linked list and leaving the rest in place.
    unsafe fn extract_due(&mut self, now: u32) -> *mut EventHeader {
        let mut tail_link = &mut self.pending_head as *mut *mut EventHeader;
        loop {
            let node = *tail_link;
            if node.is_null() || wrap_diff((*node).target, now) > 0 {
                break;
            }
            (*node).linked = false;
            tail_link = &mut (*node).next as *mut _;
        }
        let due_head = self.pending_head;
        let remainder = *tail_link;
        *tail_link = ptr::null_mut();
        self.pending_head = remainder;
        if !remainder.is_null() {
            (*remainder).prev_link = &mut self.pending_head as *mut _;
        }
        due_head
    }
}

/// An embeddable, allocation-free event queue.
///
/// `R` is the platform mutex primitive guarding all mutable state, generic
/// over [`lock_api::RawMutex`] so a no-op critical section, a spinlock, or a
/// hosted OS mutex are all just different type arguments. [`DefaultRawMutex`]
/// (a real spinlock) is used when `R` is left unspecified.
pub struct EventQueue<R: RawMutex = DefaultRawMutex> {
    inner: Mutex<R, QueueState>,
    clock: Arc<dyn Clock>,
    wake: Arc<dyn WakeSource>,
}

// SAFETY: `QueueState` is Send (see above); `Mutex<R, QueueState>` is then
// Send/Sync exactly when `R` is, per `lock_api`'s own impls. `Arc<dyn Clock>`
// and `Arc<dyn WakeSource>` are Send + Sync because the traits require it.

impl EventQueue<DefaultRawMutex> {
    /// Creates a queue backed by a freshly allocated `capacity`-byte buffer,
    /// using the default [`DefaultRawMutex`] spinlock, [`SystemClock`], and
    /// [`CondvarWakeSource`].
    ///
    /// Pinned to [`DefaultRawMutex`] (rather than generic over `R`) the same
    /// way `HashMap::new` is pinned to `RandomState`: so callers get type
    /// inference for the common case and only reach for
    /// [`with_collaborators`](EventQueue::with_collaborators) or an explicit
    /// `EventQueue::<R>::new` turbofish when a different mutex is needed.
    pub fn new(capacity: usize) -> Result<Self, CreateError> {
        Self::with_collaborators(
            capacity,
            Arc::new(SystemClock::new()),
            Arc::new(CondvarWakeSource::new()),
        )
    }
}

impl<R: RawMutex> EventQueue<R> {
    /// Like [`new`](EventQueue::new), but with caller-supplied tick and sleep/wake
    /// collaborators -- the Rust expansion of the spec's "any conforming
    /// implementation is acceptable" collaborator contract.
    pub fn with_collaborators(
        capacity: usize,
        clock: Arc<dyn Clock>,
        wake: Arc<dyn WakeSource>,
    ) -> Result<Self, CreateError> {
        let slab = Slab::new(capacity)?;
        log::debug!("equeue: queue created, capacity={capacity}");
        Ok(Self {
            inner: Mutex::new(QueueState {
                slab,
                pending_head: ptr::null_mut(),
                break_count: 0,
            }),
            clock,
            wake,
        })
    }

    /// Carves a chunk of at least `payload_size` bytes from the backing
    /// buffer and returns a pointer to its (uninitialized) payload, or null
    /// if the buffer cannot satisfy the request.
    pub fn alloc(&self, payload_size: usize) -> *mut u8 {
        let mut state = self.inner.lock();
        let chunk = state.slab.alloc(payload_size);
        drop(state);

        if chunk.is_null() {
            log::debug!("equeue: alloc({payload_size}) failed, buffer exhausted");
            return ptr::null_mut();
        }
        // SAFETY: `chunk` was just carved by the slab and is not null.
        unsafe { event::payload_ptr(chunk) }
    }

    /// Runs `payload`'s destructor (if any) and returns its chunk to the free
    /// list, without posting it.
    ///
    /// # Safety
    /// `payload` must have been returned by [`alloc`](Self::alloc) on this
    /// queue, must not currently be posted, and must not already have been
    /// deallocated.
    pub unsafe fn dealloc(&self, payload: *mut u8) {
        if payload.is_null() {
            return;
        }
        let chunk = event::header_of(payload);
        let mut state = self.inner.lock();
        state.slab.dealloc(chunk);
    }

    /// Stages a relative delay (milliseconds from "now" at `post` time) for
    /// the next `post` of this chunk. Has no effect once posted.
    ///
    /// # Safety
    /// `payload` must have been returned by [`alloc`](Self::alloc) on this
    /// queue and not yet posted.
    pub unsafe fn event_delay(&self, payload: *mut u8, delay_ms: u32) {
        let chunk = event::header_of(payload);
        let _state = self.inner.lock();
        // Reused as a staging field: holds the relative delay until `post`
        // resolves it into an absolute tick.
        (*chunk).target = delay_ms;
    }

    /// Marks the chunk as periodic with the given millisecond interval. A
    /// period of zero is legal (the spec's "loop protection" scenario covers
    /// it) -- the dispatch loop still only processes one batch per call when
    /// a finite timeout has already elapsed.
    ///
    /// # Safety
    /// `payload` must have been returned by [`alloc`](Self::alloc) on this
    /// queue and not yet posted.
    pub unsafe fn event_period(&self, payload: *mut u8, period_ms: u32) {
        let chunk = event::header_of(payload);
        let _state = self.inner.lock();
        (*chunk).period = Period::Every(period_ms);
    }

    /// Sets (or, with `None`, clears) the destructor invoked when this
    /// chunk's `dealloc` eventually runs -- whether that is reached via
    /// normal one-shot completion, `cancel`, or queue teardown.
    ///
    /// # Safety
    /// `payload` must have been returned by [`alloc`](Self::alloc) on this
    /// queue and not already deallocated.
    pub unsafe fn event_dtor(&self, payload: *mut u8, dtor: Option<RawDtor>) {
        let chunk = event::header_of(payload);
        let mut state = self.inner.lock();
        state.slab.set_dtor(chunk, dtor);
    }

    /// Transfers ownership of `payload`'s chunk to the queue, scheduling
    /// `callback` to run at its staged delay (or immediately, if
    /// [`event_delay`](Self::event_delay) was never called). Returns a
    /// nonzero id on success, or zero if `payload` is null.
    ///
    /// # Safety
    /// `payload` must have been returned by [`alloc`](Self::alloc) on this
    /// queue and not already posted or deallocated.
    pub unsafe fn post(&self, payload: *mut u8, callback: RawCallback) -> EventId {
        if payload.is_null() {
            return 0;
        }
        let chunk = event::header_of(payload);
        let mut state = self.inner.lock();

        let now = self.clock.now_ms();
        let delay = (*chunk).target;
        (*chunk).target = now.wrapping_add(delay);
        (*chunk).callback = Some(callback);
        (*chunk).generation = event::next_generation((*chunk).generation);
        let generation = (*chunk).generation;

        let offset = state
            .slab
            .offset_of(chunk)
            .expect("chunk must belong to this queue's slab");

        let became_head = state.is_new_head((*chunk).target);
        state.pending_insert(chunk);
        drop(state);

        if became_head {
            self.wake.notify();
        }

        let id = event::encode_id(offset / event::HEADER_ALIGN, generation);
        log::trace!("equeue: post id={id:#x}");
        id
    }

    /// Safe to call at any time with any value, including zero or an id for
    /// an event that already ran or was already cancelled -- those cases are
    /// silent no-ops.
    pub fn cancel(&self, id: EventId) {
        if id == 0 {
            return;
        }
        let (offset_units, generation) = event::decode_id(id);
        let offset = offset_units * event::HEADER_ALIGN;

        let mut state = self.inner.lock();
        let chunk = match state.slab.chunk_at_offset(offset) {
            Some(chunk) => chunk,
            None => return,
        };

        unsafe {
            if !(*chunk).linked || (*chunk).generation != generation {
                log::trace!("equeue: cancel id={id:#x} missed");
                return;
            }
            state.pending_unlink(chunk);
            state.slab.dealloc(chunk);
        }
    }

    /// Requests that one in-progress or future `dispatch` call exit after
    /// completing its current batch. Safe to call with no dispatcher running
    /// -- the request is simply queued for the next `dispatch` call.
    pub fn break_dispatch(&self) {
        let mut state = self.inner.lock();
        state.break_count += 1;
        drop(state);
        self.wake.notify();
    }

    /// Runs the dispatch loop: detach due events, run them, sleep until the
    /// next deadline or an external wake. `timeout_ms < 0` runs forever (or
    /// until `break_dispatch`); `timeout_ms == 0` drains whatever is
    /// currently due and returns without sleeping past that.
    pub fn dispatch(&self, timeout_ms: i64) {
        log::trace!("equeue: dispatch enter timeout_ms={timeout_ms}");
        let start = self.clock.now_ms();
        let deadline = if timeout_ms < 0 {
            None
        } else {
            Some(start.wrapping_add(timeout_ms.max(0) as u32))
        };

        loop {
            let now = self.clock.now_ms();
            let due = {
                let mut state = self.inner.lock();
                unsafe { state.extract_due(now) }
            };

            let mut node = due;
            while !node.is_null() {
                // SAFETY: `node` was just detached from `pending`; nothing
                // else can touch it until we either re-link or dealloc it.
                unsafe {
                    let next_in_batch = (*node).next;
                    let periodic = matches!((*node).period, Period::Every(_));

                    if periodic {
                        let interval = match (*node).period {
                            Period::Every(p) => p,
                            Period::Once => unreachable!("checked above"),
                        };
                        (*node).target = (*node).target.wrapping_add(interval);
                        (*node).generation = event::next_generation((*node).generation);
                        let mut state = self.inner.lock();
                        state.pending_insert(node);
                        drop(state);
                    }

                    if let Some(cb) = (*node).callback {
                        cb(event::payload_ptr(node));
                    }

                    if !periodic {
                        let mut state = self.inner.lock();
                        state.slab.dealloc(node);
                        drop(state);
                    }

                    node = next_in_batch;
                }
            }

            let mut state = self.inner.lock();
            if state.break_count > 0 {
                state.break_count -= 1;
                drop(state);
                log::trace!("equeue: dispatch exit via break_dispatch");
                return;
            }
            let head_target = unsafe { state.pending_head.as_ref() }.map(|h| h.target);
            drop(state);

            let now = self.clock.now_ms();
            let remaining_ms = match deadline {
                Some(deadline) => {
                    let remaining = wrap_diff(deadline, now);
                    if remaining <= 0 {
                        log::trace!("equeue: dispatch exit via timeout");
                        return;
                    }
                    Some(remaining as u32)
                }
                None => None,
            };

            let sleep_ms = match (head_target, remaining_ms) {
                (Some(target), Some(remaining)) => {
                    wrap_diff(target, now).max(0) as u32
                }
                .min(remaining),
                (Some(target), None) => wrap_diff(target, now).max(0) as u32,
                (None, Some(remaining)) => remaining,
                (None, None) => {
                    self.wake.wait(None);
                    continue;
                }
            };
            self.wake.wait(Some(Duration::from_millis(sleep_ms as u64)));
        }
    }
}

impl<R: RawMutex> Drop for EventQueue<R> {
    fn drop(&mut self) {
        let state = self.inner.get_mut();
        // SAFETY: we hold `&mut self`, so no other reference to this queue's
        // state can exist; walking and running destructors on everything
        // still in `pending` is exactly "destroy invokes the destructor
        // exactly once for every live event".
        unsafe {
            let mut node = state.pending_head;
            while !node.is_null() {
                let next = (*node).next;
                if let Some(dtor) = (*node).dtor {
                    dtor(event::payload_ptr(node));
                }
                node = next;
            }
        }
        // The slab's own `Drop` frees the backing buffer; chunks already on
        // its free list had their destructors run by a prior `dealloc`.
    }
}
