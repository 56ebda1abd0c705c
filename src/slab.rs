//! Fixed-backing-buffer slab allocator with best-fit free-list coalescing (C1).
//!
//! Carves `equeue`-style chunks (header + opaque payload) out of a single
//! contiguous buffer handed to the queue at construction time. After that no
//! further system allocation ever occurs: `alloc` either returns a chunk from
//! the free list or bumps a cursor into never-touched bytes, and `dealloc`
//! only ever returns chunks to the free list.

use crate::event::{self, EventHeader, RawDtor};
use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

/// Owns the backing buffer and the allocator state layered over it.
pub(crate) struct Slab {
    buffer: NonNull<u8>,
    capacity: usize,
    layout: Layout,
    /// Bytes in `[0, bump_offset)` have been carved into a chunk at least once.
    bump_offset: usize,
    /// Head of the free list, chunks in ascending `size` order, unique sizes.
    free_head: *mut EventHeader,
}

unsafe impl Send for Slab {}

impl Slab {
    pub(crate) fn new(capacity: usize) -> Result<Self, SlabCreateError> {
        if capacity == 0 {
            return Err(SlabCreateError::OutOfMemory);
        }
        let layout = Layout::from_size_align(capacity, event::HEADER_ALIGN)
            .map_err(|_| SlabCreateError::OutOfMemory)?;
        // SAFETY: layout has non-zero size, checked above.
        let raw = unsafe { alloc::alloc(layout) };
        let buffer = NonNull::new(raw).ok_or(SlabCreateError::OutOfMemory)?;
        Ok(Self {
            buffer,
            capacity,
            layout,
            bump_offset: 0,
            free_head: ptr::null_mut(),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn buffer_start(&self) -> *mut u8 {
        self.buffer.as_ptr()
    }

    /// Byte offset of `chunk` within the backing buffer, or `None` if it does not
    /// belong to this slab (used defensively by `cancel`'s id decoding).
    pub(crate) fn offset_of(&self, chunk: *mut EventHeader) -> Option<usize> {
        let addr = chunk as usize;
        let base = self.buffer.as_ptr() as usize;
        if addr < base || addr >= base + self.capacity {
            return None;
        }
        Some(addr - base)
    }

    pub(crate) fn chunk_at_offset(&self, offset: usize) -> Option<*mut EventHeader> {
        if offset % event::HEADER_ALIGN != 0 || offset + event::HEADER_SIZE > self.capacity {
            return None;
        }
        // Anything at or past bump_offset is still raw memory from the initial
        // alloc::alloc -- never written through init_header, so reading a header
        // field out of it (e.g. cancel's `.linked` check) would be UB.
        if offset >= self.bump_offset {
            return None;
        }
        // SAFETY: offset checked to stay in-bounds, aligned, and carved above.
        Some(unsafe { self.buffer.as_ptr().add(offset) as *mut EventHeader })
    }

    /// Best-fit search of the free list, falling back to the bump region.
    pub(crate) fn alloc(&mut self, payload_size: usize) -> *mut EventHeader {
        let size = event::chunk_size_for(payload_size) as u32;

        if let Some(chunk) = self.take_best_fit(size) {
            // SAFETY: chunk came from our own free list, still carries its
            // original (>= size) chunk size.
            unsafe { event::init_header(chunk, (*chunk).size) };
            return chunk;
        }

        let needed = size as usize;
        if self.bump_offset + needed > self.capacity {
            return ptr::null_mut();
        }
        // SAFETY: bump_offset + needed <= capacity, checked above; alignment is
        // maintained because every chunk size is a multiple of HEADER_ALIGN and
        // bump_offset starts at zero (itself aligned).
        let chunk = unsafe { self.buffer.as_ptr().add(self.bump_offset) as *mut EventHeader };
        self.bump_offset += needed;
        unsafe { event::init_header(chunk, size) };
        chunk
    }

    /// Runs the destructor (if any) and returns the chunk to the free list.
    ///
    /// # Safety
    /// `chunk` must be a chunk previously returned by `alloc` on this slab, not
    /// already freed, and not currently linked into any other list.
    pub(crate) unsafe fn dealloc(&mut self, chunk: *mut EventHeader) {
        if let Some(dtor) = (*chunk).dtor {
            dtor(event::payload_ptr(chunk));
        }
        (*chunk).callback = None;
        (*chunk).dtor = None;
        (*chunk).linked = false;
        self.free_insert(chunk);
    }

    /// Overwrites a chunk's destructor hook. Passing `None` clears it.
    ///
    /// # Safety
    /// `chunk` must be a live chunk.
    pub(crate) unsafe fn set_dtor(&mut self, chunk: *mut EventHeader, dtor: Option<RawDtor>) {
        (*chunk).dtor = dtor;
    }

    fn take_best_fit(&mut self, min_size: u32) -> Option<*mut EventHeader> {
        unsafe {
            let mut node = self.free_head;
            while !node.is_null() {
                if (*node).size >= min_size {
                    let prev_link = (*node).prev_link;
                    let next = (*node).next;
                    let promoted = (*node).chain;
                    if !promoted.is_null() {
                        (*promoted).next = next;
                        (*promoted).prev_link = prev_link;
                        *prev_link = promoted;
                        if !next.is_null() {
                            (*next).prev_link = &mut (*promoted).next as *mut _;
                        }
                    } else {
                        *prev_link = next;
                        if !next.is_null() {
                            (*next).prev_link = prev_link;
                        }
                    }
                    (*node).next = ptr::null_mut();
                    (*node).prev_link = ptr::null_mut();
                    (*node).chain = ptr::null_mut();
                    return Some(node);
                }
                node = (*node).next;
            }
            None
        }
    }

    fn free_insert(&mut self, chunk: *mut EventHeader) {
        unsafe {
            let size = (*chunk).size;
            let mut link = &mut self.free_head as *mut *mut EventHeader;
            loop {
                let node = *link;
                if node.is_null() {
                    (*chunk).next = ptr::null_mut();
                    (*chunk).chain = ptr::null_mut();
                    (*chunk).prev_link = link;
                    *link = chunk;
                    return;
                }
                if (*node).size == size {
                    (*chunk).next = (*node).next;
                    (*chunk).chain = node;
                    (*chunk).prev_link = link;
                    if !(*chunk).next.is_null() {
                        (*(*chunk).next).prev_link = &mut (*chunk).next as *mut _;
                    }
                    *link = chunk;
                    return;
                }
                if (*node).size > size {
                    (*chunk).next = node;
                    (*chunk).chain = ptr::null_mut();
                    (*chunk).prev_link = link;
                    (*node).prev_link = &mut (*chunk).next as *mut _;
                    *link = chunk;
                    return;
                }
                link = &mut (*node).next as *mut _;
            }
        }
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        // SAFETY: buffer was allocated with `layout` in `new` and is not used
        // again after this point.
        unsafe {
            alloc::dealloc(self.buffer.as_ptr(), self.layout);
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabCreateError {
    #[error("backing buffer could not be allocated")]
    OutOfMemory,
}
