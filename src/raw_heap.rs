//! The unsynchronized free-list engine: `init`, `alloc`, `free`, `dump`.
//!
//! `RawHeap` is where every other piece of this crate comes together. It owns
//! no memory of its own — it manages whatever `[base, base+len)` region it was
//! handed at [`RawHeap::init`] time. None of its methods take a lock; callers
//! must ensure each call happens inside a critical section that excludes all
//! other calls into the same `RawHeap`, including from interrupt context.
//! [`crate::Heap`] is the synchronized wrapper built on top.

use core::mem::size_of;
use core::ptr::NonNull;

use crate::alloc_header::{AllocHeader, HEAP_MAGIC};
use crate::chunk::FreeChunk;
use crate::error::HeapError;
use crate::free_list::FreeList;

const POINTER_SIZE: usize = size_of::<usize>();

fn round_up(n: usize, multiple: usize) -> usize {
    (n + (multiple - 1)) & !(multiple - 1)
}

/// The raw, unsynchronized allocator state.
///
/// # Safety contract
/// Every method below must be called as though from within a single critical
/// section shared by the whole heap: no two calls (including a call and an
/// interrupt handler reentering with another call) may run concurrently.
pub(crate) struct RawHeap {
    base: usize,
    len: usize,
    free_list: FreeList,
}

impl RawHeap {
    /// Minimum effective alignment promised for any nonzero alignment
    /// request. See `Heap::MIN_ALIGN` for the public-facing name.
    pub(crate) const MIN_ALIGN: usize = 16;

    pub(crate) const fn new() -> Self {
        Self {
            base: 0,
            len: 0,
            free_list: FreeList::new(),
        }
    }

    /// Set the managed region to `[base, base+len)` and seed the free list
    /// with a single chunk spanning it.
    ///
    /// # Safety
    /// - `base` must be valid for reads and writes of `len` bytes for the
    ///   remaining lifetime of this `RawHeap`.
    /// - No other code may access `[base, base+len)` afterwards except
    ///   through this heap.
    pub(crate) unsafe fn init(&mut self, base: NonNull<u8>, len: usize) -> Result<(), HeapError> {
        let addr = base.as_ptr() as usize;
        if addr % POINTER_SIZE != 0 || len % POINTER_SIZE != 0 {
            return Err(HeapError::Misaligned {
                addr,
                required: POINTER_SIZE,
            });
        }
        if len < FreeChunk::HEADER_SIZE {
            return Err(HeapError::RegionTooSmall {
                len,
                minimum: FreeChunk::HEADER_SIZE,
            });
        }

        self.base = addr;
        self.len = len;
        self.free_list = FreeList::new();

        // SAFETY: `base` is valid for `len` bytes per this function's own
        // contract, and `len` was just checked to be pointer-size aligned and
        // at least `FreeChunk::HEADER_SIZE`.
        let whole_region = unsafe { FreeChunk::new_in_place(base, len) };
        unsafe { self.free_list.insert(whole_region) };

        Ok(())
    }

    /// First-fit, coalescing allocation. Returns null on bad alignment or if
    /// no free chunk is large enough.
    pub(crate) fn alloc(&mut self, requested_size: usize, alignment: usize) -> *mut u8 {
        if alignment != 0 && !alignment.is_power_of_two() {
            return core::ptr::null_mut();
        }

        let mut size = requested_size + AllocHeader::SIZE;
        size = size.max(FreeChunk::HEADER_SIZE);
        size = round_up(size, POINTER_SIZE);

        let alignment = if alignment > 0 {
            let alignment = alignment.max(Self::MIN_ALIGN);
            size += alignment;
            alignment
        } else {
            0
        };

        let chunk = match self.free_list.first_fit(size) {
            Some(chunk) => chunk,
            None => return core::ptr::null_mut(),
        };

        let span_base = FreeChunk::addr(chunk);
        // SAFETY: `chunk` was just removed from the free list by `first_fit`
        // and is not aliased anywhere else.
        let chunk_len = unsafe { chunk.as_ref().len };

        let eff_size = if chunk_len > size + FreeChunk::HEADER_SIZE {
            // Enough slack left over to carve a new free chunk after the
            // allocation; the remainder goes straight back into the list.
            let remainder_ptr = span_base + size;
            let remainder_len = chunk_len - size;
            // SAFETY: `remainder_ptr..+remainder_len` lies entirely inside the
            // span we just removed from the list and is otherwise unused.
            let remainder = unsafe {
                FreeChunk::new_in_place(
                    NonNull::new_unchecked(remainder_ptr as *mut u8),
                    remainder_len,
                )
            };
            unsafe { self.free_list.insert(remainder) };
            size
        } else {
            // Slack too small to host a free-chunk header; it stays attached
            // to this allocation and comes back whole on free.
            chunk_len
        };

        let span_start = span_base as *mut u8;
        // SAFETY: `span_start` is valid for `eff_size` bytes (it is exactly
        // the span we just carved out of the free list).
        let user_unaligned = unsafe { span_start.add(AllocHeader::SIZE) };
        let user_ptr = if alignment > 0 {
            round_up(user_unaligned as usize, alignment) as *mut u8
        } else {
            user_unaligned
        };

        // `<=`, not `<`: a zero-size allocation that exactly consumes the
        // rest of its span legitimately lands `user_ptr` on the boundary.
        debug_assert!((user_ptr as usize) <= span_base + eff_size);
        debug_assert!(alignment == 0 || (user_ptr as usize) % alignment == 0);

        let header_at = unsafe { NonNull::new_unchecked(user_ptr.sub(AllocHeader::SIZE)) };
        // SAFETY: `header_at..+AllocHeader::SIZE` lies within
        // `[span_base, span_base+eff_size)`, which we own exclusively.
        unsafe { AllocHeader::write(header_at, span_base, eff_size) };

        user_ptr
    }

    /// Return a previously allocated span to the free pool. `ptr == null` is
    /// a no-op.
    ///
    /// # Safety
    /// `ptr`, if non-null, must be a pointer previously returned by
    /// [`RawHeap::alloc`] on this same heap, not already freed.
    pub(crate) unsafe fn free(&mut self, ptr: *mut u8) {
        let Some(user_ptr) = NonNull::new(ptr) else {
            return;
        };

        // SAFETY: caller guarantees `user_ptr` was produced by a prior
        // `alloc`, so a live header immediately precedes it.
        let header = unsafe { AllocHeader::read_before(user_ptr) };
        debug_assert_eq!(
            header.magic, HEAP_MAGIC,
            "corrupted allocation header or double free"
        );

        // SAFETY: `header.span_base` names a span this heap previously handed
        // out in full and which is not referenced anywhere else once freed.
        let chunk = unsafe {
            FreeChunk::new_in_place(
                NonNull::new_unchecked(header.span_base as *mut u8),
                header.span_size,
            )
        };
        unsafe { self.free_list.insert(chunk) };
    }

    /// Enumerate the free list for diagnostics. Does not mutate state.
    pub(crate) fn dump(&self) {
        log::debug!("heap dump: base={:#x} len={:#x}", self.base, self.len);
        for (base, len) in self.free_list.iter() {
            log::debug!("  free chunk: base={:#x} end={:#x} len={:#x}", base, base + len, len);
        }
    }

    /// Length of the largest contiguous free chunk, or `0` if the free list
    /// is empty. A quick, allocation-free fragmentation check: a fully
    /// coalesced heap reports its entire region length here.
    pub(crate) fn largest_free_chunk_len(&self) -> usize {
        self.free_list.iter().map(|(_, len)| len).max().unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn free_list_chunks(&self) -> std::vec::Vec<(usize, usize)> {
        self.free_list.iter().collect()
    }

    #[cfg(test)]
    pub(crate) fn region(&self) -> (usize, usize) {
        (self.base, self.len)
    }
}
