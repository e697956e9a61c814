//! Address-ordered, coalescing doubly linked list of free chunks.
//!
//! The list is the only bookkeeping structure the allocator maintains outside
//! of the managed region itself: every node lives inside the span it
//! describes. Keeping the list strictly address-ordered is what makes
//! coalescing cheap — a newly freed chunk can only ever be adjacent to its
//! immediate list neighbors, so merging never needs more than a
//! predecessor/successor check.

use core::ptr::NonNull;

use crate::chunk::FreeChunk;

/// An address-ordered, doubly linked, coalescing free list.
pub(crate) struct FreeList {
    head: Option<NonNull<FreeChunk>>,
    tail: Option<NonNull<FreeChunk>>,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    /// Detach `node` from the list, patching its neighbors' linkage.
    ///
    /// # Safety
    /// `node` must currently be a member of this list.
    unsafe fn unlink(&mut self, node: NonNull<FreeChunk>) {
        // SAFETY: `node` is a member of this list by precondition, so its
        // `prev`/`next` point at other members or are `None`.
        let (prev, next) = unsafe { (node.as_ref().prev, node.as_ref().next) };

        match prev {
            // SAFETY: `prev` is `node`'s predecessor, hence a list member.
            Some(mut prev) => unsafe { prev.as_mut().next = next },
            None => self.head = next,
        }
        match next {
            // SAFETY: `next` is `node`'s successor, hence a list member.
            Some(mut next) => unsafe { next.as_mut().prev = prev },
            None => self.tail = prev,
        }
    }

    /// Insert `node` immediately before `before` (or at the tail if `before`
    /// is `None`), without attempting any coalescing.
    unsafe fn link_before(&mut self, node: NonNull<FreeChunk>, before: Option<NonNull<FreeChunk>>) {
        let prev = match before {
            // SAFETY: `before` is a list member by this function's precondition.
            Some(before) => unsafe { before.as_ref().prev },
            None => self.tail,
        };

        // SAFETY: `node` is detached (by this function's precondition) but
        // otherwise a valid, exclusively-owned `FreeChunk` to write into.
        unsafe {
            (*node.as_ptr()).prev = prev;
            (*node.as_ptr()).next = before;
        }
        match prev {
            // SAFETY: `prev` is a list member, linked in just above as `node`'s predecessor.
            Some(mut prev) => unsafe { prev.as_mut().next = Some(node) },
            None => self.head = Some(node),
        }
        match before {
            // SAFETY: `before` is a list member by this function's precondition.
            Some(mut before) => unsafe { before.as_mut().prev = Some(node) },
            None => self.tail = Some(node),
        }
    }

    /// Insert a detached chunk into the list, merging with the predecessor
    /// and/or successor whenever they turn out to be physically adjacent.
    ///
    /// Returns the chunk that `chunk` ultimately became part of — this may be
    /// `chunk` itself, or a predecessor it got merged into.
    ///
    /// # Safety
    /// `chunk` must not currently be linked into this (or any) list, and must
    /// not overlap any chunk already in the list.
    pub(crate) unsafe fn insert(&mut self, chunk: NonNull<FreeChunk>) -> NonNull<FreeChunk> {
        // Find the first chunk whose address exceeds `chunk`'s.
        let mut next = self.head;
        while let Some(candidate) = next {
            if FreeChunk::addr(candidate) > FreeChunk::addr(chunk) {
                break;
            }
            // SAFETY: `candidate` is a list member.
            next = unsafe { candidate.as_ref().next };
        }

        debug_assert!(
            next.map_or(true, |n| FreeChunk::end_addr(chunk) <= FreeChunk::addr(n)),
            "free chunk overlaps its successor"
        );

        // SAFETY: `chunk` is detached and non-overlapping per this function's
        // precondition, and `next` (if any) is a list member found above.
        unsafe { self.link_before(chunk, next) };

        let mut merged = chunk;

        // Merge with the predecessor, if adjacent.
        // SAFETY: `merged` is now linked into the list.
        let prev = unsafe { merged.as_ref().prev };
        if let Some(mut prev) = prev {
            if FreeChunk::end_addr(prev) == FreeChunk::addr(merged) {
                debug_assert!(
                    FreeChunk::end_addr(prev) <= FreeChunk::addr(merged),
                    "free chunk overlaps its predecessor"
                );
                // SAFETY: `prev` and `merged` are both list members just read
                // above; `merged` is unlinked immediately after absorbing its
                // length into `prev`, so no dangling reference is left behind.
                unsafe {
                    prev.as_mut().len += merged.as_ref().len;
                    self.unlink(merged);
                }
                merged = prev;
            }
        }

        // Merge with the successor, if adjacent.
        // SAFETY: `merged` is still linked into the list (possibly now `prev`).
        let next = unsafe { merged.as_ref().next };
        if let Some(next) = next {
            if FreeChunk::end_addr(merged) == FreeChunk::addr(next) {
                // SAFETY: `next` and `merged` are both list members just read
                // above; `next` is unlinked immediately after absorbing its
                // length into `merged`, so no dangling reference is left behind.
                unsafe {
                    let next_len = next.as_ref().len;
                    (*merged.as_ptr()).len += next_len;
                    self.unlink(next);
                }
            }
        }

        merged
    }

    /// First-fit search: remove and return the first chunk whose length is at
    /// least `size`, in address order. Returns `None` if none is large enough.
    pub(crate) fn first_fit(&mut self, size: usize) -> Option<NonNull<FreeChunk>> {
        let mut cursor = self.head;
        while let Some(candidate) = cursor {
            // SAFETY: `candidate` is a list member.
            let len = unsafe { candidate.as_ref().len };
            debug_assert_eq!(len % core::mem::size_of::<usize>(), 0);
            if len >= size {
                // SAFETY: `candidate` is a list member, read from the cursor above.
                unsafe { self.unlink(candidate) };
                return Some(candidate);
            }
            // SAFETY: `candidate` is a list member.
            cursor = unsafe { candidate.as_ref().next };
        }
        None
    }

    /// Iterate over the free list in address order, yielding `(base, len)`.
    ///
    /// Used by `dump()` and by tests that check list-wide invariants.
    pub(crate) fn iter(&self) -> FreeListIter {
        FreeListIter { next: self.head }
    }
}

pub(crate) struct FreeListIter {
    next: Option<NonNull<FreeChunk>>,
}

impl Iterator for FreeListIter {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        // SAFETY: `node` is a live member of the list being iterated; the
        // list is not mutated while an iterator over it is alive.
        let (len, next) = unsafe { (node.as_ref().len, node.as_ref().next) };
        self.next = next;
        Some((FreeChunk::addr(node), len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;
    use std::vec::Vec;

    const PTR: usize = size_of::<usize>();

    fn make_chunk(buf: &mut [u8], len: usize) -> NonNull<FreeChunk> {
        let ptr = NonNull::new(buf.as_mut_ptr()).unwrap();
        unsafe { FreeChunk::new_in_place(ptr, len) }
    }

    #[repr(align(16))]
    struct Region([u8; 256]);

    #[test]
    fn insert_into_empty_list_is_head_insert() {
        let mut region = Region([0; 256]);
        let mut list = FreeList::new();
        let chunk = make_chunk(&mut region.0[0..64], 64);

        let result = unsafe { list.insert(chunk) };
        assert_eq!(FreeChunk::addr(result), FreeChunk::addr(chunk));
        let entries: Vec<_> = list.iter().collect();
        assert_eq!(entries, std::vec![(FreeChunk::addr(chunk), 64)]);
    }

    #[test]
    fn adjacent_chunks_merge_on_both_sides() {
        let mut region = Region([0; 256]);
        let base = region.0.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        // Three adjacent 3*PTR spans: [0, 3P) [3P, 6P) [6P, 9P)
        let span = 3 * PTR;
        let c0 = make_chunk(&mut region.0[0..span], span);
        let c2 = make_chunk(&mut region.0[2 * span..3 * span], span);
        unsafe {
            list.insert(c0);
            list.insert(c2);
        }
        // Not adjacent yet: two separate entries.
        assert_eq!(
            list.iter().collect::<Vec<_>>(),
            std::vec![(base, span), (base + 2 * span, span)]
        );

        // Now insert the middle chunk: it should merge with both neighbors
        // into a single chunk spanning all three.
        let c1 = make_chunk(&mut region.0[span..2 * span], span);
        let merged = unsafe { list.insert(c1) };
        assert_eq!(FreeChunk::addr(merged), base);
        assert_eq!(unsafe { merged.as_ref().len }, 3 * span);
        assert_eq!(
            list.iter().collect::<Vec<_>>(),
            std::vec![(base, 3 * span)]
        );
    }

    #[test]
    fn first_fit_returns_first_large_enough_and_unlinks_it() {
        let mut region = Region([0; 256]);
        let mut list = FreeList::new();
        let small = make_chunk(&mut region.0[0..32], 32);
        let gap = 64; // leave a gap so the two chunks never merge
        let big = make_chunk(&mut region.0[32 + gap..32 + gap + 64], 64);
        unsafe {
            list.insert(small);
            list.insert(big);
        }

        let found = list.first_fit(64).unwrap();
        assert_eq!(FreeChunk::addr(found), FreeChunk::addr(big));
        // `big` is no longer in the list.
        assert_eq!(
            list.iter().collect::<Vec<_>>(),
            std::vec![(FreeChunk::addr(small), 32)]
        );
    }

    #[test]
    fn first_fit_on_empty_list_is_none() {
        let mut list = FreeList::new();
        assert!(list.first_fit(16).is_none());
    }
}
