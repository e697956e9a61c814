//! In-place header written over a span of free memory.
//!
//! A [`FreeChunk`] is never allocated separately: it is overlaid onto the first
//! bytes of whatever span it describes. This is the only metadata a free span
//! carries, which is why a chunk must always be at least [`FreeChunk::HEADER_SIZE`]
//! bytes long.

use core::mem::size_of;
use core::ptr::NonNull;

/// Header for a free span, stored at the span's own address.
///
/// `len` is the total length of the span, header included. `prev`/`next` link
/// the chunk into the address-ordered free list; both are `None` right after
/// construction and are set by [`crate::free_list::FreeList::insert`].
#[repr(C)]
pub(crate) struct FreeChunk {
    pub(crate) prev: Option<NonNull<FreeChunk>>,
    pub(crate) next: Option<NonNull<FreeChunk>>,
    pub(crate) len: usize,
}

impl FreeChunk {
    /// Size of the header itself; also the floor on any free chunk's `len`.
    pub(crate) const HEADER_SIZE: usize = size_of::<FreeChunk>();

    /// Construct a free chunk in place over `ptr..ptr+len`.
    ///
    /// Linkage is left at `None`; the caller is expected to hand the returned
    /// pointer to [`crate::free_list::FreeList::insert`] right away.
    ///
    /// # Safety
    /// - `ptr` must be valid for reads and writes of `len` bytes and must be
    ///   sufficiently aligned for `FreeChunk`.
    /// - `len` must be a multiple of `size_of::<usize>()` and at least
    ///   `HEADER_SIZE`.
    /// - No other reference to `ptr..ptr+len` may exist.
    pub(crate) unsafe fn new_in_place(ptr: NonNull<u8>, len: usize) -> NonNull<FreeChunk> {
        debug_assert_eq!(len % size_of::<usize>(), 0, "chunk length must be pointer-size aligned");
        debug_assert!(len >= Self::HEADER_SIZE, "chunk shorter than its own header");

        let chunk: NonNull<FreeChunk> = ptr.cast();
        // SAFETY: caller guarantees `ptr` is valid for writes of `len >= HEADER_SIZE`
        // bytes and suitably aligned.
        unsafe {
            chunk.as_ptr().write(FreeChunk {
                prev: None,
                next: None,
                len,
            });
        }
        chunk
    }

    /// Address of the chunk itself (i.e. the span's base).
    pub(crate) fn addr(this: NonNull<FreeChunk>) -> usize {
        this.as_ptr() as usize
    }

    /// Address one past the end of the span (`addr(this) + len`).
    pub(crate) fn end_addr(this: NonNull<FreeChunk>) -> usize {
        // SAFETY: `this` is a live chunk header; callers only ever hold such
        // pointers while they point at initialized `FreeChunk`s.
        let len = unsafe { this.as_ref().len };
        Self::addr(this) + len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::align_of;

    #[test]
    fn header_size_is_pointer_multiple() {
        assert_eq!(FreeChunk::HEADER_SIZE % size_of::<usize>(), 0);
    }

    #[test]
    fn construct_and_read_back() {
        #[repr(align(16))]
        struct Buf([u8; 64]);
        let mut buf = Buf([0; 64]);
        let ptr = NonNull::new(buf.0.as_mut_ptr()).unwrap();
        assert!(ptr.as_ptr() as usize % align_of::<FreeChunk>() == 0);

        let len = 64 - (64 % size_of::<usize>());
        let chunk = unsafe { FreeChunk::new_in_place(ptr, len) };
        assert_eq!(FreeChunk::addr(chunk), ptr.as_ptr() as usize);
        assert_eq!(FreeChunk::end_addr(chunk), ptr.as_ptr() as usize + len);
        unsafe {
            assert_eq!(chunk.as_ref().len, len);
            assert!(chunk.as_ref().prev.is_none());
            assert!(chunk.as_ref().next.is_none());
        }
    }
}
