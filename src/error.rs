//! Errors surfaced by heap initialization.

/// Errors returned by [`crate::Heap::init`] and [`crate::Heap::init_from_symbols`].
///
/// `alloc`/`free` never return these: per the allocator's contract they signal
/// failure by returning a null pointer, exactly as a bare `malloc`/`free`
/// would. `init` is a one-time, caller-driven setup call, so a typed `Result`
/// is the more idiomatic shape here.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HeapError {
    /// The supplied region is smaller than a single free chunk header, so it
    /// could not even be inserted into the free list.
    #[error("heap region of {len} bytes is smaller than the minimum chunk size of {minimum} bytes")]
    RegionTooSmall { len: usize, minimum: usize },

    /// The supplied base address or length is not a multiple of the pointer
    /// size.
    #[error("heap region at {addr:#x} is not aligned to the required {required}-byte boundary")]
    Misaligned { addr: usize, required: usize },
}
