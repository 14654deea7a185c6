#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod arena;
mod bitfield;
mod block;
mod check;
mod classes;
mod error;
mod explicit;
mod implicit;
mod list;
mod node;
mod segregated;
mod slab;
mod tag;
mod utils;

#[cfg(feature = "counters")]
mod counters;
#[cfg(feature = "lock_api")]
mod sync;

pub use arena::Arena;
pub use bitfield::{BitField, Occupancy};
pub use check::{Report, Violation};
pub use classes::{DefaultClasses, SizeClasses, MAX_SIZE_CLASSES};
pub use error::OutOfMemory;
pub use explicit::Explicit;
pub use implicit::Implicit;
pub use segregated::Segregated;
pub use slab::{SLAB_HEADER_SIZE, SLAB_SIZE};
pub use tag::BlockTag;

#[cfg(feature = "counters")]
pub use counters::Counters;
#[cfg(feature = "lock_api")]
pub use sync::Locked;

use core::ptr::NonNull;

/// Payload alignment of the explicit and segregated designs.
pub const ALIGNMENT: usize = 16;
/// Quantum by which heaps grow; also the size of a slab.
pub const CHUNK_SIZE: usize = 4096;
/// Smallest block the explicit list manages: header, two links and a footer.
pub const MIN_BLOCK_SIZE: usize = 32;

/// Payload alignment of the implicit design.
pub const IMPLICIT_ALIGNMENT: usize = 8;
/// Smallest implicit-list block: header, footer and one double word.
pub const IMPLICIT_MIN_BLOCK_SIZE: usize = 16;

/// The `malloc` family over a simulated [`Arena`].
///
/// Implementations are single-threaded and non-reentrant. Wrap one in
/// [`Locked`] to share it between threads.
///
/// Every method except [`init`](Malloc::init) and
/// [`check_heap`](Malloc::check_heap) assumes `init` has succeeded;
/// allocation before then returns `None`.
pub trait Malloc {
    /// Reset the arena and every index, then lay out an empty heap.
    ///
    /// May be called again at any time to discard all allocations.
    fn init(&mut self) -> Result<(), OutOfMemory>;

    /// Allocate at least `size` bytes aligned to [`alignment`](Malloc::alignment).
    ///
    /// Returns `None` if `size` is zero or the arena is exhausted.
    fn malloc(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Return an allocation to the heap. `None` is a no-op.
    ///
    /// # Safety
    /// `ptr` must have been returned by this allocator since the last
    /// [`init`](Malloc::init) and not been freed since.
    unsafe fn free(&mut self, ptr: Option<NonNull<u8>>);

    /// Resize an allocation, preserving the first `min(old, size)` payload bytes.
    ///
    /// A `None` pointer allocates. A zero `size` frees `ptr` and returns it
    /// unchanged. On failure `None` is returned and the original allocation
    /// is left intact.
    ///
    /// # Safety
    /// See [`free`](Malloc::free).
    unsafe fn realloc(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>>;

    /// Allocate zero-filled storage for `count` elements of `elem_size` bytes.
    ///
    /// Returns `None` if the product overflows.
    fn calloc(&mut self, count: usize, elem_size: usize) -> Option<NonNull<u8>> {
        let size = count.checked_mul(elem_size)?;
        let ptr = self.malloc(size)?;

        // SAFETY: `malloc` handed out at least `size` writable bytes at `ptr`.
        unsafe {
            ptr.as_ptr().write_bytes(0, size);
        }

        Some(ptr)
    }

    /// Number of payload bytes the allocation at `ptr` can hold.
    ///
    /// # Safety
    /// `ptr` must be a live allocation of this allocator.
    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize;

    /// Alignment of every pointer this allocator returns.
    fn alignment(&self) -> usize;

    /// Validate the heap's structure without modifying it.
    ///
    /// If `verbose`, every block and slab is dumped through the `log` facade
    /// under the `segalloc::dump` target.
    fn check_heap(&self, verbose: bool) -> Report;

    /// The arena backing this allocator.
    fn arena(&self) -> &Arena;
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// Fill the payload at `ptr` with a pattern derived from `seed`.
    pub fn scribble(ptr: NonNull<u8>, len: usize, seed: u8) {
        for i in 0..len {
            unsafe { ptr.as_ptr().add(i).write(seed.wrapping_add(i as u8)) };
        }
    }

    /// Check that the payload at `ptr` still holds the pattern from [`scribble`].
    pub fn verify(ptr: NonNull<u8>, len: usize, seed: u8) -> bool {
        (0..len).all(|i| unsafe { ptr.as_ptr().add(i).read() } == seed.wrapping_add(i as u8))
    }

    /// Randomized malloc/free/realloc/calloc against `heap`, checking
    /// alignment, content preservation and heap consistency throughout.
    pub fn random_actions<M: Malloc>(heap: &mut M, seed: u64, rounds: usize, max_size: usize) {
        let rng = fastrand::Rng::with_seed(seed);
        let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

        for round in 0..rounds {
            match rng.u8(0..8) {
                0..=2 => {
                    let size = rng.usize(1..=max_size);
                    let tag = rng.u8(..);
                    if let Some(ptr) = heap.malloc(size) {
                        assert_eq!(ptr.as_ptr() as usize % heap.alignment(), 0);
                        assert!(unsafe { heap.usable_size(ptr) } >= size);
                        scribble(ptr, size, tag);
                        live.push((ptr, size, tag));
                    }
                }
                3 => {
                    let size = rng.usize(1..=max_size / 4 + 1);
                    if let Some(ptr) = heap.calloc(4, size) {
                        assert!((0..4 * size).all(|i| unsafe { ptr.as_ptr().add(i).read() } == 0));
                        let tag = rng.u8(..);
                        scribble(ptr, 4 * size, tag);
                        live.push((ptr, 4 * size, tag));
                    }
                }
                4..=5 if !live.is_empty() => {
                    let (ptr, size, tag) = live.swap_remove(rng.usize(..live.len()));
                    assert!(verify(ptr, size, tag), "payload clobbered before free");
                    unsafe { heap.free(Some(ptr)) };
                }
                6..=7 if !live.is_empty() => {
                    let index = rng.usize(..live.len());
                    let (ptr, size, tag) = live[index];
                    let new_size = rng.usize(1..=max_size);
                    match unsafe { heap.realloc(Some(ptr), new_size) } {
                        Some(new_ptr) => {
                            assert!(verify(new_ptr, size.min(new_size), tag));
                            scribble(new_ptr, new_size, tag);
                            live[index] = (new_ptr, new_size, tag);
                        }
                        None => assert!(verify(ptr, size, tag)),
                    }
                }
                _ => {}
            }

            if round % 64 == 0 {
                let report = heap.check_heap(false);
                assert!(report.is_clean(), "round {}: {:?}", round, report.violations());
            }
        }

        for &(ptr, size, tag) in &live {
            assert!(verify(ptr, size, tag));
        }

        // payloads never overlap
        let mut spans: Vec<(usize, usize)> =
            live.iter().map(|&(p, size, _)| (p.as_ptr() as usize, size)).collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0);
        }

        for (ptr, ..) in live {
            unsafe { heap.free(Some(ptr)) };
        }

        let report = heap.check_heap(false);
        assert!(report.is_clean(), "{:?}", report.violations());
    }
}
