//! The simulated memory the allocators carve up.
//!
//! An [`Arena`] is one contiguous, fixed-capacity buffer with a break that
//! only moves upwards (until [`reset`](Arena::reset)). Allocators address it
//! with byte offsets; the typed accessors below are the only place the
//! buffer is read or written.

use alloc::alloc::{alloc_zeroed, dealloc, handle_alloc_error};
use core::{alloc::Layout, ptr::NonNull};

use crate::{utils::align_up, OutOfMemory, CHUNK_SIZE};

/// Block sizes are stored in 32-bit tags, so no arena may grow past this.
pub(crate) const MAX_CAPACITY: usize = 1 << 31;

/// A contiguous, growable region of simulated heap memory.
pub struct Arena {
    base: NonNull<u8>,
    brk: usize,
    capacity: usize,
}

// The arena exclusively owns its buffer.
unsafe impl Send for Arena {}

impl core::fmt::Debug for Arena {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("base", &self.base)
            .field("brk", &format_args!("{:#x}", self.brk))
            .field("capacity", &format_args!("{:#x}", self.capacity))
            .finish()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl Arena {
    /// 20 MiB.
    pub const DEFAULT_CAPACITY: usize = 20 * (1 << 20);

    /// Alignment of the arena's low address.
    pub const BASE_ALIGN: usize = CHUNK_SIZE;

    /// Reserve an arena able to grow to `capacity` bytes, rounded up to whole chunks.
    ///
    /// # Panics
    /// Panics if `capacity` exceeds 2 GiB. Failure to obtain the backing
    /// buffer aborts through [`handle_alloc_error`].
    pub fn new(capacity: usize) -> Self {
        assert!(capacity <= MAX_CAPACITY, "arena capacity {:#x} exceeds {:#x}", capacity, MAX_CAPACITY);

        let capacity = align_up(capacity.max(CHUNK_SIZE), CHUNK_SIZE);
        let layout = Self::layout(capacity);

        // SAFETY: `layout` has a non-zero size.
        let base = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(base).unwrap_or_else(|| handle_alloc_error(layout));

        Self { base, brk: 0, capacity }
    }

    fn layout(capacity: usize) -> Layout {
        debug_assert!(capacity <= MAX_CAPACITY && capacity % Self::BASE_ALIGN == 0);
        // SAFETY: BASE_ALIGN is a power of two and capacity is far below isize::MAX.
        unsafe { Layout::from_size_align_unchecked(capacity, Self::BASE_ALIGN) }
    }

    /// Move the break up by `by` bytes, returning the previous break as an offset.
    ///
    /// Negative increments and increments past the capacity fail, leaving
    /// the break where it was.
    pub fn extend(&mut self, by: isize) -> Result<usize, OutOfMemory> {
        match usize::try_from(by) {
            Ok(by) => self.extend_by(by),
            Err(_) => {
                log::warn!("arena: refusing negative extension of {} bytes", by);
                Err(OutOfMemory { requested: by, available: self.capacity - self.brk })
            }
        }
    }

    pub(crate) fn extend_by(&mut self, by: usize) -> Result<usize, OutOfMemory> {
        let available = self.capacity - self.brk;

        if by > available {
            log::warn!("arena: out of memory extending by {} bytes ({} available)", by, available);
            return Err(OutOfMemory { requested: by.min(isize::MAX as usize) as isize, available });
        }

        let old_brk = self.brk;
        self.brk += by;
        log::debug!("arena: break {:#x} -> {:#x}", old_brk, self.brk);
        Ok(old_brk)
    }

    /// Drop the break back to the start. Existing contents are left as they are.
    pub fn reset(&mut self) {
        log::debug!("arena: reset from break {:#x}", self.brk);
        self.brk = 0;
    }

    /// Address of the first byte of the arena.
    pub fn low_address(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Address of the last byte below the break.
    ///
    /// When the arena is empty this is one byte below [`low_address`](Arena::low_address).
    pub fn high_address(&self) -> *mut u8 {
        self.base.as_ptr().wrapping_add(self.brk).wrapping_sub(1)
    }

    /// Bytes below the break.
    pub fn size(&self) -> usize {
        self.brk
    }

    /// Bytes the break may grow to.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `ptr` points below the break.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;
        addr >= base && addr - base < self.brk
    }

    /// Convert an offset into a pointer into the arena.
    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.capacity);
        // SAFETY: in bounds of the buffer, which is non-null.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// Convert a pointer into the arena back into an offset.
    pub fn offset_of(&self, ptr: NonNull<u8>) -> usize {
        debug_assert!(self.contains(ptr), "{:p} is not within {:?}", ptr, self);
        (ptr.as_ptr() as usize).wrapping_sub(self.base.as_ptr() as usize)
    }

    #[inline]
    fn at<T>(&self, offset: usize) -> *mut T {
        let len = core::mem::size_of::<T>();
        assert!(
            offset <= self.capacity - len,
            "arena access at {:#x} out of bounds ({:#x})",
            offset,
            self.capacity
        );
        debug_assert!(offset % core::mem::align_of::<T>() == 0);
        debug_assert!(offset + len <= self.brk, "access at {:#x} beyond break {:#x}", offset, self.brk);

        // SAFETY: checked against the buffer's capacity above.
        unsafe { self.base.as_ptr().add(offset).cast() }
    }

    /// Read the 4-byte word at `offset`.
    #[inline]
    pub(crate) fn word(&self, offset: usize) -> u32 {
        // SAFETY: `at` bounds checks and the base alignment covers u32.
        unsafe { self.at::<u32>(offset).read() }
    }

    #[inline]
    pub(crate) fn set_word(&mut self, offset: usize, value: u32) {
        unsafe { self.at::<u32>(offset).write(value) }
    }

    /// Read the machine word at `offset`.
    #[inline]
    pub(crate) fn addr(&self, offset: usize) -> usize {
        unsafe { self.at::<usize>(offset).read() }
    }

    #[inline]
    pub(crate) fn set_addr(&mut self, offset: usize, value: usize) {
        unsafe { self.at::<usize>(offset).write(value) }
    }

    #[inline]
    pub(crate) fn u64(&self, offset: usize) -> u64 {
        unsafe { self.at::<u64>(offset).read() }
    }

    #[inline]
    pub(crate) fn set_u64(&mut self, offset: usize, value: u64) {
        unsafe { self.at::<u64>(offset).write(value) }
    }

    /// Copy `len` bytes from `src` to `dst`. The ranges may overlap.
    pub(crate) fn copy(&mut self, src: usize, dst: usize, len: usize) {
        assert!(src <= self.capacity && len <= self.capacity - src);
        assert!(dst <= self.capacity && len <= self.capacity - dst);

        // SAFETY: both ranges lie within the buffer.
        unsafe {
            let base = self.base.as_ptr();
            core::ptr::copy(base.add(src), base.add(dst), len);
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe { dealloc(self.base.as_ptr(), Self::layout(self.capacity)) }
    }
}
