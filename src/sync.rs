use crate::Malloc;

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

/// Mutex-locked allocator: the external lock that makes a [`Malloc`]
/// usable from several threads, as a [`GlobalAlloc`] or, with the
/// `allocator-api2` feature, through `&Locked` as an `Allocator`.
///
/// Layouts aligned beyond the inner allocator's
/// [`alignment`](Malloc::alignment) cannot be served and fail.
pub struct Locked<R: lock_api::RawMutex, M: Malloc>(pub lock_api::Mutex<R, M>);

impl<R: lock_api::RawMutex, M: Malloc> Locked<R, M> {
    pub const fn new(inner: M) -> Self {
        Self(lock_api::Mutex::new(inner))
    }

    /// Lock the mutex and access the inner allocator.
    pub fn lock(&self) -> lock_api::MutexGuard<'_, R, M> {
        self.0.lock()
    }

    pub fn into_inner(self) -> M {
        self.0.into_inner()
    }
}

unsafe impl<R: lock_api::RawMutex, M: Malloc> GlobalAlloc for Locked<R, M> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut inner = self.0.lock();

        if layout.align() > inner.alignment() {
            return ptr::null_mut();
        }

        inner.malloc(layout.size()).map_or(ptr::null_mut(), |nn| nn.as_ptr())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let mut inner = self.0.lock();

        if layout.align() > inner.alignment() {
            return ptr::null_mut();
        }

        inner.calloc(1, layout.size()).map_or(ptr::null_mut(), |nn| nn.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _: Layout) {
        self.0.lock().free(NonNull::new(ptr))
    }

    unsafe fn realloc(&self, ptr: *mut u8, _: Layout, new_size: usize) -> *mut u8 {
        self.0.lock().realloc(NonNull::new(ptr), new_size).map_or(ptr::null_mut(), |nn| nn.as_ptr())
    }
}

#[cfg(feature = "allocator-api2")]
mod allocator_api {
    use super::*;

    use allocator_api2::alloc::{AllocError, Allocator};

    fn dangling(layout: Layout) -> NonNull<[u8]> {
        // SAFETY: alignments are non-zero.
        let ptr = unsafe { NonNull::new_unchecked(layout.align() as *mut u8) };
        NonNull::slice_from_raw_parts(ptr, 0)
    }

    unsafe impl<R: lock_api::RawMutex, M: Malloc> Allocator for &Locked<R, M> {
        fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
            if layout.size() == 0 {
                return Ok(dangling(layout));
            }

            let mut inner = self.0.lock();
            if layout.align() > inner.alignment() {
                return Err(AllocError);
            }

            inner
                .malloc(layout.size())
                .map(|nn| NonNull::slice_from_raw_parts(nn, layout.size()))
                .ok_or(AllocError)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            if layout.size() != 0 {
                self.0.lock().free(Some(ptr));
            }
        }

        unsafe fn grow(
            &self,
            ptr: NonNull<u8>,
            old_layout: Layout,
            new_layout: Layout,
        ) -> Result<NonNull<[u8]>, AllocError> {
            debug_assert!(new_layout.size() >= old_layout.size());

            if old_layout.size() == 0 {
                return self.allocate(new_layout);
            }

            let mut inner = self.0.lock();
            if new_layout.align() > inner.alignment() {
                return Err(AllocError);
            }

            inner
                .realloc(Some(ptr), new_layout.size())
                .map(|nn| NonNull::slice_from_raw_parts(nn, new_layout.size()))
                .ok_or(AllocError)
        }

        unsafe fn shrink(
            &self,
            ptr: NonNull<u8>,
            old_layout: Layout,
            new_layout: Layout,
        ) -> Result<NonNull<[u8]>, AllocError> {
            debug_assert!(new_layout.size() <= old_layout.size());

            if new_layout.size() == 0 {
                self.deallocate(ptr, old_layout);
                return Ok(dangling(new_layout));
            }

            let mut inner = self.0.lock();
            if new_layout.align() > inner.alignment() {
                return Err(AllocError);
            }

            inner
                .realloc(Some(ptr), new_layout.size())
                .map(|nn| NonNull::slice_from_raw_parts(nn, new_layout.size()))
                .ok_or(AllocError)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arena, Explicit, Implicit, Segregated};

    type SpinLocked<M> = Locked<spin::Mutex<()>, M>;

    fn segregated() -> SpinLocked<Segregated> {
        let mut heap = Segregated::new(Arena::new(1 << 22));
        heap.init().unwrap();
        Locked::new(heap)
    }

    #[test]
    fn global_alloc_round_trip() {
        let locked = segregated();

        unsafe {
            let layout = Layout::from_size_align(100, 16).unwrap();
            let ptr = locked.alloc(layout);
            assert!(!ptr.is_null());
            ptr.write_bytes(0xab, 100);

            let ptr = locked.realloc(ptr, layout, 3000);
            assert!(!ptr.is_null());
            assert!((0..100).all(|i| ptr.add(i).read() == 0xab));
            locked.dealloc(ptr, Layout::from_size_align(3000, 16).unwrap());

            let zeroed = locked.alloc_zeroed(Layout::from_size_align(64, 8).unwrap());
            assert!((0..64).all(|i| zeroed.add(i).read() == 0));
            locked.dealloc(zeroed, Layout::from_size_align(64, 8).unwrap());

            assert!(locked.alloc(Layout::from_size_align(64, 32).unwrap()).is_null());
        }

        assert!(locked.lock().check_heap(false).is_clean());
    }

    #[test]
    fn implicit_alignment_limit() {
        let mut heap = Implicit::new(Arena::new(1 << 16));
        heap.init().unwrap();
        let locked: SpinLocked<_> = Locked::new(heap);

        unsafe {
            assert!(locked.alloc(Layout::from_size_align(8, 16).unwrap()).is_null());
            let ptr = locked.alloc(Layout::new::<u64>());
            assert!(!ptr.is_null());
            locked.dealloc(ptr, Layout::new::<u64>());
        }

        assert!(locked.into_inner().check_heap(false).is_clean());
    }

    #[cfg(feature = "allocator-api2")]
    #[test]
    fn allocator_api_collections() {
        let locked = segregated();

        let mut vec = allocator_api2::vec::Vec::new_in(&locked);
        for i in 0..10_000u32 {
            vec.push(i);
        }
        assert!(vec.iter().copied().eq(0..10_000));

        vec.truncate(10);
        vec.shrink_to_fit();
        assert_eq!(vec.as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let boxed = allocator_api2::boxed::Box::new_in([7u8; 300], &locked);
        assert!(boxed.iter().all(|&b| b == 7));

        drop(vec);
        drop(boxed);
        assert!(locked.lock().check_heap(false).is_clean());
    }

    #[test]
    fn shared_between_threads() {
        let mut heap = Explicit::new(Arena::new(1 << 22));
        heap.init().unwrap();
        let locked: SpinLocked<_> = Locked::new(heap);

        std::thread::scope(|scope| {
            for t in 0..4u8 {
                let locked = &locked;
                scope.spawn(move || {
                    let mut ptrs = Vec::new();
                    for i in 0..200usize {
                        let layout = Layout::from_size_align(16 + i * 4, 8).unwrap();
                        let ptr = unsafe { locked.alloc(layout) };
                        assert!(!ptr.is_null());
                        unsafe { ptr.write_bytes(t, layout.size()) };
                        ptrs.push((ptr, layout));
                    }
                    for (ptr, layout) in ptrs {
                        assert!((0..layout.size()).all(|i| unsafe { ptr.add(i).read() } == t));
                        unsafe { locked.dealloc(ptr, layout) };
                    }
                });
            }
        });

        let report = locked.lock().check_heap(false);
        assert!(report.is_clean());
        assert_eq!(report.free_block_count(), 1);
    }
}
