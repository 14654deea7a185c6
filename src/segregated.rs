//! Segregated allocator: fixed-size slabs for small requests, an explicit
//! free list for everything larger.
//!
//! The arena is a sequence of regions, each starting on a chunk boundary:
//! - slabs, exactly one chunk each, chained per size class;
//! - big-object regions, whole chunks holding a prologue, one or more
//!   variable-sized blocks and an epilogue. Blocks never cross regions.
//!
//! A pointer is recognized as a slab slot by finding the slab whose chunk
//! contains it; anything else belongs to the big-object list.

use alloc::vec::Vec;
use core::{marker::PhantomData, ptr::NonNull};

use crate::{
    arena::Arena,
    bitfield::{BitField, Occupancy},
    block::{REGION_OVERHEAD, TAG_SIZE},
    check::{self, Report, Violation, EXPLICIT_RULES},
    classes::{self, DefaultClasses, SizeClasses, MAX_SIZE_CLASSES},
    list::{required_block_size, usable_size, BlockList},
    slab::{capacity_of, Slab, SLAB_SIZE},
    tag::BlockTag,
    utils::{align_up, is_aligned},
    Malloc, OutOfMemory, ALIGNMENT, CHUNK_SIZE,
};

#[cfg(feature = "counters")]
use crate::Counters;

/// Slab allocator with a big-object fallback, parameterized by its size-class ladder.
///
/// Initialize with [`new`](Segregated::new) (default ladder) or
/// [`with_classes`](Segregated::with_classes), then [`init`](Malloc::init).
#[derive(Debug)]
pub struct Segregated<C: SizeClasses = DefaultClasses> {
    arena: Arena,
    /// Chain heads, indexed like `C::CLASSES`.
    slabs: [Option<Slab>; MAX_SIZE_CLASSES],
    big: BlockList,
    initialized: bool,

    #[cfg(feature = "counters")]
    pub(crate) counters: Counters,

    _classes: PhantomData<C>,
}

impl Segregated {
    /// Create an allocator with the [`DefaultClasses`] ladder over `arena`.
    pub fn new(arena: Arena) -> Self {
        Self::with_classes(arena)
    }
}

impl<C: SizeClasses> Segregated<C> {
    /// Create an allocator with the ladder `C` over `arena`.
    ///
    /// # Panics
    /// Panics if `C::CLASSES` is not a valid ladder; see [`SizeClasses`].
    pub fn with_classes(arena: Arena) -> Self {
        if let Err(msg) = classes::validate(C::CLASSES) {
            panic!("invalid size-class ladder {:?}: {}", C::CLASSES, msg);
        }

        Self {
            arena,
            slabs: [None; MAX_SIZE_CLASSES],
            big: BlockList::new(),
            initialized: false,
            #[cfg(feature = "counters")]
            counters: Counters::new(),
            _classes: PhantomData,
        }
    }

    /// The slab whose chunk contains `offset`, if any.
    fn slab_of(&self, offset: usize) -> Option<Slab> {
        self.slabs[..C::CLASSES.len()]
            .iter()
            .flat_map(|&head| Slab::chain(&self.arena, head))
            .find(|slab| slab.contains(offset))
    }

    fn slab_malloc(&mut self, index: usize) -> Option<usize> {
        let mut cursor = self.slabs[index];
        while let Some(slab) = cursor {
            if let Some(slot) = slab.claim(&mut self.arena) {
                return Some(slot);
            }
            cursor = slab.next(&self.arena);
        }

        let class = C::CLASSES[index];
        let min_admitted = classes::min_admitted(C::CLASSES, index);
        let slab = Slab::create(&mut self.arena, class, min_admitted, self.slabs[index]).ok()?;
        self.slabs[index] = Some(slab);

        #[cfg(feature = "counters")]
        {
            self.counters.account_extend(SLAB_SIZE);
            self.counters.account_slab();
        }

        slab.claim(&mut self.arena)
    }

    /// Claim a fresh big-object region able to hold a `block_size` block,
    /// returning its single free block.
    fn add_region(&mut self, block_size: usize) -> Result<usize, OutOfMemory> {
        let region_size = align_up(block_size + REGION_OVERHEAD, CHUNK_SIZE);

        let base = self.arena.extend_by(region_size)?;
        debug_assert!(is_aligned(base, CHUNK_SIZE));
        #[cfg(feature = "counters")]
        self.counters.account_extend(region_size);

        let bp = self.arena.format_prologue(base);
        let size = region_size - REGION_OVERHEAD;
        self.arena.set_boundary(bp, BlockTag::pack(size, true, false));
        self.arena.set_tag(bp + size - TAG_SIZE, BlockTag::EPILOGUE);

        log::debug!("segregated: big-object region {:#x}+{:#x}", base, region_size);
        Ok(self.big.adopt(&mut self.arena, bp))
    }

    fn big_malloc(&mut self, size: usize) -> Option<usize> {
        let block_size = required_block_size(size)?;

        let bp = match self.big.find_fit(&self.arena, block_size) {
            Some(bp) => bp,
            None => {
                self.add_region(block_size).ok()?;
                self.big.find_fit(&self.arena, block_size)?
            }
        };

        self.big.place(&mut self.arena, bp, block_size);
        Some(bp)
    }

    /// Payload bytes available at `offset`, a live allocation.
    fn usable_size_at(&self, offset: usize) -> usize {
        match self.slab_of(offset) {
            Some(slab) => slab.class(&self.arena),
            None => usable_size(self.arena.header_of(offset).size()),
        }
    }

    fn check_slabs(&self, report: &mut Report, verbose: bool) -> Vec<usize> {
        let mut bases = Vec::new();

        for (index, &class) in C::CLASSES.iter().enumerate() {
            let min_admitted = classes::min_admitted(C::CLASSES, index);

            for slab in Slab::chain(&self.arena, self.slabs[index]) {
                report.count_slab();
                bases.push(slab.0);

                if !is_aligned(slab.0, SLAB_SIZE) {
                    report.push(Violation::MisalignedSlab { offset: slab.0 });
                }
                if slab.class(&self.arena) != class {
                    report.push(Violation::SlabClassMismatch {
                        offset: slab.0,
                        recorded: slab.class(&self.arena),
                        expected: class,
                    });
                }
                if slab.min_admitted(&self.arena) != min_admitted {
                    report.push(Violation::SlabMinimumMismatch {
                        offset: slab.0,
                        recorded: slab.min_admitted(&self.arena),
                        expected: min_admitted,
                    });
                }

                let occupancy = slab.occupancy(&self.arena);
                let capacity = capacity_of(class) as u32;
                let stray = occupancy.bit_scan_after(capacity);
                if stray < Occupancy::BITS {
                    report.push(Violation::SlabBitBeyondCapacity { offset: slab.0, bit: stray });
                }

                if verbose {
                    log::info!(
                        target: "segalloc::dump",
                        "slab {:#x}: {}-byte slots, {}/{} used, {:x?}",
                        slab.0, class, occupancy.count_ones(), capacity, occupancy
                    );
                }
            }
        }

        bases
    }
}

impl<C: SizeClasses> Malloc for Segregated<C> {
    fn init(&mut self) -> Result<(), OutOfMemory> {
        self.arena.reset();
        self.slabs = [None; MAX_SIZE_CLASSES];
        self.big.clear();
        #[cfg(feature = "counters")]
        {
            self.counters = Counters::new();
        }

        self.initialized = true;
        log::debug!("segregated: initialized over {:?} with classes {:?}", self.arena, C::CLASSES);
        Ok(())
    }

    fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || !self.initialized {
            return None;
        }

        let offset = match C::class_of(size) {
            Some(index) => self.slab_malloc(index)?,
            None => self.big_malloc(size)?,
        };
        log::trace!("segregated: malloc({}) -> {:#x}", size, offset);

        #[cfg(feature = "counters")]
        self.counters.account_alloc(self.usable_size_at(offset));

        Some(self.arena.ptr_at(offset))
    }

    unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };

        let offset = self.arena.offset_of(ptr);
        log::trace!("segregated: free({:#x})", offset);

        #[cfg(feature = "counters")]
        self.counters.account_dealloc(self.usable_size_at(offset));

        match self.slab_of(offset) {
            Some(slab) => {
                let index = slab.slot_index(&self.arena, offset);
                slab.release(&mut self.arena, index);
            }
            None => {
                self.big.release(&mut self.arena, offset);
            }
        }
    }

    unsafe fn realloc(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(old) = ptr else { return self.malloc(size) };

        if size == 0 {
            self.free(ptr);
            return ptr;
        }

        let offset = self.arena.offset_of(old);

        let (in_place, copy_len) = match self.slab_of(offset) {
            Some(slab) => {
                let class = slab.class(&self.arena);
                (size <= class, class)
            }
            None => {
                let block_size = required_block_size(size)?;
                let old_size = self.arena.header_of(offset).size();
                let in_place = self.big.resize_in_place(&mut self.arena, offset, block_size);

                #[cfg(feature = "counters")]
                {
                    if in_place {
                        let new_size = self.arena.header_of(offset).size();
                        self.counters.account_resize_in_place(usable_size(old_size), usable_size(new_size));
                    }
                }

                (in_place, usable_size(old_size))
            }
        };

        if in_place {
            log::trace!("segregated: realloc({:#x}, {}) in place", offset, size);
            return ptr;
        }

        let new = self.malloc(size)?;
        let new_offset = self.arena.offset_of(new);
        self.arena.copy(offset, new_offset, copy_len.min(size));
        self.free(ptr);

        log::trace!("segregated: realloc({:#x}, {}) moved to {:#x}", offset, size, new_offset);
        Some(new)
    }

    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.usable_size_at(self.arena.offset_of(ptr))
    }

    fn alignment(&self) -> usize {
        ALIGNMENT
    }

    fn check_heap(&self, verbose: bool) -> Report {
        let mut report = Report::default();
        if !self.initialized {
            return report;
        }

        let slabs = self.check_slabs(&mut report, verbose);

        let mut offset = 0;
        while offset < self.arena.size() {
            if slabs.contains(&offset) {
                offset += SLAB_SIZE;
                continue;
            }

            let end = check::walk_region(&self.arena, offset, &EXPLICIT_RULES, &mut report, verbose);
            if end < self.arena.size() && !is_aligned(end, CHUNK_SIZE) {
                report.push(Violation::BadEpilogue { offset: end - TAG_SIZE });
                break;
            }
            offset = end;
        }

        check::walk_free_list(&self.arena, self.big.free_list(), &mut report, verbose);
        report
    }

    fn arena(&self) -> &Arena {
        &self.arena
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_utils::*, SLAB_HEADER_SIZE};

    fn heap() -> Segregated {
        let mut heap = Segregated::new(Arena::new(1 << 22));
        heap.init().unwrap();
        heap
    }

    #[test]
    fn init_claims_nothing() {
        let heap = heap();
        assert_eq!(heap.arena().size(), 0);
        assert!(heap.check_heap(true).is_clean());
    }

    #[test]
    fn small_requests_use_slabs() {
        let mut heap = heap();

        for size in [1, 16, 17, 48, 64, 65, 128] {
            let ptr = heap.malloc(size).unwrap();
            assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);

            let offset = heap.arena().offset_of(ptr);
            let slab = heap.slab_of(offset).unwrap();
            assert_eq!(Some(slab.class(&heap.arena)), DefaultClasses::class_of(size).map(|i| DefaultClasses::CLASSES[i]));
            assert!(unsafe { heap.usable_size(ptr) } >= size);
        }

        let report = heap.check_heap(false);
        assert!(report.is_clean());
        assert_eq!(report.slab_count(), 5);
    }

    #[test]
    fn exact_size_reuse() {
        let mut heap = heap();
        let a = heap.malloc(24).unwrap();
        let _b = heap.malloc(24).unwrap();

        unsafe { heap.free(Some(a)) };
        assert_eq!(heap.malloc(24), Some(a));
    }

    #[test]
    fn many_small_objects_span_slabs() {
        let mut heap = heap();

        let ptrs: Vec<_> = (0..578).map(|_| heap.malloc(16).unwrap()).collect();
        let report = heap.check_heap(false);
        assert!(report.is_clean());
        assert!(report.slab_count() >= 2);
        assert_eq!(report.slab_count(), (578 + capacity_of(16) - 1) / capacity_of(16));

        let mut offsets: Vec<usize> = ptrs.iter().map(|&p| heap.arena().offset_of(p)).collect();
        offsets.sort_unstable();
        offsets.dedup();
        assert_eq!(offsets.len(), 578);

        // the first slab fills in slot order
        assert_eq!(offsets[0], SLAB_HEADER_SIZE);
        assert_eq!(offsets[1], SLAB_HEADER_SIZE + 16);

        for ptr in ptrs {
            unsafe { heap.free(Some(ptr)) };
        }

        let occupied: u32 =
            Slab::chain(&heap.arena, heap.slabs[0]).map(|slab| slab.occupancy(&heap.arena).count_ones()).sum();
        assert_eq!(occupied, 0);
        assert!(heap.check_heap(false).is_clean());

        // slabs are kept and reused
        let size = heap.arena().size();
        heap.malloc(16).unwrap();
        assert_eq!(heap.arena().size(), size);
    }

    #[test]
    fn big_objects_use_the_free_list() {
        let mut heap = heap();

        let a = heap.malloc(200).unwrap();
        assert!(heap.slab_of(heap.arena().offset_of(a)).is_none());
        assert_eq!(heap.arena().size(), CHUNK_SIZE);

        let b = heap.malloc(5000).unwrap();
        assert_eq!(heap.arena().size(), CHUNK_SIZE + align_up(5008 + REGION_OVERHEAD, CHUNK_SIZE));
        assert_eq!(b.as_ptr() as usize % ALIGNMENT, 0);

        let c = heap.malloc(300).unwrap();
        let report = heap.check_heap(true);
        assert!(report.is_clean(), "{:?}", report.violations());

        unsafe {
            heap.free(Some(a));
            heap.free(Some(c));
            heap.free(Some(b));
        }

        let report = heap.check_heap(false);
        assert!(report.is_clean(), "{:?}", report.violations());
        // one free block per region, never merged across regions
        assert_eq!(report.free_block_count(), 2);
    }

    #[test]
    fn split_and_merge_in_big_region() {
        let mut heap = heap();
        let a = heap.malloc(1000).unwrap();
        let b = heap.malloc(1000).unwrap();
        let c = heap.malloc(1000).unwrap();

        unsafe {
            heap.free(Some(a));
            heap.free(Some(b));
        }
        assert_eq!(heap.malloc(2000), Some(a));

        unsafe {
            heap.free(Some(a));
            heap.free(Some(c));
        }
        let report = heap.check_heap(false);
        assert!(report.is_clean());
        assert_eq!(report.free_block_count(), 1);
    }

    #[test]
    fn mixed_regions_walk_cleanly() {
        let mut heap = heap();
        let mut ptrs = Vec::new();

        for round in 0..20 {
            ptrs.push(heap.malloc(16 + round * 8).unwrap());
            ptrs.push(heap.malloc(3000 + round * 500).unwrap());
        }
        assert!(heap.check_heap(false).is_clean());

        for ptr in ptrs.into_iter().step_by(3) {
            unsafe { heap.free(Some(ptr)) };
        }
        assert!(heap.check_heap(false).is_clean());
    }

    #[test]
    fn slab_realloc() {
        let mut heap = heap();
        let a = heap.malloc(20).unwrap();
        scribble(a, 20, 7);

        // still fits the 32-byte class
        assert_eq!(unsafe { heap.realloc(Some(a), 32) }, Some(a));
        assert_eq!(unsafe { heap.realloc(Some(a), 4) }, Some(a));

        // moves to the 64-byte class, old slot is released
        let b = unsafe { heap.realloc(Some(a), 60) }.unwrap();
        assert_ne!(a, b);
        assert!(verify(b, 20, 7));
        assert_eq!(heap.malloc(32), Some(a));

        // moves into the big-object region
        let c = unsafe { heap.realloc(Some(b), 1000) }.unwrap();
        assert!(verify(c, 20, 7));
        assert!(heap.slab_of(heap.arena().offset_of(c)).is_none());
        assert!(heap.check_heap(false).is_clean());
    }

    #[test]
    fn big_realloc() {
        let mut heap = heap();
        let a = heap.malloc(500).unwrap();
        scribble(a, 500, 11);

        assert_eq!(unsafe { heap.realloc(Some(a), 2000) }, Some(a));
        assert!(verify(a, 500, 11));
        assert_eq!(unsafe { heap.realloc(Some(a), 200) }, Some(a));
        assert!(verify(a, 200, 11));

        let _blocker = heap.malloc(3000).unwrap();
        let b = unsafe { heap.realloc(Some(a), 3500) }.unwrap();
        assert_ne!(a, b);
        assert!(verify(b, 200, 11));

        assert!(unsafe { heap.realloc(Some(b), 8 << 20) }.is_none());
        assert!(verify(b, 200, 11));
        assert!(heap.check_heap(false).is_clean());
    }

    #[test]
    fn out_of_memory_is_none() {
        let mut heap = Segregated::new(Arena::new(2 * CHUNK_SIZE));
        heap.init().unwrap();

        let slots: Vec<_> = core::iter::from_fn(|| heap.malloc(128)).take(1000).collect();
        assert_eq!(slots.len(), 2 * capacity_of(128));
        assert!(heap.malloc(1000).is_none());
        assert!(heap.calloc(2, 8).is_none());
        assert!(heap.check_heap(false).is_clean());
    }

    #[test]
    fn calloc_zeroes_reused_slots() {
        let mut heap = heap();
        let a = heap.malloc(48).unwrap();
        scribble(a, 48, 0xff);
        unsafe { heap.free(Some(a)) };

        let b = heap.calloc(3, 16).unwrap();
        assert_eq!(a, b);
        assert!((0..48).all(|i| unsafe { b.as_ptr().add(i).read() } == 0));
    }

    #[test]
    fn check_detects_slab_corruption() {
        let mut heap = heap();
        heap.malloc(8).unwrap();
        assert!(heap.check_heap(false).is_clean());

        let slab = heap.slabs[0].unwrap();
        assert_eq!(slab, Slab(0));

        // the last occupancy word holds bits 192..256; class 16 has 253 slots
        let last_word = heap.arena().ptr_at(slab.0 + 8 + 24);
        unsafe { last_word.as_ptr().cast::<u64>().write(1 << 63) };
        assert_eq!(
            heap.check_heap(false).violations(),
            &[Violation::SlabBitBeyondCapacity { offset: 0, bit: 255 }]
        );

        unsafe { last_word.as_ptr().cast::<u64>().write(0) };
        let class = heap.arena().ptr_at(slab.0 + 40);
        unsafe { class.as_ptr().cast::<u32>().write(32) };
        assert_eq!(
            heap.check_heap(false).violations(),
            &[Violation::SlabClassMismatch { offset: 0, recorded: 32, expected: 16 }]
        );
    }

    struct WideClasses;

    impl SizeClasses for WideClasses {
        const CLASSES: &'static [usize] = &[64, 512, 2048];
    }

    #[test]
    fn custom_ladder() {
        let mut heap = Segregated::<WideClasses>::with_classes(Arena::new(1 << 20));
        heap.init().unwrap();

        let a = heap.malloc(1).unwrap();
        let b = heap.malloc(1500).unwrap();
        let c = heap.malloc(2049).unwrap();

        assert_eq!(unsafe { heap.usable_size(a) }, 64);
        assert_eq!(unsafe { heap.usable_size(b) }, 2048);
        assert!(heap.slab_of(heap.arena().offset_of(c)).is_none());
        assert!(heap.check_heap(false).is_clean());
    }

    struct BrokenClasses;

    impl SizeClasses for BrokenClasses {
        const CLASSES: &'static [usize] = &[24, 16];
    }

    #[test]
    #[should_panic]
    fn invalid_ladder_panics() {
        Segregated::<BrokenClasses>::with_classes(Arena::new(CHUNK_SIZE));
    }

    #[test]
    fn random_actions() {
        let mut heap = Segregated::new(Arena::new(8 << 20));
        heap.init().unwrap();
        crate::test_utils::random_actions(&mut heap, 0x1234_5678, 6000, 600);

        heap.init().unwrap();
        crate::test_utils::random_actions(&mut heap, 42, 3000, 6000);
    }
}
