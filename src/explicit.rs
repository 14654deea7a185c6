//! Explicit free-list allocator over one contiguous heap.
//!
//! ```text
//! | pad | prologue hdr | prologue ftr | block | block | ... | epilogue |
//! 0     4              8              16                     brk - 4
//! ```
//!
//! Each extension turns the old epilogue into the header of the new free
//! block and writes a fresh epilogue at the new break, so free space at the
//! top of the heap merges with the extension.

use core::ptr::NonNull;

use crate::{
    arena::Arena,
    block::{header_offset, REGION_OVERHEAD, TAG_SIZE},
    check::{self, Report, Violation, EXPLICIT_RULES},
    list::{required_block_size, usable_size, BlockList},
    tag::BlockTag,
    Malloc, OutOfMemory, ALIGNMENT, CHUNK_SIZE,
};

#[cfg(feature = "counters")]
use crate::Counters;

/// First-fit allocator with a LIFO doubly linked free list and
/// boundary-tag coalescing. Payloads are aligned to [`ALIGNMENT`].
#[derive(Debug)]
pub struct Explicit {
    arena: Arena,
    blocks: BlockList,
    /// Payload offset of the first block after the prologue, once initialized.
    heap_start: Option<usize>,

    #[cfg(feature = "counters")]
    pub(crate) counters: Counters,
}

impl Explicit {
    /// Create an allocator over `arena`. Call [`init`](Malloc::init) before use.
    pub fn new(arena: Arena) -> Self {
        Self {
            arena,
            blocks: BlockList::new(),
            heap_start: None,
            #[cfg(feature = "counters")]
            counters: Counters::new(),
        }
    }

    /// Grow the heap by `size` bytes and return the (coalesced) free block covering them.
    fn extend_heap(&mut self, size: usize) -> Result<usize, OutOfMemory> {
        debug_assert!(size % ALIGNMENT == 0);

        let bp = self.arena.extend_by(size)?;
        #[cfg(feature = "counters")]
        self.counters.account_extend(size);

        // the old epilogue becomes this block's header and knows its left neighbor
        let prev_allocated = self.arena.header_of(bp).is_prev_allocated();
        self.arena.set_boundary(bp, BlockTag::pack(size, prev_allocated, false));
        self.arena.set_tag(bp + size - TAG_SIZE, BlockTag::EPILOGUE);

        Ok(self.blocks.adopt(&mut self.arena, bp))
    }
}

impl Malloc for Explicit {
    fn init(&mut self) -> Result<(), OutOfMemory> {
        self.arena.reset();
        self.blocks.clear();
        self.heap_start = None;
        #[cfg(feature = "counters")]
        {
            self.counters = Counters::new();
        }

        let base = self.arena.extend_by(REGION_OVERHEAD)?;
        let first = self.arena.format_prologue(base);
        self.arena.set_tag(header_offset(first), BlockTag::EPILOGUE.with_prev_allocated(true));
        self.heap_start = Some(first);
        #[cfg(feature = "counters")]
        self.counters.account_extend(REGION_OVERHEAD);

        self.extend_heap(CHUNK_SIZE)?;

        log::debug!("explicit: initialized over {:?}", self.arena);
        Ok(())
    }

    fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || self.heap_start.is_none() {
            return None;
        }

        let block_size = required_block_size(size)?;

        let bp = match self.blocks.find_fit(&self.arena, block_size) {
            Some(bp) => bp,
            None => {
                self.extend_heap(block_size.max(CHUNK_SIZE)).ok()?;
                self.blocks.find_fit(&self.arena, block_size)?
            }
        };

        self.blocks.place(&mut self.arena, bp, block_size);
        log::trace!("explicit: malloc({}) -> {:#x}", size, bp);

        #[cfg(feature = "counters")]
        self.counters.account_alloc(usable_size(self.arena.header_of(bp).size()));

        Some(self.arena.ptr_at(bp))
    }

    unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };

        let bp = self.arena.offset_of(ptr);
        log::trace!("explicit: free({:#x})", bp);

        #[cfg(feature = "counters")]
        self.counters.account_dealloc(usable_size(self.arena.header_of(bp).size()));

        self.blocks.release(&mut self.arena, bp);
    }

    unsafe fn realloc(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(old) = ptr else { return self.malloc(size) };

        if size == 0 {
            self.free(ptr);
            return ptr;
        }

        let bp = self.arena.offset_of(old);
        let block_size = required_block_size(size)?;
        let old_size = self.arena.header_of(bp).size();

        if self.blocks.resize_in_place(&mut self.arena, bp, block_size) {
            log::trace!("explicit: realloc({:#x}, {}) in place", bp, size);

            #[cfg(feature = "counters")]
            self.counters.account_resize_in_place(
                usable_size(old_size),
                usable_size(self.arena.header_of(bp).size()),
            );

            return ptr;
        }

        let new = self.malloc(size)?;
        let new_bp = self.arena.offset_of(new);
        self.arena.copy(bp, new_bp, usable_size(old_size).min(size));
        self.free(ptr);

        log::trace!("explicit: realloc({:#x}, {}) moved to {:#x}", bp, size, new_bp);
        Some(new)
    }

    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        usable_size(self.arena.header_of(self.arena.offset_of(ptr)).size())
    }

    fn alignment(&self) -> usize {
        ALIGNMENT
    }

    fn check_heap(&self, verbose: bool) -> Report {
        let mut report = Report::default();
        let Some(first) = self.heap_start else { return report };

        let end = check::walk_region(&self.arena, first - REGION_OVERHEAD, &EXPLICIT_RULES, &mut report, verbose);
        if end != self.arena.size() {
            report.push(Violation::BadEpilogue { offset: header_offset(end) });
        }

        check::walk_free_list(&self.arena, self.blocks.free_list(), &mut report, verbose);
        report
    }

    fn arena(&self) -> &Arena {
        &self.arena
    }
}
