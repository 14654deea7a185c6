//! Implicit free-list allocator: no index at all, every search walks the
//! heap block by block. Every block carries both a header and a footer, so
//! either neighbor can be found from any block; the prev-allocated bit is
//! unused.

use core::ptr::NonNull;

use crate::{
    arena::{Arena, MAX_CAPACITY},
    block::{header_offset, DOUBLE_TAG_SIZE, REGION_OVERHEAD, TAG_SIZE},
    check::{self, Report, Violation, IMPLICIT_RULES},
    tag::BlockTag,
    utils::checked_align_up,
    Malloc, OutOfMemory, CHUNK_SIZE, IMPLICIT_ALIGNMENT, IMPLICIT_MIN_BLOCK_SIZE,
};

#[cfg(feature = "counters")]
use crate::Counters;

/// Block size serving a `size`-byte request: the payload aligned,
/// plus header and footer.
#[inline]
fn required_block_size(size: usize) -> Option<usize> {
    let block_size = checked_align_up(size, IMPLICIT_ALIGNMENT)?
        .checked_add(DOUBLE_TAG_SIZE)?
        .max(IMPLICIT_MIN_BLOCK_SIZE);
    (block_size <= MAX_CAPACITY).then_some(block_size)
}

#[inline]
const fn usable_size(block_size: usize) -> usize {
    block_size - DOUBLE_TAG_SIZE
}

/// First-fit allocator over an implicit list of blocks.
/// Payloads are aligned to [`IMPLICIT_ALIGNMENT`].
#[derive(Debug)]
pub struct Implicit {
    arena: Arena,
    heap_start: Option<usize>,

    #[cfg(feature = "counters")]
    pub(crate) counters: Counters,
}

impl Implicit {
    /// Create an allocator over `arena`. Call [`init`](Malloc::init) before use.
    pub fn new(arena: Arena) -> Self {
        Self {
            arena,
            heap_start: None,
            #[cfg(feature = "counters")]
            counters: Counters::new(),
        }
    }

    fn extend_heap(&mut self, size: usize) -> Result<usize, OutOfMemory> {
        let bp = self.arena.extend_by(size)?;
        #[cfg(feature = "counters")]
        self.counters.account_extend(size);

        self.arena.set_boundary(bp, BlockTag::pack(size, false, false));
        self.arena.set_tag(bp + size - TAG_SIZE, BlockTag::EPILOGUE);

        Ok(self.coalesce(bp))
    }

    /// Merge the free block at `bp` with free neighbors, returning the merged block.
    fn coalesce(&mut self, bp: usize) -> usize {
        let size = self.arena.header_of(bp).size();
        let prev_free = !self.arena.tag(bp - DOUBLE_TAG_SIZE).is_allocated();
        let next_tag = self.arena.header_of(self.arena.next_block(bp));

        let mut base = bp;
        let mut merged = size;

        if !next_tag.is_allocated() {
            merged += next_tag.size();
        }
        if prev_free {
            base = self.arena.prev_block(bp);
            merged += self.arena.header_of(base).size();
        }

        if merged != size {
            self.arena.set_boundary(base, BlockTag::pack(merged, false, false));
        }
        base
    }

    fn find_fit(&self, block_size: usize) -> Option<usize> {
        let mut bp = self.heap_start?;

        loop {
            let tag = self.arena.header_of(bp);
            if tag.size() == 0 {
                return None;
            }
            if !tag.is_allocated() && tag.size() >= block_size {
                return Some(bp);
            }
            bp = self.arena.next_block(bp);
        }
    }

    /// Mark the block at `bp` allocated with `block_size` bytes,
    /// freeing the tail if it can stand alone. `bp` may be free or allocated.
    fn place(&mut self, bp: usize, block_size: usize) {
        let total = self.arena.header_of(bp).size();
        debug_assert!(total >= block_size);

        if total - block_size >= IMPLICIT_MIN_BLOCK_SIZE {
            self.arena.set_boundary(bp, BlockTag::pack(block_size, false, true));

            let rest = bp + block_size;
            self.arena.set_boundary(rest, BlockTag::pack(total - block_size, false, false));
            self.coalesce(rest);
        } else {
            self.arena.set_boundary(bp, BlockTag::pack(total, false, true));
        }
    }
}

impl Malloc for Implicit {
    fn init(&mut self) -> Result<(), OutOfMemory> {
        self.arena.reset();
        self.heap_start = None;
        #[cfg(feature = "counters")]
        {
            self.counters = Counters::new();
        }

        let base = self.arena.extend_by(REGION_OVERHEAD)?;
        let first = self.arena.format_prologue(base);
        self.arena.set_tag(header_offset(first), BlockTag::EPILOGUE);
        self.heap_start = Some(first);
        #[cfg(feature = "counters")]
        self.counters.account_extend(REGION_OVERHEAD);

        self.extend_heap(CHUNK_SIZE)?;

        log::debug!("implicit: initialized over {:?}", self.arena);
        Ok(())
    }

    fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || self.heap_start.is_none() {
            return None;
        }

        let block_size = required_block_size(size)?;

        let bp = match self.find_fit(block_size) {
            Some(bp) => bp,
            None => self.extend_heap(block_size.max(CHUNK_SIZE)).ok()?,
        };

        self.place(bp, block_size);
        log::trace!("implicit: malloc({}) -> {:#x}", size, bp);

        #[cfg(feature = "counters")]
        self.counters.account_alloc(usable_size(self.arena.header_of(bp).size()));

        Some(self.arena.ptr_at(bp))
    }

    unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };

        let bp = self.arena.offset_of(ptr);
        let tag = self.arena.header_of(bp);
        debug_assert!(tag.is_allocated(), "double free of {:#x}", bp);
        log::trace!("implicit: free({:#x})", bp);

        #[cfg(feature = "counters")]
        self.counters.account_dealloc(usable_size(tag.size()));

        self.arena.set_boundary(bp, BlockTag::pack(tag.size(), false, false));
        self.coalesce(bp);
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

        if block_size <= old_size {
            self.place(bp, block_size);
        } else {
            let next_tag = self.arena.header_of(bp + old_size);
            let combined = old_size + next_tag.size();

            if next_tag.is_allocated() || combined < block_size {
                let new = self.malloc(size)?;
                let new_bp = self.arena.offset_of(new);
                self.arena.copy(bp, new_bp, usable_size(old_size).min(size));
                self.free(ptr);

                log::trace!("implicit: realloc({:#x}, {}) moved to {:#x}", bp, size, new_bp);
                return Some(new);
            }

            self.arena.set_boundary(bp, BlockTag::pack(combined, false, true));
            self.place(bp, block_size);
        }

        log::trace!("implicit: realloc({:#x}, {}) in place", bp, size);
        #[cfg(feature = "counters")]
        self.counters.account_resize_in_place(
            usable_size(old_size),
            usable_size(self.arena.header_of(bp).size()),
        );

        ptr
    }

    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        usable_size(self.arena.header_of(self.arena.offset_of(ptr)).size())
    }

    fn alignment(&self) -> usize {
        IMPLICIT_ALIGNMENT
    }

    fn check_heap(&self, verbose: bool) -> Report {
        let mut report = Report::default();
        let Some(first) = self.heap_start else { return report };

        let end = check::walk_region(&self.arena, first - REGION_OVERHEAD, &IMPLICIT_RULES, &mut report, verbose);
        if end != self.arena.size() {
            report.push(Violation::BadEpilogue { offset: header_offset(end) });
        }

        report
    }

    fn arena(&self) -> &Arena {
        &self.arena
    }
}
