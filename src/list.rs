//! Explicit free-list engine, shared by [`Explicit`](crate::Explicit) and
//! the big-object region of [`Segregated`](crate::Segregated).
//!
//! Free blocks carry a header, a footer mirroring it, and the two list
//! links at the start of their payload. Allocated blocks carry only a
//! header; the block after them learns they are allocated from its own
//! prev-allocated bit.

use crate::{
    arena::{Arena, MAX_CAPACITY},
    block::TAG_SIZE,
    node::FreeList,
    tag::BlockTag,
    utils::checked_align_up,
    ALIGNMENT, MIN_BLOCK_SIZE,
};

/// Block size serving a `size`-byte request: payload plus header,
/// aligned, and never smaller than [`MIN_BLOCK_SIZE`].
#[inline]
pub(crate) fn required_block_size(size: usize) -> Option<usize> {
    let block_size = checked_align_up(size.checked_add(TAG_SIZE)?, ALIGNMENT)?.max(MIN_BLOCK_SIZE);
    (block_size <= MAX_CAPACITY).then_some(block_size)
}

/// Payload bytes of an allocated block of `block_size`.
#[inline]
pub(crate) const fn usable_size(block_size: usize) -> usize {
    block_size - TAG_SIZE
}

#[derive(Debug, Default)]
pub(crate) struct BlockList {
    free: FreeList,
}

impl BlockList {
    pub const fn new() -> Self {
        Self { free: FreeList::new() }
    }

    pub fn clear(&mut self) {
        self.free.clear();
    }

    pub fn free_list(&self) -> &FreeList {
        &self.free
    }

    /// First free block, from the head, of at least `block_size`.
    pub fn find_fit(&self, arena: &Arena, block_size: usize) -> Option<usize> {
        self.free.iter(arena).find(|&bp| arena.header_of(bp).size() >= block_size)
    }

    /// Allocate `block_size` bytes from the front of the free block at `bp`,
    /// splitting the rest off into a new free block if it can stand alone.
    pub fn place(&mut self, arena: &mut Arena, bp: usize, block_size: usize) {
        let tag = arena.header_of(bp);
        debug_assert!(!tag.is_allocated() && tag.size() >= block_size);

        self.free.remove(arena, bp);

        let total = tag.size();
        if total - block_size >= MIN_BLOCK_SIZE {
            arena.set_header(bp, BlockTag::pack(block_size, tag.is_prev_allocated(), true));

            let rest = bp + block_size;
            arena.set_boundary(rest, BlockTag::pack(total - block_size, true, false));
            self.free.push_front(arena, rest);
        } else {
            arena.set_header(bp, BlockTag::pack(total, tag.is_prev_allocated(), true));
            arena.set_prev_allocated(bp + total, true);
        }
    }

    /// Free the allocated block at `bp`, returning the block it merged into.
    pub fn release(&mut self, arena: &mut Arena, bp: usize) -> usize {
        let tag = arena.header_of(bp);
        debug_assert!(tag.is_allocated(), "double free of {:#x}", bp);

        arena.set_boundary(bp, BlockTag::pack(tag.size(), tag.is_prev_allocated(), false));
        arena.set_prev_allocated(bp + tag.size(), false);

        self.adopt(arena, bp)
    }

    /// Take ownership of a free block whose tags are already written
    /// (and whose successor's prev-allocated bit is already clear).
    pub fn adopt(&mut self, arena: &mut Arena, bp: usize) -> usize {
        self.free.push_front(arena, bp);
        self.coalesce(arena, bp)
    }

    /// Merge the listed free block at `bp` with free neighbors.
    ///
    /// The merged block starts at the lowest address and keeps that
    /// block's place in the list. Returns its payload offset.
    pub fn coalesce(&mut self, arena: &mut Arena, bp: usize) -> usize {
        let tag = arena.header_of(bp);
        let next = arena.next_block(bp);
        let next_tag = arena.header_of(next);

        let prev_free = !tag.is_prev_allocated();
        let next_free = !next_tag.is_allocated();

        let mut base = bp;
        let mut size = tag.size();
        let mut prev_allocated = tag.is_prev_allocated();

        if next_free {
            self.free.remove(arena, next);
            size += next_tag.size();
        }

        if prev_free {
            let prev = arena.prev_block(bp);
            let prev_tag = arena.header_of(prev);
            debug_assert!(!prev_tag.is_allocated());

            self.free.remove(arena, bp);
            size += prev_tag.size();
            base = prev;
            prev_allocated = prev_tag.is_prev_allocated();
        }

        if prev_free || next_free {
            log::trace!(
                "coalesce: {:#x} (prev free: {}, next free: {}) -> {:#x}+{}",
                bp, prev_free, next_free, base, size
            );

            arena.set_boundary(base, BlockTag::pack(size, prev_allocated, false));
            arena.set_prev_allocated(base + size, false);
        }

        base
    }

    /// Shrink the allocated block at `bp` to `block_size`,
    /// freeing the tail if it is large enough to stand alone.
    pub fn shrink(&mut self, arena: &mut Arena, bp: usize, block_size: usize) {
        let tag = arena.header_of(bp);
        debug_assert!(tag.is_allocated() && tag.size() >= block_size);

        let total = tag.size();
        if total - block_size < MIN_BLOCK_SIZE {
            return;
        }

        arena.set_header(bp, BlockTag::pack(block_size, tag.is_prev_allocated(), true));

        let rest = bp + block_size;
        arena.set_boundary(rest, BlockTag::pack(total - block_size, true, false));
        arena.set_prev_allocated(bp + total, false);
        self.adopt(arena, rest);
    }

    /// Grow the allocated block at `bp` to `block_size` by absorbing
    /// its free right neighbor. Returns whether that was possible.
    pub fn grow(&mut self, arena: &mut Arena, bp: usize, block_size: usize) -> bool {
        let tag = arena.header_of(bp);
        let next = arena.next_block(bp);
        let next_tag = arena.header_of(next);

        let total = tag.size() + next_tag.size();
        if next_tag.is_allocated() || total < block_size {
            return false;
        }

        self.free.remove(arena, next);

        if total - block_size >= MIN_BLOCK_SIZE {
            arena.set_header(bp, BlockTag::pack(block_size, tag.is_prev_allocated(), true));

            let rest = bp + block_size;
            arena.set_boundary(rest, BlockTag::pack(total - block_size, true, false));
            self.free.push_front(arena, rest);
        } else {
            arena.set_header(bp, BlockTag::pack(total, tag.is_prev_allocated(), true));
            arena.set_prev_allocated(bp + total, true);
        }

        true
    }

    /// Resize the allocated block at `bp` without moving it, if possible.
    pub fn resize_in_place(&mut self, arena: &mut Arena, bp: usize, block_size: usize) -> bool {
        let size = arena.header_of(bp).size();

        match block_size.cmp(&size) {
            core::cmp::Ordering::Equal => true,
            core::cmp::Ordering::Less => {
                self.shrink(arena, bp, block_size);
                true
            }
            core::cmp::Ordering::Greater => self.grow(arena, bp, block_size),
        }
    }
}
