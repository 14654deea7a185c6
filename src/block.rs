//! Boundary-tag navigation.
//!
//! Blocks are named by the arena offset of their payload (`bp`). The header
//! sits immediately before the payload, the footer (when present) in the
//! last tag-sized slot of the block:
//!
//! ```text
//!  ... | header | payload ...                  | footer | header | ...
//!               ^ bp                                    ^ next block's bp
//! ```
//!
//! Every heap region starts with a pad word and an allocated 8-byte
//! prologue (header and footer), and ends with a zero-sized allocated
//! epilogue header.

use crate::{arena::Arena, tag::BlockTag};

/// Size of a header or footer.
pub(crate) const TAG_SIZE: usize = 4;
/// Header plus footer.
pub(crate) const DOUBLE_TAG_SIZE: usize = 2 * TAG_SIZE;
/// Pad word, prologue pair and epilogue.
pub(crate) const REGION_OVERHEAD: usize = 4 * TAG_SIZE;

#[inline]
pub(crate) const fn header_offset(bp: usize) -> usize {
    bp - TAG_SIZE
}

#[inline]
pub(crate) const fn footer_offset(bp: usize, size: usize) -> usize {
    bp + size - DOUBLE_TAG_SIZE
}

impl Arena {
    #[inline]
    pub(crate) fn tag(&self, offset: usize) -> BlockTag {
        BlockTag(self.word(offset))
    }

    #[inline]
    pub(crate) fn set_tag(&mut self, offset: usize, tag: BlockTag) {
        self.set_word(offset, tag.0)
    }

    #[inline]
    pub(crate) fn header_of(&self, bp: usize) -> BlockTag {
        self.tag(header_offset(bp))
    }

    #[inline]
    pub(crate) fn set_header(&mut self, bp: usize, tag: BlockTag) {
        self.set_tag(header_offset(bp), tag)
    }

    /// Read the footer, as located by the header's size.
    #[inline]
    pub(crate) fn footer_of(&self, bp: usize) -> BlockTag {
        self.tag(footer_offset(bp, self.header_of(bp).size()))
    }

    /// Write `tag` as both header and footer of the block at `bp`.
    #[inline]
    pub(crate) fn set_boundary(&mut self, bp: usize, tag: BlockTag) {
        debug_assert!(tag.size() >= DOUBLE_TAG_SIZE);
        self.set_header(bp, tag);
        self.set_tag(footer_offset(bp, tag.size()), tag);
    }

    #[inline]
    pub(crate) fn next_block(&self, bp: usize) -> usize {
        bp + self.header_of(bp).size()
    }

    /// The block before `bp`. Only meaningful if that block has a footer.
    #[inline]
    pub(crate) fn prev_block(&self, bp: usize) -> usize {
        bp - self.tag(bp - DOUBLE_TAG_SIZE).size()
    }

    /// Refresh the prev-allocated bit of the block at `bp`,
    /// mirroring it into the footer if the block is free.
    pub(crate) fn set_prev_allocated(&mut self, bp: usize, prev_allocated: bool) {
        let tag = self.header_of(bp).with_prev_allocated(prev_allocated);
        self.set_header(bp, tag);

        if !tag.is_allocated() {
            self.set_tag(footer_offset(bp, tag.size()), tag);
        }
    }

    /// Write the pad word and prologue pair of a region starting at `base`.
    ///
    /// Returns the payload offset of the region's first block, whose
    /// header the caller is responsible for.
    pub(crate) fn format_prologue(&mut self, base: usize) -> usize {
        let prologue = BlockTag::pack(DOUBLE_TAG_SIZE, true, true);

        self.set_word(base, 0);
        self.set_tag(base + TAG_SIZE, prologue);
        self.set_tag(base + DOUBLE_TAG_SIZE, prologue);

        base + REGION_OVERHEAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CHUNK_SIZE;

    #[test]
    fn navigation() {
        let mut arena = Arena::new(CHUNK_SIZE);
        arena.extend(256).unwrap();

        let first = arena.format_prologue(0);
        assert_eq!(first, 16);
        assert_eq!(arena.tag(4), arena.tag(8));
        assert!(arena.tag(4).is_allocated());

        arena.set_header(first, BlockTag::pack(64, true, true));
        let second = arena.next_block(first);
        assert_eq!(second, 80);

        arena.set_boundary(second, BlockTag::pack(96, true, false));
        assert_eq!(arena.footer_of(second), arena.header_of(second));

        let third = arena.next_block(second);
        arena.set_header(third, BlockTag::pack(32, false, true));
        assert_eq!(arena.prev_block(third), second);

        arena.set_prev_allocated(second, false);
        assert!(!arena.header_of(second).is_prev_allocated());
        assert_eq!(arena.footer_of(second), arena.header_of(second));

        arena.set_prev_allocated(third, true);
        assert!(arena.header_of(third).is_prev_allocated());
        // allocated blocks carry no footer
        assert_eq!(arena.tag(footer_offset(third, 32)).0, 0);
    }
}
