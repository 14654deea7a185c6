//! Heap consistency checking.
//!
//! Checks never modify the heap. Each problem found becomes a
//! [`Violation`] in the returned [`Report`] and is logged at error level.
//! In verbose mode every block, slab and free-list member is also dumped
//! at info level under the `segalloc::dump` target.

use alloc::vec::Vec;
use core::fmt;

use crate::{
    arena::Arena,
    block::{footer_offset, header_offset, DOUBLE_TAG_SIZE, REGION_OVERHEAD, TAG_SIZE},
    node::{self, FreeList},
    tag::BlockTag,
    ALIGNMENT, IMPLICIT_ALIGNMENT, IMPLICIT_MIN_BLOCK_SIZE, MIN_BLOCK_SIZE,
};

const DUMP: &str = "segalloc::dump";

/// A structural problem found by [`check_heap`](crate::Malloc::check_heap).
///
/// Offsets are arena offsets of block payloads unless noted otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// The pad word or prologue pair of the region at `offset` is malformed.
    BadPrologue { offset: usize },
    /// The region's closing header at `offset` is not a zero-sized allocated tag,
    /// or it does not sit at the end of the heap.
    BadEpilogue { offset: usize },
    /// A block runs past the arena's break.
    Overrun { offset: usize, size: usize },
    MisalignedPayload { offset: usize },
    MisalignedSize { offset: usize, size: usize },
    BlockTooSmall { offset: usize, size: usize },
    /// A block's footer disagrees with its header.
    FooterMismatch { offset: usize, header: BlockTag, footer: BlockTag },
    /// A prev-allocated bit disagrees with the block to its left.
    PrevAllocatedMismatch { offset: usize, recorded: bool, actual: bool },
    /// Two free blocks are adjacent, so an earlier coalesce was missed.
    Uncoalesced { offset: usize },
    /// A free-list link points outside the heap or at a misaligned offset.
    BadLink { offset: usize, link: usize },
    /// A free-list member's back link is not its predecessor.
    BrokenBackLink { offset: usize, recorded: Option<usize>, expected: Option<usize> },
    /// A free-list member is marked allocated.
    AllocatedInFreeList { offset: usize },
    /// Walking the free list did not terminate.
    FreeListCycle,
    /// The free list and the heap disagree on how many blocks are free.
    FreeCountMismatch { listed: usize, walked: usize },
    /// A slab header (at `offset`) is not chunk-aligned.
    MisalignedSlab { offset: usize },
    /// A slab header records a size class other than that of its chain.
    SlabClassMismatch { offset: usize, recorded: usize, expected: usize },
    /// A slab header records the wrong smallest admitted size.
    SlabMinimumMismatch { offset: usize, recorded: usize, expected: usize },
    /// An occupancy bit at or above the slab's capacity is set.
    SlabBitBeyondCapacity { offset: usize, bit: u32 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BadPrologue { offset } => write!(f, "malformed prologue in region at {:#x}", offset),
            Self::BadEpilogue { offset } => write!(f, "malformed or misplaced epilogue at {:#x}", offset),
            Self::Overrun { offset, size } => {
                write!(f, "block {:#x} of size {} runs past the break", offset, size)
            }
            Self::MisalignedPayload { offset } => write!(f, "payload {:#x} is misaligned", offset),
            Self::MisalignedSize { offset, size } => {
                write!(f, "block {:#x} has misaligned size {}", offset, size)
            }
            Self::BlockTooSmall { offset, size } => {
                write!(f, "block {:#x} is smaller than the minimum ({})", offset, size)
            }
            Self::FooterMismatch { offset, header, footer } => {
                write!(f, "block {:#x} footer {:?} does not match header {:?}", offset, footer, header)
            }
            Self::PrevAllocatedMismatch { offset, recorded, actual } => write!(
                f,
                "block {:#x} records prev-allocated {} but its neighbor is {}",
                offset,
                recorded,
                if actual { "allocated" } else { "free" }
            ),
            Self::Uncoalesced { offset } => {
                write!(f, "free block {:#x} follows another free block", offset)
            }
            Self::BadLink { offset, link } => {
                write!(f, "free list link {:#x} (from {:#x}) is invalid", link, offset)
            }
            Self::BrokenBackLink { offset, recorded, expected } => write!(
                f,
                "free block {:#x} links back to {:x?} instead of {:x?}",
                offset, recorded, expected
            ),
            Self::AllocatedInFreeList { offset } => {
                write!(f, "allocated block {:#x} is in the free list", offset)
            }
            Self::FreeListCycle => write!(f, "free list does not terminate"),
            Self::FreeCountMismatch { listed, walked } => {
                write!(f, "{} blocks in the free list, {} free blocks in the heap", listed, walked)
            }
            Self::MisalignedSlab { offset } => write!(f, "slab {:#x} is not chunk-aligned", offset),
            Self::SlabClassMismatch { offset, recorded, expected } => write!(
                f,
                "slab {:#x} records {}-byte slots in the {}-byte chain",
                offset, recorded, expected
            ),
            Self::SlabMinimumMismatch { offset, recorded, expected } => write!(
                f,
                "slab {:#x} admits requests from {} bytes, expected {}",
                offset, recorded, expected
            ),
            Self::SlabBitBeyondCapacity { offset, bit } => {
                write!(f, "slab {:#x} has occupancy bit {} set beyond its capacity", offset, bit)
            }
        }
    }
}

/// The outcome of a heap check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    violations: Vec<Violation>,
    blocks: usize,
    free_blocks: usize,
    slabs: usize,
}

impl Report {
    /// Whether no violation was found.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Number of variable-sized blocks walked, sentinels excluded.
    pub fn block_count(&self) -> usize {
        self.blocks
    }

    /// Number of those blocks that are free.
    pub fn free_block_count(&self) -> usize {
        self.free_blocks
    }

    /// Number of slabs walked.
    pub fn slab_count(&self) -> usize {
        self.slabs
    }

    pub(crate) fn push(&mut self, violation: Violation) {
        log::error!("heap check: {}", violation);
        self.violations.push(violation);
    }

    pub(crate) fn count_slab(&mut self) {
        self.slabs += 1;
    }
}

/// What a well-formed block looks like in a given design.
#[derive(Debug)]
pub(crate) struct BlockRules {
    pub alignment: usize,
    pub min_block: usize,
    /// Headers carry a prev-allocated bit and allocated blocks have no footer.
    pub tracks_prev: bool,
}

pub(crate) const EXPLICIT_RULES: BlockRules =
    BlockRules { alignment: ALIGNMENT, min_block: MIN_BLOCK_SIZE, tracks_prev: true };

pub(crate) const IMPLICIT_RULES: BlockRules =
    BlockRules { alignment: IMPLICIT_ALIGNMENT, min_block: IMPLICIT_MIN_BLOCK_SIZE, tracks_prev: false };

/// Walk the region whose pad word is at `base`, from its prologue to its epilogue.
///
/// Returns the offset just past the epilogue, or the break if the walk ran off the heap.
pub(crate) fn walk_region(
    arena: &Arena,
    base: usize,
    rules: &BlockRules,
    report: &mut Report,
    verbose: bool,
) -> usize {
    if base + REGION_OVERHEAD > arena.size() {
        report.push(Violation::BadPrologue { offset: base });
        return arena.size();
    }

    let prologue = arena.tag(base + TAG_SIZE);
    if prologue.size() != DOUBLE_TAG_SIZE
        || !prologue.is_allocated()
        || arena.tag(base + DOUBLE_TAG_SIZE) != prologue
    {
        report.push(Violation::BadPrologue { offset: base });
    }

    if verbose {
        log::info!(target: DUMP, "region {:#x}", base);
    }

    let mut bp = base + REGION_OVERHEAD;
    let mut prev_allocated = true;

    loop {
        let tag = arena.header_of(bp);

        if tag.size() == 0 {
            if !tag.is_allocated() {
                report.push(Violation::BadEpilogue { offset: header_offset(bp) });
            }
            if rules.tracks_prev && tag.is_prev_allocated() != prev_allocated {
                report.push(Violation::PrevAllocatedMismatch {
                    offset: bp,
                    recorded: tag.is_prev_allocated(),
                    actual: prev_allocated,
                });
            }
            if verbose {
                log::info!(target: DUMP, "  {:#010x} epilogue {:?}", header_offset(bp), tag);
            }
            return bp;
        }

        report.blocks += 1;

        if verbose {
            log::info!(target: DUMP, "  {:#010x} {:?}", bp, tag);
        }

        if bp % rules.alignment != 0 {
            report.push(Violation::MisalignedPayload { offset: bp });
        }
        if tag.size() % rules.alignment != 0 {
            report.push(Violation::MisalignedSize { offset: bp, size: tag.size() });
        }
        if tag.size() < rules.min_block {
            report.push(Violation::BlockTooSmall { offset: bp, size: tag.size() });
        }
        if bp + tag.size() > arena.size() {
            report.push(Violation::Overrun { offset: bp, size: tag.size() });
            return arena.size();
        }

        if rules.tracks_prev && tag.is_prev_allocated() != prev_allocated {
            report.push(Violation::PrevAllocatedMismatch {
                offset: bp,
                recorded: tag.is_prev_allocated(),
                actual: prev_allocated,
            });
        }

        if !tag.is_allocated() || !rules.tracks_prev {
            let footer = arena.footer_of(bp);
            if footer != tag {
                report.push(Violation::FooterMismatch { offset: bp, header: tag, footer });
            }
        }

        if !tag.is_allocated() {
            report.free_blocks += 1;
            if !prev_allocated {
                report.push(Violation::Uncoalesced { offset: bp });
            }
        }

        prev_allocated = tag.is_allocated();
        bp += tag.size();
    }
}

/// Walk `list`, checking link symmetry and membership, and compare its
/// length against the free blocks counted by earlier region walks.
///
/// Returns the number of members.
pub(crate) fn walk_free_list(arena: &Arena, list: &FreeList, report: &mut Report, verbose: bool) -> usize {
    let limit = arena.size() / MIN_BLOCK_SIZE;
    let valid = |link: usize| {
        link % ALIGNMENT == 0 && link >= REGION_OVERHEAD && link + MIN_BLOCK_SIZE <= arena.size()
    };

    let mut expected_prev = None;
    let mut listed = 0;
    let mut cursor = list.head();

    if verbose {
        log::info!(target: DUMP, "free list");
    }

    while let Some(bp) = cursor {
        if !valid(bp) {
            report.push(Violation::BadLink { offset: expected_prev.unwrap_or(0), link: bp });
            return listed;
        }
        if listed > limit {
            report.push(Violation::FreeListCycle);
            return listed;
        }

        let tag = arena.header_of(bp);
        if verbose {
            log::info!(target: DUMP, "  {:#010x} {:?}", bp, tag);
        }
        if tag.is_allocated() {
            report.push(Violation::AllocatedInFreeList { offset: bp });
        }

        let recorded = node::prev_of(arena, bp);
        if recorded != expected_prev {
            report.push(Violation::BrokenBackLink { offset: bp, recorded, expected: expected_prev });
        }

        listed += 1;
        expected_prev = Some(bp);
        cursor = node::next_of(arena, bp);
    }

    if listed != report.free_blocks {
        report.push(Violation::FreeCountMismatch { listed, walked: report.free_blocks });
    }

    listed
}
