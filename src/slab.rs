//! A slab is one chunk carved into equal slots of a single size class.
//!
//! Header layout, followed directly by the slots:
//!
//! | offset | field                                      |
//! |--------|--------------------------------------------|
//! | 0      | next slab in the chain (machine word, all ones = none) |
//! | 8      | occupancy map (4 × u64)                    |
//! | 40     | slot size (u32)                            |
//! | 44     | smallest admitted request (u32)            |
//!
//! Slots carry no per-slot header. Slabs are never released back to the arena.

use crate::{
    arena::Arena,
    bitfield::{BitField, Occupancy},
    utils::is_aligned,
    OutOfMemory, CHUNK_SIZE,
};

/// Bytes taken by one slab.
pub const SLAB_SIZE: usize = CHUNK_SIZE;
/// Bytes at the start of a slab before the first slot.
pub const SLAB_HEADER_SIZE: usize = 48;

const NEXT_FIELD: usize = 0;
const OCCUPANCY_FIELD: usize = 8;
const CLASS_FIELD: usize = 40;
const MIN_ADMITTED_FIELD: usize = 44;

/// The first slab may sit at offset zero, so zero can't mean "none".
const NO_SLAB: usize = usize::MAX;

/// Slots a slab of `class`-byte slots holds.
#[inline]
pub(crate) const fn capacity_of(class: usize) -> usize {
    let slots = (SLAB_SIZE - SLAB_HEADER_SIZE) / class;
    if slots > Occupancy::BITS as usize {
        Occupancy::BITS as usize
    } else {
        slots
    }
}

/// Handle to a slab, by the arena offset of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slab(pub usize);

impl Slab {
    /// Claim a fresh chunk from the arena and write an empty slab header,
    /// linked in front of `next`.
    pub fn create(
        arena: &mut Arena,
        class: usize,
        min_admitted: usize,
        next: Option<Slab>,
    ) -> Result<Self, OutOfMemory> {
        let base = arena.extend_by(SLAB_SIZE)?;
        debug_assert!(is_aligned(base, SLAB_SIZE));

        let slab = Self(base);
        arena.set_addr(base + NEXT_FIELD, next.map_or(NO_SLAB, |next| next.0));
        slab.store_occupancy(arena, &Occupancy::ZEROES);
        arena.set_word(base + CLASS_FIELD, class as u32);
        arena.set_word(base + MIN_ADMITTED_FIELD, min_admitted as u32);

        log::debug!("slab: created {:#x} for {}-byte slots ({} slots)", base, class, capacity_of(class));
        Ok(slab)
    }

    #[inline]
    pub fn next(self, arena: &Arena) -> Option<Slab> {
        match arena.addr(self.0 + NEXT_FIELD) {
            NO_SLAB => None,
            next => Some(Slab(next)),
        }
    }

    #[inline]
    pub fn class(self, arena: &Arena) -> usize {
        arena.word(self.0 + CLASS_FIELD) as usize
    }

    #[inline]
    pub fn min_admitted(self, arena: &Arena) -> usize {
        arena.word(self.0 + MIN_ADMITTED_FIELD) as usize
    }

    #[inline]
    pub fn capacity(self, arena: &Arena) -> usize {
        capacity_of(self.class(arena))
    }

    pub fn occupancy(self, arena: &Arena) -> Occupancy {
        let field = self.0 + OCCUPANCY_FIELD;
        [arena.u64(field), arena.u64(field + 8), arena.u64(field + 16), arena.u64(field + 24)]
    }

    fn store_occupancy(self, arena: &mut Arena, occupancy: &Occupancy) {
        for (i, &bits) in occupancy.iter().enumerate() {
            arena.set_u64(self.0 + OCCUPANCY_FIELD + i * 8, bits);
        }
    }

    /// Whether `offset` falls within this slab's chunk.
    #[inline]
    pub fn contains(self, offset: usize) -> bool {
        offset >= self.0 && offset - self.0 < SLAB_SIZE
    }

    #[inline]
    pub fn slot_offset(self, arena: &Arena, index: usize) -> usize {
        self.0 + SLAB_HEADER_SIZE + index * self.class(arena)
    }

    /// Slot index of the slot starting at `offset`.
    pub fn slot_index(self, arena: &Arena, offset: usize) -> usize {
        debug_assert!(self.contains(offset) && offset >= self.0 + SLAB_HEADER_SIZE);

        let class = self.class(arena);
        let relative = offset - self.0 - SLAB_HEADER_SIZE;
        debug_assert!(relative % class == 0, "{:#x} is not the start of a slot", offset);
        relative / class
    }

    /// Hand out the lowest free slot, if any.
    pub fn claim(self, arena: &mut Arena) -> Option<usize> {
        let mut occupancy = self.occupancy(arena);
        let index = occupancy.clear_scan_after(0);

        if index as usize >= self.capacity(arena) {
            return None;
        }

        occupancy.set_bit(index);
        self.store_occupancy(arena, &occupancy);
        Some(self.slot_offset(arena, index as usize))
    }

    /// Mark slot `index` free again.
    pub fn release(self, arena: &mut Arena, index: usize) {
        debug_assert!(index < self.capacity(arena));

        let mut occupancy = self.occupancy(arena);
        debug_assert!(occupancy.read_bit(index as u32), "slot {} of {:#x} is not allocated", index, self.0);

        occupancy.clear_bit(index as u32);
        self.store_occupancy(arena, &occupancy);
    }

    /// Iterate the chain starting at `head`.
    pub fn chain(arena: &Arena, head: Option<Slab>) -> Chain<'_> {
        Chain { arena, cursor: head }
    }
}

/// An iterator over a chain of slabs, newest first.
#[derive(Debug)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub(crate) struct Chain<'a> {
    arena: &'a Arena,
    cursor: Option<Slab>,
}

impl Iterator for Chain<'_> {
    type Item = Slab;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = current.next(self.arena);
        Some(current)
    }
}
