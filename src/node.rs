use crate::arena::Arena;

const WORD_SIZE: usize = core::mem::size_of::<usize>();

/// Offset of the forward link within a free block's payload.
pub(crate) const NEXT_LINK: usize = 0;
/// Offset of the backward link within a free block's payload.
pub(crate) const PREV_LINK: usize = WORD_SIZE;

#[inline]
fn decode(link: usize) -> Option<usize> {
    (link != 0).then_some(link)
}

#[inline]
fn encode(link: Option<usize>) -> usize {
    link.unwrap_or(0)
}

/// Forward link of the free block at `bp`.
#[inline]
pub(crate) fn next_of(arena: &Arena, bp: usize) -> Option<usize> {
    decode(arena.addr(bp + NEXT_LINK))
}

/// Backward link of the free block at `bp`.
#[inline]
pub(crate) fn prev_of(arena: &Arena, bp: usize) -> Option<usize> {
    decode(arena.addr(bp + PREV_LINK))
}

/// Head of an intrusive, doubly linked, null-terminated free list.
///
/// The links live in the first two machine words of each free block's
/// payload and hold arena offsets, with zero standing for "none"
/// (no payload ever starts at offset zero).
///
/// This data structure is not thread-safe, use mutexes/locks to mutually exclude data access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FreeList {
    head: Option<usize>,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { head: None }
    }

    #[inline]
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    /// Forget every member without touching the heap.
    pub fn clear(&mut self) {
        self.head = None;
    }

    /// Link the block at `bp` in as the new head.
    pub fn push_front(&mut self, arena: &mut Arena, bp: usize) {
        debug_assert!(bp != 0);

        arena.set_addr(bp + NEXT_LINK, encode(self.head));
        arena.set_addr(bp + PREV_LINK, 0);

        if let Some(head) = self.head {
            arena.set_addr(head + PREV_LINK, bp);
        }

        self.head = Some(bp);
    }

    /// Unlink the block at `bp`, which must be a member.
    pub fn remove(&mut self, arena: &mut Arena, bp: usize) {
        let next = next_of(arena, bp);
        let prev = prev_of(arena, bp);

        match prev {
            Some(prev) => arena.set_addr(prev + NEXT_LINK, encode(next)),
            None => {
                debug_assert_eq!(self.head, Some(bp));
                self.head = next;
            }
        }

        if let Some(next) = next {
            arena.set_addr(next + PREV_LINK, encode(prev));
        }
    }

    /// Creates an iterator over the members, head first.
    ///
    /// The list must not be modified while iterating.
    pub fn iter<'a>(&self, arena: &'a Arena) -> Iter<'a> {
        Iter { arena, cursor: self.head }
    }
}

/// An iterator over the payload offsets of a [`FreeList`]'s members.
#[derive(Debug)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub(crate) struct Iter<'a> {
    arena: &'a Arena,
    cursor: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = next_of(self.arena, current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CHUNK_SIZE;

    #[test]
    fn test_free_list() {
        let mut arena = Arena::new(CHUNK_SIZE);
        arena.extend(512).unwrap();

        let mut list = FreeList::new();
        assert!(list.iter(&arena).next().is_none());

        for bp in [64, 128, 192] {
            list.push_front(&mut arena, bp);
        }

        assert!(list.iter(&arena).eq([192, 128, 64]));
        assert_eq!(prev_of(&arena, 192), None);
        assert_eq!(prev_of(&arena, 128), Some(192));
        assert_eq!(prev_of(&arena, 64), Some(128));
        assert_eq!(next_of(&arena, 64), None);

        list.remove(&mut arena, 128);
        assert!(list.iter(&arena).eq([192, 64]));
        assert_eq!(prev_of(&arena, 64), Some(192));

        list.remove(&mut arena, 192);
        assert_eq!(list.head(), Some(64));
        assert_eq!(prev_of(&arena, 64), None);

        list.push_front(&mut arena, 256);
        assert!(list.iter(&arena).eq([256, 64]));

        list.remove(&mut arena, 64);
        list.remove(&mut arena, 256);
        assert_eq!(list.head(), None);

        list.push_front(&mut arena, 320);
        list.clear();
        assert!(list.iter(&arena).next().is_none());
    }
}
