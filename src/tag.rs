//! A `BlockTag` is the 4-byte boundary tag at either end of a block:
//! the block size with flags in the least significant bits,
//! which alignment guarantees are otherwise zero.

/// Header (and footer) word of a block.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct BlockTag(pub u32);

impl core::fmt::Debug for BlockTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockTag")
            .field("size", &self.size())
            .field("is_prev_allocated", &self.is_prev_allocated())
            .field("is_allocated", &self.is_allocated())
            .finish()
    }
}

impl BlockTag {
    pub const ALLOCATED_FLAG: u32 = 1 << 0;
    pub const PREV_ALLOCATED_FLAG: u32 = 1 << 1;

    const SIZE_MASK: u32 = !0b111;

    /// Zero-sized allocated block marking the end of a heap region.
    pub const EPILOGUE: Self = Self::pack(0, false, true);

    #[inline]
    pub const fn pack(size: usize, prev_allocated: bool, allocated: bool) -> Self {
        debug_assert!(size <= u32::MAX as usize && size as u32 & !Self::SIZE_MASK == 0);

        let mut bits = size as u32;
        if prev_allocated {
            bits |= Self::PREV_ALLOCATED_FLAG;
        }
        if allocated {
            bits |= Self::ALLOCATED_FLAG;
        }
        Self(bits)
    }

    #[inline]
    pub const fn size(self) -> usize {
        (self.0 & Self::SIZE_MASK) as usize
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED_FLAG != 0
    }

    #[inline]
    pub const fn is_prev_allocated(self) -> bool {
        self.0 & Self::PREV_ALLOCATED_FLAG != 0
    }

    /// Whether this is a zero-sized allocated sentinel.
    #[inline]
    pub const fn is_epilogue(self) -> bool {
        self.size() == 0 && self.is_allocated()
    }

    #[inline]
    pub const fn with_prev_allocated(self, prev_allocated: bool) -> Self {
        if prev_allocated {
            Self(self.0 | Self::PREV_ALLOCATED_FLAG)
        } else {
            Self(self.0 & !Self::PREV_ALLOCATED_FLAG)
        }
    }
}
