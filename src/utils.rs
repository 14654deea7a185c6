//! Offset arithmetic shared by the allocators.
//!
//! Nothing in here should be exported.

/// Aligns `n` up to the next multiple of `align`.
///
/// `align` must be a power of two and the result must not overflow.
#[inline]
pub(crate) const fn align_up(n: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (n + (align - 1)) & !(align - 1)
}

/// Like [`align_up`], but `None` on overflow.
#[inline]
pub(crate) const fn checked_align_up(n: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match n.checked_add(align - 1) {
        Some(n) => Some(n & !(align - 1)),
        None => None,
    }
}

#[inline]
pub(crate) const fn is_aligned(n: usize, align: usize) -> bool {
    debug_assert!(align.is_power_of_two());
    n & (align - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_offset_test() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(15, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 8), 24);
        assert_eq!(align_up(4097, 4096), 8192);

        assert_eq!(checked_align_up(usize::MAX, 16), None);
        assert_eq!(checked_align_up(usize::MAX - 14, 16), None);
        assert_eq!(checked_align_up(usize::MAX - 15, 16), Some(usize::MAX - 15));
        assert_eq!(checked_align_up(usize::MAX - 16, 16), Some(usize::MAX - 15));

        assert!(is_aligned(0, 16));
        assert!(is_aligned(4096, 4096));
        assert!(!is_aligned(8, 16));
    }
}
