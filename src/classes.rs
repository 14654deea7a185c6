//! [`Segregated`](crate::Segregated)'s small-object policy is dictated by
//! the [`SizeClasses`] implementation used: each class gets its own chain
//! of slabs holding slots of exactly that size, and a request is served
//! from the smallest class that fits it. Requests larger than every class
//! go to the big-object free list.

use crate::{bitfield::{BitField, Occupancy}, slab::{SLAB_HEADER_SIZE, SLAB_SIZE}, ALIGNMENT};

/// Most classes a ladder may define.
pub const MAX_SIZE_CLASSES: usize = 16;

/// Implementors describe the size-class ladder for [`Segregated`](crate::Segregated).
///
/// The ladder must be strictly ascending, every class a non-zero multiple
/// of [`ALIGNMENT`], with at most [`MAX_SIZE_CLASSES`] classes and at most
/// 256 slots per slab. This is checked when the allocator is created.
pub trait SizeClasses {
    /// Slot sizes, smallest first.
    const CLASSES: &'static [usize];

    /// Index of the smallest class able to hold `size` bytes,
    /// or `None` if `size` belongs to the big-object region.
    #[inline]
    fn class_of(size: usize) -> Option<usize> {
        Self::CLASSES.iter().position(|&class| size <= class)
    }
}

/// 16, 32, 48, 64 and 128 byte slots.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClasses;

impl SizeClasses for DefaultClasses {
    const CLASSES: &'static [usize] = &[16, 32, 48, 64, 128];
}

/// Smallest request a slab of class `index` serves.
pub(crate) fn min_admitted(classes: &[usize], index: usize) -> usize {
    match index {
        0 => 1,
        _ => classes[index - 1] + 1,
    }
}

pub(crate) fn validate(classes: &[usize]) -> Result<(), &'static str> {
    if classes.is_empty() {
        return Err("at least one size class is required");
    }
    if classes.len() > MAX_SIZE_CLASSES {
        return Err("too many size classes");
    }
    if classes.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err("size classes must be strictly ascending");
    }
    if classes.iter().any(|&class| class == 0 || class % ALIGNMENT != 0) {
        return Err("size classes must be non-zero multiples of the alignment");
    }
    if classes.iter().any(|&class| class > SLAB_SIZE - SLAB_HEADER_SIZE) {
        return Err("size class leaves no room for a slot in a slab");
    }
    if (SLAB_SIZE - SLAB_HEADER_SIZE) / classes[0] > Occupancy::BITS as usize {
        return Err("smallest size class has more slots than the occupancy map");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder() {
        assert_eq!(validate(DefaultClasses::CLASSES), Ok(()));

        assert_eq!(DefaultClasses::class_of(1), Some(0));
        assert_eq!(DefaultClasses::class_of(16), Some(0));
        assert_eq!(DefaultClasses::class_of(17), Some(1));
        assert_eq!(DefaultClasses::class_of(33), Some(2));
        assert_eq!(DefaultClasses::class_of(64), Some(3));
        assert_eq!(DefaultClasses::class_of(65), Some(4));
        assert_eq!(DefaultClasses::class_of(128), Some(4));
        assert_eq!(DefaultClasses::class_of(129), None);

        assert_eq!(min_admitted(DefaultClasses::CLASSES, 0), 1);
        assert_eq!(min_admitted(DefaultClasses::CLASSES, 3), 49);
        assert_eq!(min_admitted(DefaultClasses::CLASSES, 4), 65);
    }

    #[test]
    fn rejects_bad_ladders() {
        assert!(validate(&[]).is_err());
        assert!(validate(&[24]).is_err());
        assert!(validate(&[32, 16]).is_err());
        assert!(validate(&[16, 16]).is_err());
        assert!(validate(&[4096]).is_err());
        assert!(validate(&[16; MAX_SIZE_CLASSES + 1]).is_err());

        assert!(validate(&[16, 256, 1024, 2048]).is_ok());
    }
}
