//! Slabs track which of their slots are handed out in a 256-bit occupancy
//! map kept inside the slab header. Bit `i` is set exactly while slot `i`
//! is allocated.
//!
//! Provided implementations:
//! - `u64`
//! - `[B; N]` arrays of any [`BitField`], [`Occupancy`] being `[u64; 4]`

/// The occupancy map stored in every slab header.
pub type Occupancy = [u64; 4];

/// A fixed-width set of bits with fast scans for set and clear bits.
pub trait BitField: core::fmt::Debug + Copy + Clone + Sized + Send + Sync + 'static + PartialEq + Eq {
    /// Number of bits available in this bitfield.
    const BITS: u32;

    /// A constant initial value where all bits are unset.
    const ZEROES: Self;

    /// Find the lowest set bit at index b or greater.
    ///
    /// Returns [`BITS`](BitField::BITS) if there is none.
    /// `b` will be less than [`BITS`](BitField::BITS).
    fn bit_scan_after(&self, b: u32) -> u32;

    /// Find the lowest clear bit at index b or greater.
    ///
    /// Returns [`BITS`](BitField::BITS) if there is none.
    /// `b` will be less than [`BITS`](BitField::BITS).
    fn clear_scan_after(&self, b: u32) -> u32;

    /// Set the bit at index b.
    fn set_bit(&mut self, b: u32);

    /// Clear the bit at index b.
    fn clear_bit(&mut self, b: u32);

    /// Read the bit at index b.
    fn read_bit(&self, b: u32) -> bool;

    /// Number of set bits.
    fn count_ones(&self) -> u32;
}

impl BitField for u64 {
    const BITS: u32 = u64::BITS;
    const ZEROES: Self = 0;

    #[inline(always)]
    fn bit_scan_after(&self, b: u32) -> u32 {
        (*self >> b << b).trailing_zeros()
    }

    #[inline(always)]
    fn clear_scan_after(&self, b: u32) -> u32 {
        (!*self >> b << b).trailing_zeros()
    }

    #[inline(always)]
    fn set_bit(&mut self, b: u32) {
        *self |= 1 << b;
    }

    #[inline(always)]
    fn clear_bit(&mut self, b: u32) {
        *self &= !(1 << b);
    }

    #[inline(always)]
    fn read_bit(&self, b: u32) -> bool {
        *self & 1 << b != 0
    }

    #[inline(always)]
    fn count_ones(&self) -> u32 {
        u64::count_ones(*self)
    }
}

impl<const N: usize, B: BitField> BitField for [B; N] {
    const BITS: u32 = B::BITS * N as u32;
    const ZEROES: Self = [B::ZEROES; N];

    fn bit_scan_after(&self, b: u32) -> u32 {
        scan(self, b, B::bit_scan_after)
    }

    fn clear_scan_after(&self, b: u32) -> u32 {
        scan(self, b, B::clear_scan_after)
    }

    fn set_bit(&mut self, b: u32) {
        self[(b / B::BITS) as usize].set_bit(b % B::BITS);
    }

    fn clear_bit(&mut self, b: u32) {
        self[(b / B::BITS) as usize].clear_bit(b % B::BITS);
    }

    fn read_bit(&self, b: u32) -> bool {
        self[(b / B::BITS) as usize].read_bit(b % B::BITS)
    }

    fn count_ones(&self) -> u32 {
        self.iter().map(B::count_ones).sum()
    }
}

/// Scan element-wise, starting partway into the element holding bit `b`.
fn scan<const N: usize, B: BitField>(bits: &[B; N], b: u32, f: impl Fn(&B, u32) -> u32) -> u32 {
    let first = (b / B::BITS) as usize;
    let mut from = b % B::BITS;

    for (i, element) in bits.iter().enumerate().skip(first) {
        let found = f(element, from);
        if found < B::BITS {
            return i as u32 * B::BITS + found;
        }
        from = 0;
    }

    <[B; N]>::BITS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64() {
        let mut bits = u64::ZEROES;
        assert_eq!(bits.bit_scan_after(0), 64);
        assert_eq!(bits.clear_scan_after(0), 0);

        bits.set_bit(0);
        bits.set_bit(1);
        bits.set_bit(63);
        assert_eq!(bits.clear_scan_after(0), 2);
        assert_eq!(bits.bit_scan_after(2), 63);
        assert!(bits.read_bit(63));
        assert_eq!(BitField::count_ones(&bits), 3);

        bits.clear_bit(1);
        assert_eq!(bits.clear_scan_after(0), 1);
        assert_eq!(u64::MAX.clear_scan_after(5), 64);
    }

    #[test]
    fn test_occupancy() {
        let mut occupancy = Occupancy::ZEROES;
        assert_eq!(Occupancy::BITS, 256);
        assert_eq!(occupancy.bit_scan_after(0), 256);

        for b in 0..130 {
            assert_eq!(occupancy.clear_scan_after(0), b);
            occupancy.set_bit(b);
        }
        assert_eq!(occupancy, [u64::MAX, u64::MAX, 0b11, 0]);
        assert_eq!(occupancy.count_ones(), 130);

        occupancy.clear_bit(70);
        assert!(!occupancy.read_bit(70));
        assert_eq!(occupancy.clear_scan_after(0), 70);
        assert_eq!(occupancy.clear_scan_after(71), 130);
        assert_eq!(occupancy.bit_scan_after(130), 256);

        occupancy.set_bit(255);
        assert_eq!(occupancy.bit_scan_after(130), 255);
        assert_eq!(occupancy.bit_scan_after(253), 255);

        let full = [u64::MAX; 4];
        assert_eq!(full.clear_scan_after(0), 256);
    }
}
