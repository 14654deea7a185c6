use core::fmt;

/// The arena could not be extended by the requested amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutOfMemory {
    /// The increment that was asked for.
    pub requested: isize,
    /// Bytes left below the arena's capacity at the time.
    pub available: usize,
}

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.requested < 0 {
            write!(f, "cannot shrink the arena by {} bytes", self.requested.unsigned_abs())
        } else {
            write!(
                f,
                "cannot extend the arena by {} bytes, {} bytes available",
                self.requested, self.available
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_out_of_memory() {
        let err = OutOfMemory { requested: 8192, available: 4096 };
        assert_eq!(err.to_string(), "cannot extend the arena by 8192 bytes, 4096 bytes available");

        let err = OutOfMemory { requested: -16, available: 0 };
        assert_eq!(err.to_string(), "cannot shrink the arena by 16 bytes");
    }
}
