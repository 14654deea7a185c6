//! Track allocation counters for the allocators.

use crate::{classes::SizeClasses, Explicit, Implicit, Segregated};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Counters {
    /// Number of active allocations.
    pub allocation_count: usize,
    /// Total number of allocations.
    pub total_allocation_count: u64,

    /// Sum of active allocations' usable sizes.
    pub allocated_bytes: usize,
    /// Sum of all allocations' usable sizes.
    ///
    /// Bytes gained by in-place reallocation are counted once.
    pub total_allocated_bytes: u64,

    /// Bytes obtained from the arena, metadata included.
    pub heap_bytes: usize,
    /// Number of times the arena was extended.
    pub extension_count: u64,

    /// Number of slabs created.
    pub slab_count: usize,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            allocation_count: 0,
            total_allocation_count: 0,
            allocated_bytes: 0,
            total_allocated_bytes: 0,
            heap_bytes: 0,
            extension_count: 0,
            slab_count: 0,
        }
    }

    /// Returns the number of heap bytes not handed out: free space, padding and metadata.
    pub const fn overhead_bytes(&self) -> usize {
        self.heap_bytes - self.allocated_bytes
    }

    /// Returns the total number of allocated bytes freed.
    pub const fn total_freed_bytes(&self) -> u64 {
        self.total_allocated_bytes - self.allocated_bytes as u64
    }

    pub(crate) fn account_alloc(&mut self, alloc_size: usize) {
        self.allocation_count += 1;
        self.allocated_bytes += alloc_size;

        self.total_allocation_count += 1;
        self.total_allocated_bytes += alloc_size as u64;
    }

    pub(crate) fn account_dealloc(&mut self, alloc_size: usize) {
        self.allocation_count -= 1;
        self.allocated_bytes -= alloc_size;
    }

    pub(crate) fn account_resize_in_place(&mut self, old_alloc_size: usize, new_alloc_size: usize) {
        if new_alloc_size >= old_alloc_size {
            self.allocated_bytes += new_alloc_size - old_alloc_size;
            self.total_allocated_bytes += (new_alloc_size - old_alloc_size) as u64;
        } else {
            self.allocated_bytes -= old_alloc_size - new_alloc_size;
            self.total_allocated_bytes -= (old_alloc_size - new_alloc_size) as u64;
        }
    }

    pub(crate) fn account_extend(&mut self, size: usize) {
        self.heap_bytes += size;
        self.extension_count += 1;
    }

    pub(crate) fn account_slab(&mut self) {
        self.slab_count += 1;
    }
}

impl Implicit {
    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

impl Explicit {
    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

impl<C: SizeClasses> Segregated<C> {
    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}
