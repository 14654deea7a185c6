#![no_main]

use std::ptr::NonNull;

use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use segalloc::{Arena, Explicit, Implicit, Malloc, Segregated};

#[derive(Arbitrary, Debug)]
enum Actions {
    /// Allocate `size` bytes, scaled up to reach the big-object path
    Alloc { size: u16, scale: bool },
    /// Allocate `count * size` zeroed bytes
    AllocZeroed { count: u8, size: u16 },
    /// Free the ith allocation
    Free { index: u8 },
    /// Realloc the ith allocation
    Realloc { index: u8, new_size: u16 },
    /// Validate the heap
    Check,
    /// Discard every allocation
    Reinit,
}
use Actions::*;

fuzz_target!(|actions: Vec<Actions>| {
    let arena = || Arena::new(8 << 20);

    fuzz_malloc(&mut Implicit::new(arena()), &actions);
    fuzz_malloc(&mut Explicit::new(arena()), &actions);
    fuzz_malloc(&mut Segregated::new(arena()), &actions);
});

fn fill(ptr: NonNull<u8>, len: usize, byte: u8) {
    unsafe { ptr.as_ptr().write_bytes(byte, len) };
}

fn holds(ptr: NonNull<u8>, len: usize, byte: u8) -> bool {
    (0..len).all(|i| unsafe { ptr.as_ptr().add(i).read() } == byte)
}

fn fuzz_malloc(heap: &mut dyn Malloc, actions: &[Actions]) {
    heap.init().unwrap();

    // (pointer, requested size, fill byte)
    let mut allocations: Vec<(NonNull<u8>, usize, u8)> = vec![];

    for (i, action) in actions.iter().enumerate() {
        let byte = i as u8;

        match *action {
            Alloc { size, scale } => {
                let size = if scale { size as usize * 16 } else { size as usize };

                if let Some(ptr) = heap.malloc(size) {
                    assert_eq!(ptr.as_ptr() as usize % heap.alignment(), 0);
                    assert!(unsafe { heap.usable_size(ptr) } >= size);
                    fill(ptr, size, byte);
                    allocations.push((ptr, size, byte));
                }
            }
            AllocZeroed { count, size } => {
                let total = count as usize * size as usize;

                if let Some(ptr) = heap.calloc(count as usize, size as usize) {
                    assert!(holds(ptr, total, 0));
                    fill(ptr, total, byte);
                    allocations.push((ptr, total, byte));
                }
            }
            Free { index } => {
                if (index as usize) < allocations.len() {
                    let (ptr, size, fill_byte) = allocations.swap_remove(index as usize);
                    assert!(holds(ptr, size, fill_byte));
                    unsafe { heap.free(Some(ptr)) };
                }
            }
            Realloc { index, new_size } => {
                let new_size = new_size as usize;

                if (index as usize) < allocations.len() && new_size != 0 {
                    let (ptr, size, fill_byte) = allocations[index as usize];

                    if let Some(new_ptr) = unsafe { heap.realloc(Some(ptr), new_size) } {
                        assert!(holds(new_ptr, size.min(new_size), fill_byte));
                        fill(new_ptr, new_size, byte);
                        allocations[index as usize] = (new_ptr, new_size, byte);
                    } else {
                        assert!(holds(ptr, size, fill_byte));
                    }
                }
            }
            Check => {
                let report = heap.check_heap(false);
                assert!(report.is_clean(), "{:?}", report.violations());
            }
            Reinit => {
                allocations.clear();
                heap.init().unwrap();
            }
        }
    }

    for (ptr, size, fill_byte) in allocations {
        assert!(holds(ptr, size, fill_byte));
        unsafe { heap.free(Some(ptr)) };
    }

    let report = heap.check_heap(false);
    assert!(report.is_clean(), "{:?}", report.violations());
}
