use std::mem;
use std::ptr::NonNull;

use spin_handle::INVALID_INDEX;

use crate::PoolError;

/// A pool of `slot_count` fixed-size slots, each `slot_size` bytes.
///
/// `slot_size` must be at least `size_of::<u32>()`, since free slots
/// store their free-list successor index in their first four bytes.
pub struct FixedPool {
    memory: Box<[u8]>,
    slot_size: usize,
    slot_count: usize,
    free_head: u32,
    free_count: usize,
}

impl FixedPool {
    pub fn new(slot_size: usize, slot_count: usize) -> Result<Self, PoolError> {
        if slot_size < mem::size_of::<u32>() {
            return Err(PoolError::SlotTooSmall(slot_size, mem::size_of::<u32>()));
        }
        if slot_count == 0 {
            return Err(PoolError::ZeroSlotCount);
        }

        let mut memory = vec![0u8; slot_size * slot_count].into_boxed_slice();
        init_free_list(&mut memory, slot_size, slot_count);

        Ok(FixedPool {
            memory,
            slot_size,
            slot_count,
            free_head: 0,
            free_count: slot_count,
        })
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn capacity(&self) -> usize {
        self.slot_count
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Takes a slot off the free list, or returns `None` if the pool is
    /// exhausted.
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        if self.free_head == INVALID_INDEX {
            return None;
        }

        let index = self.free_head as usize;
        let slot_ptr = unsafe { self.memory.as_mut_ptr().add(index * self.slot_size) };
        self.free_head = unsafe { read_index(slot_ptr) };
        self.free_count -= 1;

        NonNull::new(slot_ptr)
    }

    /// Returns a slot to the free list.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not point within this pool's backing memory
    /// at a slot boundary — freeing a pointer this pool didn't hand out
    /// is a programming error, per spec.md's "invalid-free" error kind.
    pub fn deallocate(&mut self, ptr: NonNull<u8>) {
        let index = self.slot_index_of(ptr).expect("pointer not owned by this pool");
        let slot_ptr = unsafe { self.memory.as_mut_ptr().add(index * self.slot_size) };
        unsafe {
            write_index(slot_ptr, self.free_head);
        }
        self.free_head = index as u32;
        self.free_count += 1;
    }

    /// Returns whether `ptr` falls within this pool's backing memory at a
    /// slot boundary, used by [`crate::DynamicPool`] to find the owning
    /// pool of a pointer to free.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.slot_index_of(ptr).is_some()
    }

    fn slot_index_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let base = self.memory.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        if addr < base {
            return None;
        }
        let offset = addr - base;
        if offset % self.slot_size != 0 {
            return None;
        }
        let index = offset / self.slot_size;
        (index < self.slot_count).then_some(index)
    }
}

fn init_free_list(memory: &mut [u8], slot_size: usize, slot_count: usize) {
    for i in 0..slot_count {
        let next = if i + 1 == slot_count {
            INVALID_INDEX
        } else {
            (i + 1) as u32
        };
        let slot_ptr = unsafe { memory.as_mut_ptr().add(i * slot_size) };
        unsafe {
            write_index(slot_ptr, next);
        }
    }
}

unsafe fn read_index(slot_ptr: *mut u8) -> u32 {
    (slot_ptr as *const u32).read_unaligned()
}

unsafe fn write_index(slot_ptr: *mut u8, value: u32) {
    (slot_ptr as *mut u32).write_unaligned(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_too_small_is_rejected() {
        assert!(matches!(FixedPool::new(2, 4), Err(PoolError::SlotTooSmall(2, 4))));
    }

    #[test]
    fn fills_up_then_refuses_then_frees() {
        // S6: FixedPool(slot=64, slots=16): allocate 16 -> 17th returns null.
        let mut pool = FixedPool::new(64, 16).unwrap();
        let mut ptrs = Vec::new();
        for _ in 0..16 {
            ptrs.push(pool.allocate().expect("pool should not be exhausted yet"));
        }
        assert!(pool.allocate().is_none());
        assert_eq!(pool.free_count(), 0);

        pool.deallocate(ptrs.pop().unwrap());
        assert_eq!(pool.free_count(), 1);
        assert!(pool.allocate().is_some());
    }

    #[test]
    fn round_trip_restores_initial_state() {
        let mut pool = FixedPool::new(32, 8).unwrap();
        let mut ptrs = Vec::new();
        for _ in 0..8 {
            ptrs.push(pool.allocate().unwrap());
        }
        assert_eq!(pool.free_count(), 0);
        for ptr in ptrs.into_iter().rev() {
            pool.deallocate(ptr);
        }
        assert_eq!(pool.free_count(), 8);
        // the free-list should be walkable again end to end
        let mut count = 0;
        while pool.allocate().is_some() {
            count += 1;
        }
        assert_eq!(count, 8);
    }

    #[test]
    #[should_panic]
    fn freeing_foreign_pointer_panics() {
        let mut pool = FixedPool::new(16, 4).unwrap();
        let other = vec![0u8; 16];
        let foreign = NonNull::new(other.as_ptr() as *mut u8).unwrap();
        pool.deallocate(foreign);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Alloc,
        Free,
    }

    proptest! {
        #[test]
        fn free_count_always_consistent(ops in proptest::collection::vec(prop_oneof![Just(Op::Alloc), Just(Op::Free)], 0..200)) {
            let mut pool = FixedPool::new(16, 32).unwrap();
            let mut live = Vec::new();
            for op in ops {
                match op {
                    Op::Alloc => {
                        if let Some(ptr) = pool.allocate() {
                            live.push(ptr);
                        }
                    }
                    Op::Free => {
                        if let Some(ptr) = live.pop() {
                            pool.deallocate(ptr);
                        }
                    }
                }
                prop_assert_eq!(pool.free_count() + live.len(), pool.capacity());
            }
        }
    }
}
