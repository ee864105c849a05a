use std::ptr::NonNull;

use crate::{FixedPool, PoolError};

/// A pool that grows by chaining additional [`FixedPool`]s instead of
/// failing when full.
///
/// Grounded on `DynamicPoolAllocator` in `PoolAllocator.cpp`: allocation
/// walks the chain for a pool with free slots; on exhaustion it appends a
/// new pool sized at `1.5x` the previous pool's capacity. Freeing is
/// O(#pools) — it linearly searches for the pool that owns the pointer.
pub struct DynamicPool {
    slot_size: usize,
    next_capacity: usize,
    pools: Vec<FixedPool>,
}

impl DynamicPool {
    /// Creates an empty chain; the first pool (of `initial_count` slots)
    /// is created lazily on the first `allocate()`.
    pub fn new(slot_size: usize, initial_count: usize) -> Result<Self, PoolError> {
        if initial_count == 0 {
            return Err(PoolError::ZeroSlotCount);
        }
        // Validate slot_size up front so construction fails fast instead
        // of on first allocate().
        FixedPool::new(slot_size, 1)?;

        Ok(DynamicPool {
            slot_size,
            next_capacity: initial_count,
            pools: Vec::new(),
        })
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn free_count(&self) -> usize {
        self.pools.iter().map(FixedPool::free_count).sum()
    }

    pub fn capacity(&self) -> usize {
        self.pools.iter().map(FixedPool::capacity).sum()
    }

    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        for pool in &mut self.pools {
            if let Some(ptr) = pool.allocate() {
                return Some(ptr);
            }
        }

        // every existing pool (if any) is full: grow.
        let capacity = self.next_capacity;
        self.next_capacity = capacity + capacity / 2;
        log::debug!(
            "dynamic pool of {}-byte slots growing by a new {capacity}-slot pool ({} pools total)",
            self.slot_size,
            self.pools.len() + 1,
        );
        let mut new_pool = FixedPool::new(self.slot_size, capacity)
            .expect("slot_size was validated at construction");
        let ptr = new_pool.allocate();
        self.pools.push(new_pool);
        ptr
    }

    /// Returns a slot to the pool that owns it.
    ///
    /// # Panics
    ///
    /// Panics if no pool in the chain owns `ptr` — an invalid-free, per
    /// spec.md's error taxonomy.
    pub fn deallocate(&mut self, ptr: NonNull<u8>) {
        for pool in &mut self.pools {
            if pool.owns(ptr) {
                pool.deallocate(ptr);
                return;
            }
        }
        panic!("pointer not owned by any pool in this chain");
    }

    /// Unlinks and frees every pool that is entirely empty.
    pub fn clear_empty_pools(&mut self) {
        self.pools.retain(|pool| pool.free_count() != pool.capacity());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_instead_of_failing() {
        let mut pool = DynamicPool::new(32, 4).unwrap();
        let mut ptrs = Vec::new();
        for _ in 0..10 {
            ptrs.push(pool.allocate().expect("dynamic pool should always succeed"));
        }
        assert_eq!(pool.pool_count(), 2, "4 slots then 1.5x growth to 6 slots covers 10 allocations");
    }

    #[test]
    fn free_searches_across_pools() {
        let mut pool = DynamicPool::new(16, 2).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap(); // forces growth into a 2nd pool
        assert_eq!(pool.pool_count(), 2);

        pool.deallocate(a);
        pool.deallocate(b);
        pool.deallocate(c);
        assert_eq!(pool.free_count(), pool.capacity());
    }

    #[test]
    fn clear_empty_pools_drops_unused_chains() {
        let mut pool = DynamicPool::new(8, 2).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        pool.deallocate(a);
        pool.deallocate(b);
        // first pool now fully empty, second pool still has one live slot
        pool.clear_empty_pools();
        assert_eq!(pool.pool_count(), 1);
        pool.deallocate(c);
    }

    #[test]
    #[should_panic]
    fn freeing_unowned_pointer_panics() {
        let mut pool = DynamicPool::new(16, 4).unwrap();
        let other = vec![0u8; 16];
        let foreign = NonNull::new(other.as_ptr() as *mut u8).unwrap();
        pool.deallocate(foreign);
    }
}
