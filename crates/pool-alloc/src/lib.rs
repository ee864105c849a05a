//! Fixed-size slot allocators.
//!
//! Grounded on `VEngine2/src/utility/PoolAllocator.{h,cpp}`: each pool is
//! a flat array of equally-sized slots with a singly-linked free list
//! threaded *through the free slots themselves* — a free slot's first
//! `size_of::<u32>()` bytes hold the index of the next free slot, and the
//! list terminates at [`spin_handle::INVALID_INDEX`]. [`DynamicPool`]
//! chains multiple [`FixedPool`]s, growing by 1.5x when all existing
//! pools are full.
//!
//! Neither allocator is internally synchronized; callers sharing a pool
//! across threads must provide their own locking (see `spin-handle`).

mod dynamic;
mod error;
mod fixed;

pub use dynamic::DynamicPool;
pub use error::PoolError;
pub use fixed::FixedPool;
