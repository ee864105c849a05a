//! Spin lock and generational handle table primitives shared by the
//! allocator crates and the job scheduler.
//!
//! Unlike `std::sync::Mutex`, [`SpinLock`] exposes raw `lock_raw` /
//! `unlock_raw` in addition to the usual RAII `lock()`. The job scheduler
//! needs to acquire a counter's lock on one fiber and release it only
//! after switching to a different fiber (the "baton" described in the
//! scheduler's design notes) — a pattern that cannot be expressed with a
//! guard whose `Drop` must run on the same stack that created it.

mod handle;
mod spinlock;

pub use handle::{Handle, HandleManager};
pub use spinlock::{SpinLock, SpinLockGuard};

/// Sentinel used throughout the allocator crates as a free-list
/// terminator and as the "no bit found" result of a bitset scan.
pub const INVALID_INDEX: u32 = 0xFFFF_FFFF;
