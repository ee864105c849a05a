//! A fiber-based cooperative job scheduler, with TLSF, pool, and stack
//! allocators for the memory-management side of the same workload.
//!
//! This crate is a thin facade: each piece lives in its own workspace
//! member and can be used independently. `vjob::jobsys` re-exports the
//! scheduler; the allocators are re-exported directly since most callers
//! only need one of them at a time.

pub use fiber;
pub use jobsys;
pub use pool_alloc;
pub use spin_handle;
pub use stack_alloc;
pub use tlsf;
