/// Errors raised by pool construction.
///
/// Per-allocation exhaustion is *not* an error here — `allocate()` returns
/// `Option<NonNull<u8>>` and callers decide how to react, matching
/// spec.md's "allocator-exhausted is not fatal in the scheduler path"
/// guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("slot size {0} is too small to hold a free-list index (needs at least {1} bytes)")]
    SlotTooSmall(usize, usize),
    #[error("slot count must be greater than zero")]
    ZeroSlotCount,
}
