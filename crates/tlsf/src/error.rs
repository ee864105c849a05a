/// Errors raised by `Tlsf` construction.
///
/// Allocation failure itself is not an error type: [`crate::Tlsf::alloc`]
/// returns `Option<(u32, Handle)>`, matching spec.md §7's guidance that
/// allocator exhaustion is an ordinary return value, not an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TlsfError {
    #[error("memory_size must be greater than zero")]
    ZeroMemorySize,
    #[error("page_size must be a power of two")]
    PageSizeNotPowerOfTwo,
    #[error("memory_size ({0}) must be a multiple of page_size ({1})")]
    MemorySizeNotPageAligned(u32, u32),
}
