//! Win32 fiber backend, generalized from a pre-existing Windows-only
//! fiber implementation: `ConvertThreadToFiber`/`CreateFiber`/
//! `SwitchToFiber` drive the actual context switch; everything else
//! (the `PREV`/`CURRENT` thread-local bookkeeping) lives in `lib.rs` and
//! is shared with the Unix backend.

use crate::{Fiber, PREV};
use std::mem;
use std::ptr;
use winapi::shared::minwindef::LPVOID;
use winapi::um::winbase::{ConvertThreadToFiber, CreateFiber, SwitchToFiber};

pub type PlatformId = LPVOID;

pub fn init() -> PlatformId {
    let fiber = unsafe { ConvertThreadToFiber(ptr::null_mut()) };
    assert!(!fiber.is_null(), "failed to convert calling thread to a fiber");
    fiber
}

pub fn create_fiber(stack_size: usize, func: fn(Fiber) -> !) -> PlatformId {
    let fiber = unsafe { CreateFiber(stack_size, Some(fiber_proc), func as LPVOID) };
    assert!(!fiber.is_null(), "failed to create fiber");
    fiber
}

/// Makes `to` active on the calling thread. `from`, the fiber currently
/// running, is unused here: `SwitchToFiber` saves the caller's state
/// implicitly, unlike the `ucontext`-based Unix backend which must be
/// told explicitly which context to save into.
pub unsafe fn resume(_from: PlatformId, to: PlatformId) {
    SwitchToFiber(to);
}

/// `data` is a `fn(Fiber) -> !` smuggled through as a `LPVOID`.
unsafe extern "system" fn fiber_proc(data: LPVOID) {
    let func: fn(Fiber) -> ! = mem::transmute(data);
    let prev_fiber = PREV.with(|prev| prev.get().expect("PREV was None in fiber_proc()"));
    func(Fiber(prev_fiber));
}
