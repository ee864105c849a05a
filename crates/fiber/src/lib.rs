//! Stackful, cross-platform fibers: coroutines that must be explicitly
//! resumed by the caller rather than being scheduled automatically by
//! the OS.
//!
//! A fiber has its own stack, and exactly one fiber is active per thread
//! at a time. Suspending a fiber and resuming it later (possibly on a
//! different OS thread) is the primitive a cooperative job scheduler
//! builds its worker loop on top of: a job that blocks on a [`Counter`]
//! suspends its fiber, handing the thread to whatever fiber the
//! scheduler resumes next, instead of blocking the OS thread itself.
//!
//! # Unsafety
//!
//! Resuming a fiber carries stack-owned state across a thread boundary.
//! A `!Send` value alive across a `resume()` call would silently end up
//! visible on another thread, which is why `resume` is `unsafe`: callers
//! are responsible for not resuming while such a value is in scope.

use std::cell::Cell;

#[cfg(unix)]
#[path = "platform/unix.rs"]
mod platform;

#[cfg(windows)]
#[path = "platform/windows.rs"]
mod platform;

use platform::PlatformId;

/// The default stack size used by [`crate::Fiber::new`] callers in
/// `jobsys`, matching `k_fiberStackSize` in the original job system.
pub const DEFAULT_STACK_SIZE: usize = 512 * 1024;

/// A fiber's stable identity, valid even after the fiber has suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(PlatformId);

// `FiberId` wraps a raw handle but is never dereferenced as a pointer
// outside of `platform`, so it's safe to move and share across threads.
unsafe impl Send for FiberId {}
unsafe impl Sync for FiberId {}

/// A fiber with its own stack. Consumed by [`Fiber::resume`]: you either
/// hold a `Fiber` (suspended, not running) or you don't.
#[derive(Debug)]
pub struct Fiber(PlatformId);

unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

thread_local! {
    static PREV: Cell<Option<PlatformId>> = Cell::new(None);
    static CURRENT: Cell<Option<PlatformId>> = Cell::new(None);
}

/// Prepares the calling thread for fiber use, returning the id of the
/// fiber that now represents the thread's original execution context.
///
/// Must be called once per OS thread before any `Fiber::resume()` call
/// on that thread; `Fiber::resume` calls it automatically if needed.
pub fn init() -> FiberId {
    let platform_fiber = platform::init();
    CURRENT.with(|current| current.set(Some(platform_fiber)));
    FiberId(platform_fiber)
}

/// Returns the fiber currently running on this thread, or `None` if
/// [`init`] has not yet been called here.
pub fn current() -> Option<FiberId> {
    CURRENT.with(|current| current.get()).map(FiberId)
}

impl Fiber {
    /// Creates a suspended fiber with `stack_size` bytes of stack that
    /// will begin running `fiber_proc` the first time it is resumed.
    ///
    /// `fiber_proc` must never return: on every platform supported here
    /// returning from a fiber's entry point is undefined behavior, which
    /// is why the signature's return type is `!`.
    pub fn new(stack_size: usize, fiber_proc: fn(Fiber) -> !) -> Fiber {
        Fiber(platform::create_fiber(stack_size, fiber_proc))
    }

    /// Makes this fiber active, suspending the caller's fiber in its
    /// place. Returns once some other fiber resumes the caller again,
    /// yielding the fiber that had been suspended at that point.
    ///
    /// # Safety
    ///
    /// No `!Send` value may be alive across this call: it may resume
    /// execution on a different OS thread than the one it suspended on.
    pub unsafe fn resume(self) -> Fiber {
        if CURRENT.with(|current| current.get()).is_none() {
            init();
        }

        let prev_handle = CURRENT.with(|current| {
            let prev = current.get();
            current.set(Some(self.0));
            prev
        });
        PREV.with(|prev| prev.set(prev_handle));

        let from = prev_handle.expect("CURRENT was None after init()");
        platform::resume(from, self.0);

        let prev_fiber = PREV.with(|prev| prev.get().expect("PREV was None after resuming"));
        Fiber(prev_fiber)
    }

    /// Returns this fiber's stable identity.
    pub fn id(&self) -> FiberId {
        FiberId(self.0)
    }
}
