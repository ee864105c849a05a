//! `ucontext`-based fiber backend for POSIX platforms.
//!
//! Each fiber owns a `ucontext_t` plus (for fibers created by
//! [`create_fiber`]) a guard-paged stack allocated with `mmap`/`mprotect`.
//! The guard-page-below-the-stack layout is the same shape used by
//! production stackful-coroutine implementations (e.g. wasmtime's fiber
//! crate), though the switch mechanism here is `swapcontext` rather than
//! hand-written assembly.

use crate::{Fiber, PREV};
use std::cell::Cell;
use std::mem::MaybeUninit;
use std::ptr;

pub type PlatformId = *mut FiberData;

pub struct FiberData {
    context: libc::ucontext_t,
    stack: Option<Stack>,
    func: Cell<Option<fn(Fiber) -> !>>,
}

/// An mmap'd stack with a `PROT_NONE` guard page immediately below it.
struct Stack {
    base: *mut libc::c_void,
    mmap_len: usize,
}

impl Stack {
    fn new(size: usize) -> Stack {
        let page_size = page_size();
        let size = align_up(size.max(page_size), page_size);
        let mmap_len = size + page_size;

        unsafe {
            let base = libc::mmap(
                ptr::null_mut(),
                mmap_len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            assert_ne!(base, libc::MAP_FAILED, "mmap failed to reserve fiber stack");

            let usable = (base as *mut u8).add(page_size);
            let rc = libc::mprotect(usable.cast(), size, libc::PROT_READ | libc::PROT_WRITE);
            assert_eq!(rc, 0, "mprotect failed to make fiber stack usable");

            Stack { base, mmap_len }
        }
    }

    /// Top of the usable (non-guard) region, for `uc_stack.ss_sp`.
    fn usable_base(&self) -> *mut libc::c_void {
        unsafe { (self.base as *mut u8).add(page_size()) as *mut libc::c_void }
    }

    fn usable_len(&self) -> usize {
        self.mmap_len - page_size()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            let rc = libc::munmap(self.base, self.mmap_len);
            debug_assert_eq!(rc, 0, "munmap failed while dropping fiber stack");
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

thread_local! {
    /// Points at the `FiberData` a fresh `ucontext` is about to start
    /// running, so `trampoline` (which `makecontext` invokes with no
    /// arguments) can recover which fiber it is.
    static STARTING: Cell<PlatformId> = Cell::new(ptr::null_mut());
}

pub fn init() -> PlatformId {
    let mut data = Box::new(FiberData {
        context: unsafe { MaybeUninit::zeroed().assume_init() },
        stack: None,
        func: Cell::new(None),
    });
    let rc = unsafe { libc::getcontext(&mut data.context) };
    assert_eq!(rc, 0, "getcontext failed while initializing the current thread as a fiber");
    Box::into_raw(data)
}

pub fn create_fiber(stack_size: usize, func: fn(Fiber) -> !) -> PlatformId {
    let stack = Stack::new(stack_size);

    let mut data = Box::new(FiberData {
        context: unsafe { MaybeUninit::zeroed().assume_init() },
        stack: None,
        func: Cell::new(Some(func)),
    });

    unsafe {
        let rc = libc::getcontext(&mut data.context);
        assert_eq!(rc, 0, "getcontext failed while preparing a new fiber");

        data.context.uc_stack.ss_sp = stack.usable_base();
        data.context.uc_stack.ss_size = stack.usable_len();
        data.context.uc_link = ptr::null_mut();

        libc::makecontext(&mut data.context, trampoline, 0);
    }

    data.stack = Some(stack);
    Box::into_raw(data)
}

/// Switches the calling thread from `from`'s context to `to`'s,
/// returning once some other fiber switches back into `from`.
pub unsafe fn resume(from: PlatformId, to: PlatformId) {
    STARTING.with(|starting| starting.set(to));
    let rc = libc::swapcontext(&mut (*from).context, &(*to).context);
    assert_eq!(rc, 0, "swapcontext failed");
}

/// Entered directly by a freshly-`makecontext`'d fiber the first time it
/// is resumed. Never returns: the fiber procedure itself never returns,
/// and re-entering `trampoline` from a suspended fiber never happens
/// because `swapcontext` resumes straight into the fiber's own saved
/// stack, not back into `trampoline`.
extern "C" fn trampoline() {
    let data = STARTING.with(|starting| starting.get());
    let func = unsafe { (*data).func.take() }.expect("fiber trampoline entered twice");
    let prev_fiber = PREV.with(|prev| prev.get().expect("PREV was None in fiber trampoline"));
    func(Fiber(prev_fiber));
}
