use std::ptr::NonNull;

use fiber::Fiber;
use spin_handle::SpinLock;

/// A fiber parked in [`crate::wait_for_counter`], along with the thread
/// it should be resumed on (`None` means "any worker thread").
struct Waiter {
    fiber: Fiber,
    resume_thread: Option<usize>,
}

struct CounterState {
    pending: u32,
    waiters: Vec<Waiter>,
}

/// A job-completion counter: created with an initial pending count, it
/// reaches zero as the jobs it was attached to finish, at which point
/// every fiber parked on it via [`crate::wait_for_counter`] becomes
/// resumable again.
///
/// The lock guarding `CounterState` is released with
/// [`SpinLock::unlock_raw`], not the RAII guard — see the module docs on
/// "the baton" in `lib.rs` for why.
pub struct Counter {
    state: SpinLock<CounterState>,
}

impl Counter {
    fn new(pending: u32) -> Counter {
        Counter {
            state: SpinLock::new(CounterState {
                pending,
                waiters: Vec::new(),
            }),
        }
    }

    /// Locks the counter and increments its pending count by `count`.
    pub(crate) fn add_pending(&self, count: u32) {
        self.state.lock_raw();
        unsafe { self.state.data_mut() }.pending += count;
        unsafe { self.state.unlock_raw() };
    }

    /// Decrements the pending count by one. If it reaches zero, drains
    /// and returns every parked waiter (to be resumed by the caller);
    /// otherwise returns an empty vector.
    ///
    /// Matches `JobSystem.cpp`'s decrement-then-drain-under-lock, copy
    /// the waiter set, unlock, then resume outside the lock ordering
    /// (touching the counter after the resumes begin is unsafe: a woken
    /// fiber may immediately call [`crate::free_counter`]).
    pub(crate) fn decrement_and_drain(&self) -> Vec<(Fiber, Option<usize>)> {
        self.state.lock_raw();
        let state = unsafe { self.state.data_mut() };
        state.pending -= 1;

        if state.pending == 0 {
            let waiters = std::mem::take(&mut state.waiters);
            unsafe { self.state.unlock_raw() };
            waiters.into_iter().map(|w| (w.fiber, w.resume_thread)).collect()
        } else {
            unsafe { self.state.unlock_raw() };
            Vec::new()
        }
    }

    /// Locks the counter, returning whether it's already at zero. If
    /// not, the lock is left held (by the caller's own fiber/thread) for
    /// the caller to park a waiter and hand the unlock off via baton.
    pub(crate) fn lock_and_check_done(&self) -> bool {
        self.state.lock_raw();
        let done = unsafe { self.state.data_mut() }.pending == 0;
        if done {
            unsafe { self.state.unlock_raw() };
        }
        done
    }

    /// Parks `fiber` as a waiter. The counter's lock must already be
    /// held by the calling thread (via [`Counter::lock_and_check_done`]
    /// returning `false`); this does not unlock it.
    pub(crate) fn park_waiter(&self, fiber: Fiber, resume_thread: Option<usize>) {
        unsafe { self.state.data_mut() }
            .waiters
            .push(Waiter { fiber, resume_thread });
    }

    /// Releases the counter's lock. Called by the fiber that was resumed
    /// in place of a waiting fiber, once it has parked that fiber.
    pub(crate) unsafe fn unlock(&self) {
        self.state.unlock_raw();
    }

    fn is_idle(&self) -> bool {
        self.state.lock_raw();
        let state = unsafe { self.state.data_mut() };
        let idle = state.pending == 0 && state.waiters.is_empty();
        unsafe { self.state.unlock_raw() };
        idle
    }

    /// Resets a recycled counter's pending count. Only valid on a
    /// counter already known idle (enforced by the caller, which only
    /// ever calls this on a handle just popped from the free-counter
    /// queue).
    fn reset_pending(&self, pending: u32) {
        self.state.lock_raw();
        unsafe { self.state.data_mut() }.pending = pending;
        unsafe { self.state.unlock_raw() };
    }
}

/// An opaque, `Copy`able reference to a heap-allocated [`Counter`].
///
/// Counters are allocated (or recycled from a free-list) by
/// [`crate::run`] and must be returned with [`crate::free_counter`] once
/// the caller is done waiting on them — there is no automatic reclamation,
/// matching `freeCounter()` in the original job system.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterHandle(NonNull<Counter>);

unsafe impl Send for CounterHandle {}
unsafe impl Sync for CounterHandle {}

impl CounterHandle {
    pub(crate) fn allocate(pending: u32) -> CounterHandle {
        let boxed = Box::new(Counter::new(pending));
        CounterHandle(NonNull::new(Box::into_raw(boxed)).unwrap())
    }

    pub(crate) fn add_pending(&self, count: u32) {
        unsafe { self.0.as_ref() }.add_pending(count);
    }

    pub(crate) fn decrement_and_drain(&self) -> Vec<(Fiber, Option<usize>)> {
        unsafe { self.0.as_ref() }.decrement_and_drain()
    }

    pub(crate) fn lock_and_check_done(&self) -> bool {
        unsafe { self.0.as_ref() }.lock_and_check_done()
    }

    pub(crate) fn park_waiter(&self, fiber: Fiber, resume_thread: Option<usize>) {
        unsafe { self.0.as_ref() }.park_waiter(fiber, resume_thread);
    }

    pub(crate) unsafe fn unlock(&self) {
        self.0.as_ref().unlock();
    }

    pub(crate) fn reset_pending(&self, pending: u32) {
        unsafe { self.0.as_ref() }.reset_pending(pending);
    }

    /// Panics if the counter still has pending jobs or parked waiters:
    /// freeing a counter that's still in use is a programming error.
    pub(crate) fn assert_idle(self) {
        assert!(
            unsafe { self.0.as_ref() }.is_idle(),
            "freed a counter that still has pending jobs or waiters"
        );
    }

    /// Reconstructs and drops the heap-allocated [`Counter`] behind this
    /// handle. Only valid for handles popped off the free-counter queue
    /// at shutdown, once nothing else can reach them through a live
    /// `CounterHandle` — matches the original's `delete counter` sweep
    /// over its free-counter queue.
    pub(crate) unsafe fn destroy(self) {
        drop(Box::from_raw(self.0.as_ptr()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaches_idle_after_matching_decrements() {
        let counter = Counter::new(3);
        assert!(counter.decrement_and_drain().is_empty());
        assert!(counter.decrement_and_drain().is_empty());
        assert!(counter.decrement_and_drain().is_empty());
        assert!(counter.is_idle());
    }

    #[test]
    fn add_pending_extends_before_drain() {
        let counter = Counter::new(1);
        counter.add_pending(2);
        assert!(counter.decrement_and_drain().is_empty());
        assert!(counter.decrement_and_drain().is_empty());
        assert!(!counter.is_idle());
        assert!(counter.decrement_and_drain().is_empty());
        assert!(counter.is_idle());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn never_reports_idle_before_every_decrement_lands(
            initial in 1u32..20,
            extra_adds in proptest::collection::vec(0u32..5, 0..10),
        ) {
            let counter = Counter::new(initial);
            for add in &extra_adds {
                counter.add_pending(*add);
            }

            let total: u32 = initial + extra_adds.iter().sum::<u32>();
            for i in 0..total {
                let drained = counter.decrement_and_drain();
                if i + 1 < total {
                    prop_assert!(!counter.is_idle());
                    prop_assert!(drained.is_empty());
                } else {
                    prop_assert!(counter.is_idle());
                }
            }
        }
    }
}
