use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// A simple test-and-test-and-set spin lock.
///
/// Spin locks are appropriate here because the critical sections they
/// guard (a counter decrement, a waiter-set mutation) are a handful of
/// instructions long and must never park the OS thread — a parked thread
/// can't be resumed by a cooperative fiber switch the way a spinning one
/// can.
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Spins until the lock is acquired, without returning a guard.
    ///
    /// Paired with [`SpinLock::unlock_raw`]. Used when the lock must be
    /// released by a different fiber than the one that acquired it (the
    /// scheduler's `old_lock_to_release` baton); a scoped guard can't
    /// model that since its `Drop` would run on the wrong stack.
    pub fn lock_raw(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    /// Releases a lock previously acquired with [`SpinLock::lock_raw`].
    ///
    /// # Safety
    ///
    /// The caller must guarantee that this spin lock is currently held
    /// and that no other code will release it concurrently.
    pub unsafe fn unlock_raw(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Returns a mutable reference to the protected data.
    ///
    /// # Safety
    ///
    /// The caller must hold the lock (via [`SpinLock::lock_raw`]) for the
    /// entire lifetime of the returned reference.
    pub unsafe fn data_mut(&self) -> &mut T {
        &mut *self.data.get()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Acquires the lock and returns an RAII guard that releases it on drop.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock_raw();
        SpinLockGuard { lock: self }
    }

    /// Attempts to acquire the lock without spinning.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        unsafe {
            self.lock.unlock_raw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn guarded_access_is_mutually_exclusive() {
        let lock = Arc::new(SpinLock::new(0usize));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }

    #[test]
    fn raw_lock_unlock_round_trips() {
        let lock = SpinLock::new(42);
        lock.lock_raw();
        unsafe {
            *lock.data_mut() += 1;
        }
        assert!(lock.is_locked());
        unsafe {
            lock.unlock_raw();
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 43);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
