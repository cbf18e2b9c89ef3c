//! Cache-padded test-and-set spinlock.
//!
//! The order book and the global error registry are mutated from exactly one
//! process, on short critical sections that never cross a syscall. A padded
//! spinlock keeps those sections cheap without dragging in an OS mutex.

use crossbeam::utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// A spinlock protecting `T`, padded to its own cache line.
pub struct Spinlock<T> {
    flag: CachePadded<AtomicBool>,
    value: UnsafeCell<T>,
}

// SAFETY: the flag serializes all access to `value`.
unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    /// Wrap `value` in a new unlocked spinlock.
    pub const fn new(value: T) -> Self {
        Spinlock {
            flag: CachePadded::new(AtomicBool::new(false)),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, spinning with exponential backoff.
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        let backoff = Backoff::new();
        while self.flag.swap(true, Ordering::Acquire) {
            backoff.snooze();
        }
        SpinlockGuard { lock: self }
    }

    /// Try to acquire without spinning.
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        if self.flag.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinlockGuard { lock: self })
        }
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// RAII guard; releases the lock on drop.
pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock exclusively.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn guards_exclusive_access() {
        let lock = Arc::new(Spinlock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), 40_000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = Spinlock::new(());
        let guard = lock.lock();
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
