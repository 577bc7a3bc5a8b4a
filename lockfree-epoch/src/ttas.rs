//! Test-test-and-set spin lock for the registry's cold paths.
//!
//! Only thread registration, thread exit and orphan adoption take it.
//! Nothing on the pin/load/retire fast path does.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam_utils::Backoff;

pub(crate) struct TTas<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for TTas<T> {}
unsafe impl<T: Send> Sync for TTas<T> {}

impl<T> TTas<T> {
    pub(crate) const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Spin until the lock is acquired.
    ///
    /// Waiters only read the flag while it is held, so the cache line
    /// stays shared until the holder releases it.
    #[inline]
    pub(crate) fn lock(&self) -> TTasGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    #[inline]
    pub(crate) fn try_lock(&self) -> Option<TTasGuard<'_, T>> {
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(TTasGuard { lock: self })
        }
    }
}

pub(crate) struct TTasGuard<'a, T> {
    lock: &'a TTas<T>,
}

impl<T> Deref for TTasGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: holding the guard means holding the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for TTasGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard means holding the lock
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for TTasGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
