//! Atomic pointer types tied to a guard.
//!
//! `Atomic<T>` is a shared location holding a `*mut T`. Everything loaded
//! from it comes back as a `Shared<'g, T>` borrowing the guard, so a
//! loaded pointer cannot outlive the critical section that protects it.

use crate::guard::Guard;
use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// A shared, atomically updated pointer to a heap-allocated `T`.
///
/// # Examples
///
/// ```
/// use lockfree_epoch::{Atomic, pin};
/// use std::sync::atomic::Ordering;
///
/// let atomic = Atomic::new(Box::into_raw(Box::new(7)));
/// let guard = pin();
/// let ptr = atomic.load(Ordering::Acquire, &guard);
/// assert_eq!(unsafe { ptr.as_ref() }, Some(&7));
/// # unsafe { drop(Box::from_raw(ptr.as_raw())) };
/// ```
pub struct Atomic<T> {
    data: AtomicPtr<T>,
}

unsafe impl<T: Send + Sync> Send for Atomic<T> {}
unsafe impl<T: Send + Sync> Sync for Atomic<T> {}

impl<T> Atomic<T> {
    /// Creates a new atomic pointer.
    #[inline]
    pub const fn new(ptr: *mut T) -> Self {
        Self {
            data: AtomicPtr::new(ptr),
        }
    }

    /// Creates a null atomic pointer.
    #[inline]
    pub const fn null() -> Self {
        Self::new(ptr::null_mut())
    }

    /// Loads the pointer; the result is valid for the guard's lifetime.
    #[inline]
    pub fn load<'g>(&self, order: Ordering, _guard: &'g Guard) -> Shared<'g, T> {
        Shared::new(self.data.load(order))
    }

    /// Stores a pointer.
    #[inline]
    pub fn store(&self, new: Shared<'_, T>, order: Ordering) {
        self.data.store(new.data, order);
    }

    /// Stores `new` if the current value equals `current`.
    ///
    /// Returns the previous value on success and the actual value on
    /// failure.
    #[inline]
    pub fn compare_exchange<'g>(
        &self,
        current: Shared<'_, T>,
        new: Shared<'_, T>,
        success: Ordering,
        failure: Ordering,
        _guard: &'g Guard,
    ) -> Result<Shared<'g, T>, Shared<'g, T>> {
        self.data
            .compare_exchange(current.data, new.data, success, failure)
            .map(Shared::new)
            .map_err(Shared::new)
    }

    /// Like [`compare_exchange`](Self::compare_exchange), but may fail
    /// spuriously; meant for retry loops.
    #[inline]
    pub fn compare_exchange_weak<'g>(
        &self,
        current: Shared<'_, T>,
        new: Shared<'_, T>,
        success: Ordering,
        failure: Ordering,
        _guard: &'g Guard,
    ) -> Result<Shared<'g, T>, Shared<'g, T>> {
        self.data
            .compare_exchange_weak(current.data, new.data, success, failure)
            .map(Shared::new)
            .map_err(Shared::new)
    }

    /// Swaps in `new`, returning the previous value.
    #[inline]
    pub fn swap<'g>(&self, new: Shared<'_, T>, order: Ordering, _guard: &'g Guard) -> Shared<'g, T> {
        Shared::new(self.data.swap(new.data, order))
    }

    /// Returns the raw pointer through exclusive access.
    ///
    /// No guard is needed: `&mut self` rules out concurrent writers.
    #[inline]
    pub fn get_mut(&mut self) -> *mut T {
        *self.data.get_mut()
    }
}

impl<T> Default for Atomic<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atomic({:p})", self.data.load(Ordering::Relaxed))
    }
}

/// A pointer loaded under a guard.
///
/// Cheap to copy; compares by address. Dereferencing stays `unsafe`
/// because the guard only keeps the memory alive, it says nothing about
/// the pointer being non-null or pointing at an initialized `T`.
pub struct Shared<'g, T> {
    data: *mut T,
    _marker: PhantomData<(&'g Guard, *mut T)>,
}

impl<'g, T> Shared<'g, T> {
    #[inline]
    const fn new(data: *mut T) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// A null pointer.
    #[inline]
    pub const fn null() -> Self {
        Self::new(ptr::null_mut())
    }

    /// Wraps a raw pointer.
    ///
    /// # Safety
    ///
    /// The pointee must stay valid for `'g`: either it is owned by the
    /// caller, or it was reachable from a shared structure while the
    /// guard was held.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self::new(ptr)
    }

    /// Returns the raw pointer.
    #[inline]
    pub fn as_raw(&self) -> *mut T {
        self.data
    }

    /// Returns true if the pointer is null.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    /// Converts to an optional reference.
    ///
    /// # Safety
    ///
    /// A non-null pointer must point to an initialized `T`.
    #[inline]
    pub unsafe fn as_ref(&self) -> Option<&'g T> {
        // SAFETY: forwarded to the caller
        unsafe { self.data.as_ref() }
    }

    /// Converts to a reference without checking for null.
    ///
    /// # Safety
    ///
    /// The pointer must be non-null and point to an initialized `T`.
    #[inline]
    pub unsafe fn deref(&self) -> &'g T {
        // SAFETY: forwarded to the caller
        unsafe { &*self.data }
    }
}

impl<T> Clone for Shared<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Shared<'_, T> {}

impl<T> PartialEq for Shared<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<T> Eq for Shared<'_, T> {}

impl<T> fmt::Debug for Shared<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared({:p})", self.data)
    }
}
