//! Retirement records kept until their epoch is safe to reclaim.

use alloc::boxed::Box;
use alloc::vec::Vec;

/// Type-erased destructor function
pub(crate) type DestructorFn = unsafe fn(*mut ());

/// A pointer waiting for reclamation.
///
/// `epoch` is the global epoch observed right after the pointer was
/// unlinked. Once the global epoch has moved two steps past it, no
/// guard that could have loaded the pointer is still alive.
pub(crate) struct Retired {
    ptr: *mut (),
    destructor: DestructorFn,
    pub(crate) epoch: u64,
}

// SAFETY: the retiring thread gave up all access to `ptr`; whichever
// thread reclaims it is the only one touching it afterwards.
unsafe impl Send for Retired {}

impl Retired {
    /// Records `ptr` as a `Box<T>` allocation retired at `epoch`.
    pub(crate) fn new<T>(ptr: *mut T, epoch: u64) -> Self {
        unsafe fn destructor<T>(ptr: *mut ()) {
            // SAFETY: `ptr` came from `Box::into_raw` of a `Box<T>`
            unsafe {
                drop(Box::from_raw(ptr as *mut T));
            }
        }

        Self {
            ptr: ptr as *mut (),
            destructor: destructor::<T>,
            epoch,
        }
    }

    /// Whether the global epoch `current` has moved far enough past
    /// this record for it to be freed.
    #[inline]
    pub(crate) fn is_expired(&self, current: u64) -> bool {
        current >= self.epoch.wrapping_add(2)
    }

    /// Run the destructor.
    ///
    /// # Safety
    ///
    /// No thread may still hold a reference to the pointee.
    pub(crate) unsafe fn reclaim(self) {
        // SAFETY: forwarded to the caller
        unsafe { (self.destructor)(self.ptr) }
    }
}

/// Moves every expired record out of `bag`, keeping the rest.
///
/// The caller reclaims the returned records once it no longer borrows
/// `bag`, so a destructor that retires again finds the bag available.
pub(crate) fn take_expired(bag: &mut Vec<Retired>, current: u64) -> Vec<Retired> {
    let mut ready = Vec::new();
    let mut i = 0;
    while i < bag.len() {
        if bag[i].is_expired(current) {
            ready.push(bag.swap_remove(i));
        } else {
            i += 1;
        }
    }
    ready
}

/// Runs the destructor of every record in `ready`.
///
/// # Safety
///
/// Every record must be expired with respect to the current global epoch.
pub(crate) unsafe fn reclaim_all(ready: Vec<Retired>) -> usize {
    let freed = ready.len();
    for retired in ready {
        // SAFETY: forwarded to the caller
        unsafe { retired.reclaim() };
    }
    freed
}
