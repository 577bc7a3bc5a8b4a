//! Guard and Handle for critical section management.
//!
//! - Pin: the outermost `pin()` on a thread announces the global epoch in
//!   the thread's slot; nested pins share that announcement.
//! - Retire: pointers go into a thread-local bag tagged with the epoch
//!   they were retired in.
//! - Collect: every [`COLLECT_FREQ`] retirements the thread tries to
//!   advance the global epoch and frees everything two epochs old.

use crate::retired::{self, Retired};
use crate::slot::{self, COLLECT_FREQ, Registry};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::marker::PhantomData as marker;

/// RAII guard representing an active critical section.
///
/// While a Guard exists, the thread's slot announces an epoch, which
/// keeps every pointer loaded through [`Atomic::load`](crate::Atomic::load)
/// from being reclaimed. Guards are not `Send`: the announcement belongs
/// to the thread that pinned.
pub struct Guard {
    _private: (),
    marker: marker<*mut ()>,
}

impl Guard {
    /// Try to advance the epoch and free expired retirements now.
    ///
    /// Equivalent to [`collect`]; handy when a guard is already in hand.
    pub fn flush(&self) -> usize {
        collect()
    }
}

impl Drop for Guard {
    #[inline]
    fn drop(&mut self) {
        let _ = HANDLE.try_with(|handle| handle.unpin());
    }
}

impl core::fmt::Debug for Guard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad("Guard { .. }")
    }
}

/// Thread-local reclamation state.
struct Handle {
    /// Thread slot (lazily allocated)
    tid: Cell<Option<usize>>,
    /// Number of live Guard instances on this thread
    pin_count: Cell<usize>,
    /// Retirements not yet known to be safe
    bag: RefCell<Vec<Retired>>,
    /// Retirements since the last collection attempt
    since_collect: Cell<usize>,
}

impl Handle {
    const fn new() -> Self {
        Self {
            tid: Cell::new(None),
            pin_count: Cell::new(0),
            bag: RefCell::new(Vec::new()),
            since_collect: Cell::new(0),
        }
    }

    #[inline]
    fn registry(&self) -> &'static Registry {
        slot::global()
    }

    #[inline]
    fn tid(&self) -> usize {
        match self.tid.get() {
            Some(tid) => tid,
            None => {
                let tid = self.registry().alloc_tid();
                self.tid.set(Some(tid));
                tid
            }
        }
    }

    fn pin(&self) -> Guard {
        let count = self.pin_count.get();
        if count == 0 {
            let tid = self.tid();
            self.registry().announce(tid);
        }
        self.pin_count.set(count + 1);
        Guard {
            _private: (),
            marker,
        }
    }

    fn unpin(&self) {
        let count = self.pin_count.get();
        debug_assert!(count > 0, "Guard dropped with pin_count == 0");
        self.pin_count.set(count - 1);
        if count == 1 {
            if let Some(tid) = self.tid.get() {
                self.registry().deactivate(tid);
            }
        }
    }

    fn is_pinned(&self) -> bool {
        self.pin_count.get() > 0
    }

    fn retire(&self, retired: Retired) {
        self.bag.borrow_mut().push(retired);

        let since = self.since_collect.get() + 1;
        if since >= COLLECT_FREQ {
            self.since_collect.set(0);
            self.collect();
        } else {
            self.since_collect.set(since);
        }
    }

    fn collect(&self) -> usize {
        let registry = self.registry();
        let epoch = registry.try_advance();

        let orphans = registry.adopt_orphans();
        let ready = {
            let mut bag = self.bag.borrow_mut();
            bag.extend(orphans);
            retired::take_expired(&mut bag, epoch)
        };

        // SAFETY: everything in `ready` expired against `epoch`
        let freed = unsafe { retired::reclaim_all(ready) };
        if freed > 0 {
            tracing::trace!(
                freed,
                pending = self.bag.borrow().len(),
                epoch,
                "reclaimed retired nodes"
            );
        }
        freed
    }

    fn pending(&self) -> usize {
        self.bag.borrow().len()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(tid) = self.tid.take() {
            let registry = self.registry();
            registry.deactivate(tid);

            let epoch = registry.try_advance();
            let mut bag = core::mem::take(self.bag.get_mut());
            let ready = retired::take_expired(&mut bag, epoch);
            // SAFETY: everything in `ready` expired against `epoch`
            unsafe { retired::reclaim_all(ready) };

            registry.push_orphans(bag);
            registry.free_tid(tid);
        }
    }
}

std::thread_local! {
    static HANDLE: Handle = const { Handle::new() };
}

/// Enter a critical section.
///
/// Returns a `Guard` that represents the active critical section.
/// While the guard exists, any `Shared<'g, T>` pointers loaded are
/// guaranteed to remain valid.
///
/// # Panics
///
/// Panics if more than 128 threads use the reclamation layer at once,
/// or if called while the thread-local state is being torn down.
#[inline]
pub fn pin() -> Guard {
    HANDLE.with(|handle| handle.pin())
}

/// Whether the calling thread currently holds a guard.
#[inline]
pub fn is_pinned() -> bool {
    HANDLE.try_with(|handle| handle.is_pinned()).unwrap_or(false)
}

/// Retire a heap allocation for deferred reclamation.
///
/// The allocation is dropped as a `Box<T>` once every guard that was
/// alive at retirement time has been dropped. The destructor may run
/// on any thread.
///
/// # Safety
///
/// - `ptr` must come from `Box::into_raw` of a `Box<T>`.
/// - `ptr` must already be unreachable for threads that pin after
///   this call (unlinked from every shared structure).
/// - `ptr` must not be retired more than once.
/// - Dropping a `T` on another thread must be sound.
#[inline]
pub unsafe fn retire<T: 'static>(ptr: *mut T) {
    let registry = slot::global();
    let mut retired = Some(Retired::new(ptr, registry.epoch()));
    let _ = HANDLE.try_with(|handle| {
        if let Some(retired) = retired.take() {
            handle.retire(retired);
        }
    });
    // Thread-local state is gone (thread teardown); let survivors free it.
    if let Some(retired) = retired {
        registry.push_orphans(alloc::vec![retired]);
    }
}

/// Try to advance the global epoch and free this thread's expired
/// retirements, adopting retirements orphaned by exited threads.
///
/// Returns the number of allocations freed. Nodes are never freed while
/// a guard that could observe them is alive, so this is always safe to
/// call, pinned or not.
pub fn collect() -> usize {
    HANDLE.try_with(|handle| handle.collect()).unwrap_or(0)
}

/// Number of retirements this thread is still holding.
pub fn pending() -> usize {
    HANDLE.try_with(|handle| handle.pending()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_pins_share_one_announcement() {
        let outer = pin();
        let tid = HANDLE.with(|h| h.tid.get()).unwrap();
        let announced = slot::global().announced(tid);

        {
            let _inner = pin();
            assert_eq!(slot::global().announced(tid), announced);
        }

        assert!(is_pinned());
        assert_eq!(slot::global().announced(tid), announced);
        drop(outer);
        assert!(!is_pinned());
        assert_eq!(slot::global().announced(tid), slot::INACTIVE);
    }

    #[test]
    fn pinned_thread_holds_epoch_back() {
        let guard = pin();
        let tid = HANDLE.with(|h| h.tid.get()).unwrap();
        let announced = slot::global().announced(tid);

        for _ in 0..32 {
            guard.flush();
        }
        assert!(slot::global().epoch() <= announced + 1);
    }
}
