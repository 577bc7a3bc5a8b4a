//! Read, transform, compare-and-swap, retry.
//!
//! Every update in this crate has the same shape: load the current state,
//! compute a successor from it, publish the successor with a CAS, and start
//! over from whatever value beat us if the CAS fails. [`try_update`] is
//! that loop, written once; [`CasCell`] is the location it runs against.

use crossbeam_utils::Backoff;
use lockfree_epoch::{Atomic, Guard, Shared};
use std::sync::atomic::Ordering;

/// A location that can be read and conditionally replaced as a whole.
pub trait CasCell {
    /// The value held by the cell. Compared by value on commit.
    type State: Copy;

    /// Loads the current state.
    fn current(&self) -> Self::State;

    /// Replaces `current` with `new` if the cell still holds `current`.
    ///
    /// On failure returns the state actually found. May fail spuriously.
    fn commit(&self, current: Self::State, new: Self::State) -> Result<(), Self::State>;
}

/// Apply `transition` to the cell until a commit succeeds.
///
/// `transition` sees the latest observed state and returns the state to
/// install, or `None` to give up without writing. It may run several
/// times, once per attempt, so any side effect it has must be safe to
/// repeat.
///
/// Returns the state that was replaced, or `None` if `transition`
/// declined.
///
/// # Examples
///
/// ```
/// use lockfree::cas::{CasCell, try_update};
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// struct Counter(AtomicU64);
///
/// impl CasCell for Counter {
///     type State = u64;
///     fn current(&self) -> u64 {
///         self.0.load(Ordering::Acquire)
///     }
///     fn commit(&self, current: u64, new: u64) -> Result<(), u64> {
///         self.0
///             .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
///             .map(drop)
///     }
/// }
///
/// let counter = Counter(AtomicU64::new(9));
/// assert_eq!(try_update(&counter, |n| n.checked_add(1)), Some(9));
/// assert_eq!(try_update(&counter, |n| (n < 10).then_some(0)), None);
/// assert_eq!(counter.current(), 10);
/// ```
pub fn try_update<C, F>(cell: &C, mut transition: F) -> Option<C::State>
where
    C: CasCell + ?Sized,
    F: FnMut(C::State) -> Option<C::State>,
{
    let backoff = Backoff::new();
    let mut current = cell.current();
    loop {
        let new = transition(current)?;
        match cell.commit(current, new) {
            Ok(()) => return Some(current),
            Err(actual) => {
                current = actual;
                backoff.spin();
            }
        }
    }
}

/// An [`Atomic`] viewed as a [`CasCell`] for the lifetime of a guard.
pub struct Protected<'a, 'g, T> {
    atomic: &'a Atomic<T>,
    guard: &'g Guard,
}

impl<'a, 'g, T> Protected<'a, 'g, T> {
    /// Borrow `atomic` for updates under `guard`.
    pub fn new(atomic: &'a Atomic<T>, guard: &'g Guard) -> Self {
        Self { atomic, guard }
    }
}

impl<'g, T> CasCell for Protected<'_, 'g, T> {
    type State = Shared<'g, T>;

    #[inline]
    fn current(&self) -> Shared<'g, T> {
        self.atomic.load(Ordering::Acquire, self.guard)
    }

    #[inline]
    fn commit(&self, current: Shared<'g, T>, new: Shared<'g, T>) -> Result<(), Shared<'g, T>> {
        self.atomic
            .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire, self.guard)
            .map(drop)
    }
}
