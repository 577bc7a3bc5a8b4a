//! Epoch-based memory reclamation for lock-free data structures.
//!
//! A lock-free structure unlinks a node with a CAS, but other threads may
//! still be reading the node through pointers they loaded before that CAS.
//! Freeing it right away is a use-after-free waiting to happen. This crate
//! defers the free until every thread that could hold such a pointer has
//! left its critical section.
//!
//! # Protocol
//!
//! - [`pin`] enters a critical section and returns a [`Guard`]. Pointers
//!   loaded through [`Atomic::load`] borrow the guard.
//! - [`retire`] hands an unlinked allocation over for deferred freeing.
//! - Threads periodically try to advance a global epoch; an allocation
//!   retired in epoch `e` is freed once the epoch reaches `e + 2`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::Ordering;
//! use lockfree_epoch::{Atomic, Shared, pin, retire};
//!
//! let atomic = Atomic::new(Box::into_raw(Box::new(42)));
//!
//! let guard = pin();
//! let old = atomic.swap(Shared::null(), Ordering::AcqRel, &guard);
//!
//! // Still readable: the guard keeps it alive.
//! assert_eq!(unsafe { old.as_ref() }, Some(&42));
//!
//! // SAFETY: unlinked above and retired once.
//! unsafe { retire(old.as_raw()) };
//! drop(guard);
//! ```

#![warn(missing_docs)]

extern crate alloc;

mod atomic;
mod guard;
mod retired;
mod slot;
mod ttas;

pub use atomic::{Atomic, Shared};
pub use guard::{Guard, collect, is_pinned, pending, pin, retire};

// Re-export for convenience
pub use core::sync::atomic::Ordering;
