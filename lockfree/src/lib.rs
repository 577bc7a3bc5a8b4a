//! Lock-free concurrent collections.
//!
//! - [`Queue`]: an unbounded multi-producer multi-consumer FIFO queue
//!   (a linked list with a sentinel node), with non-blocking, blocking and
//!   timed dequeue.
//! - [`Stack`]: an intrusive LIFO stack whose head carries a nonce, so
//!   nodes can be popped and pushed back without exposing other threads
//!   to ABA.
//!
//! Both are built on the retry loop in [`cas`], and neither frees a node
//! while another thread might still read it: unlinked nodes are handed to
//! [`lockfree_epoch`] and freed once every thread that could see them has
//! moved on.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use lockfree::Queue;
//!
//! let queue = Arc::new(Queue::new());
//!
//! let producers: Vec<_> = (0..4)
//!     .map(|p| {
//!         let queue = queue.clone();
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 queue.enqueue(p * 100 + i);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! let mut sum = 0;
//! for _ in 0..400 {
//!     sum += queue.dequeue();
//! }
//! for p in producers {
//!     p.join().unwrap();
//! }
//!
//! assert_eq!(sum, (0..400).sum::<i32>());
//! assert!(queue.is_empty());
//! ```

#![warn(missing_docs)]

pub mod cas;
pub mod error;
mod queue;
mod signal;
mod stack;

pub use error::{Error, Result, TryEnqueueError};
pub use queue::Queue;
pub use stack::{Link, Linked, Owned, Stack};
