//! Unbounded multi-producer multi-consumer FIFO queue.
//!
//! A singly linked list with a sentinel at the front. `head` points at
//! the sentinel, whose successor holds the oldest value; `tail` points at
//! or shortly before the last node. Producers link at the back with a CAS
//! on the last node's `next`, consumers advance `head` with a CAS. A
//! lagging `tail` is swung forward by whichever thread notices it.

use std::alloc::{self, Layout};
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crossbeam_utils::{Backoff, CachePadded};
use lockfree_epoch::{Atomic, Guard, Shared, pin, retire};

use crate::cas::{self, Protected};
use crate::error::{Error, Result, TryEnqueueError};
use crate::signal::Waiters;

struct Node<T> {
    /// Uninitialized in the sentinel; moved out by the dequeuer that
    /// turns this node into the sentinel.
    value: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> *mut Self {
        Box::into_raw(Box::new(Self {
            value: MaybeUninit::uninit(),
            next: Atomic::null(),
        }))
    }

    fn new(value: T) -> *mut Self {
        Box::into_raw(Box::new(Self {
            value: MaybeUninit::new(value),
            next: Atomic::null(),
        }))
    }

    /// Allocate without aborting on out-of-memory.
    fn try_new(value: T) -> std::result::Result<*mut Self, T> {
        let layout = Layout::new::<Self>();
        // SAFETY: `Node` always has a non-zero size (it holds a pointer)
        let ptr = unsafe { alloc::alloc(layout) } as *mut Self;
        if ptr.is_null() {
            return Err(value);
        }
        // SAFETY: freshly allocated with the layout of `Self`, so
        // `Box::from_raw` may later free it
        unsafe {
            ptr.write(Self {
                value: MaybeUninit::new(value),
                next: Atomic::null(),
            });
        }
        Ok(ptr)
    }
}

/// An unbounded lock-free MPMC FIFO queue.
///
/// Share it between threads with `Arc`. Every operation takes `&self`.
///
/// # Examples
///
/// ```
/// use lockfree::Queue;
///
/// let queue = Queue::new();
/// queue.enqueue(1);
/// queue.enqueue(2);
/// assert_eq!(queue.try_dequeue(), Some(1));
/// assert_eq!(queue.dequeue(), 2);
/// assert_eq!(queue.try_dequeue(), None);
/// ```
pub struct Queue<T: 'static> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
    waiters: Waiters,
}

unsafe impl<T: Send + 'static> Send for Queue<T> {}
unsafe impl<T: Send + 'static> Sync for Queue<T> {}

impl<T: 'static> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Queue<T> {
    /// Creates an empty queue holding only its sentinel.
    pub fn new() -> Self {
        let sentinel = Node::sentinel();
        Self {
            head: CachePadded::new(Atomic::new(sentinel)),
            tail: CachePadded::new(Atomic::new(sentinel)),
            waiters: Waiters::default(),
        }
    }

    /// Appends a value at the back.
    ///
    /// Aborts through the global allocator's out-of-memory handler if the
    /// node cannot be allocated; see [`try_enqueue`](Self::try_enqueue).
    pub fn enqueue(&self, value: T) {
        self.link(Node::new(value));
    }

    /// Appends a value, reporting allocation failure instead of aborting.
    pub fn try_enqueue(&self, value: T) -> std::result::Result<(), TryEnqueueError<T>> {
        let node = Node::try_new(value).map_err(|value| TryEnqueueError { value })?;
        self.link(node);
        Ok(())
    }

    fn link(&self, node: *mut Node<T>) {
        let guard = pin();
        // SAFETY: we own `node` until the link CAS publishes it
        let new = unsafe { Shared::from_raw(node) };
        let backoff = Backoff::new();

        loop {
            let tail = self.tail.load(Ordering::Acquire, &guard);
            // SAFETY: the queue always holds at least the sentinel, and
            // `tail` never falls behind `head`
            let last = unsafe { tail.deref() };
            let next = last.next.load(Ordering::Acquire, &guard);

            if !next.is_null() {
                self.swing_tail(tail, next, &guard);
                continue;
            }

            match last.next.compare_exchange(
                Shared::null(),
                new,
                Ordering::SeqCst,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    self.swing_tail(tail, new, &guard);
                    break;
                }
                Err(_) => backoff.spin(),
            }
        }

        drop(guard);
        self.waiters.notify_one();
    }

    /// Move `tail` from `from` to `to` unless someone already moved it.
    #[inline]
    fn swing_tail<'g>(&self, from: Shared<'g, Node<T>>, to: Shared<'g, Node<T>>, guard: &'g Guard) {
        let _ = cas::try_update(&Protected::new(&*self.tail, guard), |tail| {
            (tail == from).then_some(to)
        });
    }

    /// Removes the front value without blocking.
    ///
    /// Returns `None` if the queue is empty.
    pub fn try_dequeue(&self) -> Option<T> {
        let guard = pin();

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            let tail = self.tail.load(Ordering::Acquire, &guard);
            // SAFETY: `head` is the current or a recently retired sentinel,
            // kept alive by the guard
            let next = unsafe { head.deref() }.next.load(Ordering::Acquire, &guard);

            if next.is_null() {
                return None;
            }

            if head == tail {
                self.swing_tail(tail, next, &guard);
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::SeqCst, Ordering::Acquire, &guard)
                .is_ok()
            {
                // SAFETY: winning the CAS made `next` the sentinel and gave
                // us the sole right to move its value out
                let value = unsafe { next.deref().value.assume_init_read() };
                // SAFETY: the old sentinel is unlinked and retired once
                unsafe { retire(head.as_raw()) };
                return Some(value);
            }
        }
    }

    /// Removes the front value, blocking until one is available.
    ///
    /// Spins briefly, then parks until a producer wakes it.
    pub fn dequeue(&self) -> T {
        loop {
            if let Some(value) = self.spin_dequeue() {
                return value;
            }
            if let Some(value) = self.waiters.wait_for(None, || self.try_dequeue()) {
                return value;
            }
        }
    }

    /// Removes the front value, blocking for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if nothing arrives in time.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<T> {
        // A deadline too far out to represent means no deadline at all.
        let deadline = Instant::now().checked_add(timeout);
        if let Some(value) = self.spin_dequeue() {
            return Ok(value);
        }
        self.waiters
            .wait_for(deadline, || self.try_dequeue())
            .ok_or_else(|| {
                tracing::debug!(?timeout, "dequeue timed out");
                Error::Timeout(timeout)
            })
    }

    fn spin_dequeue(&self) -> Option<T> {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_dequeue() {
                return Some(value);
            }
            if backoff.is_completed() {
                return None;
            }
            backoff.snooze();
        }
    }

    /// Returns `true` if the queue holds no values right now.
    pub fn is_empty(&self) -> bool {
        let guard = pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        // SAFETY: kept alive by the guard
        unsafe { head.deref() }.next.load(Ordering::Acquire, &guard).is_null()
    }

    /// Counts the values by walking the list.
    ///
    /// Diagnostic only: under concurrent use the result matches no
    /// particular moment and may be stale before it is returned.
    pub fn len(&self) -> usize {
        let guard = pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        // SAFETY: kept alive by the guard
        let mut curr = unsafe { head.deref() }.next.load(Ordering::Acquire, &guard);
        let mut count = 0;
        while !curr.is_null() {
            count += 1;
            // SAFETY: every node reachable from a protected node is
            // protected by the same guard
            curr = unsafe { curr.deref() }.next.load(Ordering::Acquire, &guard);
        }
        count
    }

    /// Frees every node still linked, payloads included.
    ///
    /// Returns the number of nodes freed.
    ///
    /// # Safety
    ///
    /// Requires exclusive access, and the queue must not be used again.
    unsafe fn free_nodes(&mut self) -> usize {
        let mut curr = self.head.get_mut();
        let mut sentinel = true;
        let mut freed = 0;

        while !curr.is_null() {
            // SAFETY: exclusive access; every node came from `Box`
            let mut node = unsafe { Box::from_raw(curr) };
            if !sentinel {
                // SAFETY: only the sentinel lacks a value
                unsafe { node.value.assume_init_drop() };
            }
            sentinel = false;
            curr = node.next.get_mut();
            freed += 1;
        }
        freed
    }
}

impl<T: 'static> Drop for Queue<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` in drop is exclusive and final
        unsafe {
            self.free_nodes();
        }
    }
}

impl<T: 'static> Extend<T> for Queue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.enqueue(value);
        }
    }
}

impl<T: 'static> FromIterator<T> for Queue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::new();
        queue.extend(iter);
        queue
    }
}

impl<T: 'static> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("len", &self.len()).finish_non_exhaustive()
    }
}
