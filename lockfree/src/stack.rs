//! Intrusive LIFO stack with a versioned head.
//!
//! Nodes are the caller's own heap objects with a [`Link`] embedded in
//! them. The head is a `{ptr, nonce}` pair replaced as one 128-bit unit;
//! every successful pop bumps the nonce, so a CAS prepared against a node
//! that was popped and pushed back in the meantime no longer matches.

use core::marker::PhantomData as marker;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;
use lockfree_epoch::{pin, retire};
use portable_atomic::AtomicU128;

use crate::cas::{self, CasCell};

/// The intrusive next pointer stored inside a stack node.
pub struct Link<T> {
    next: AtomicPtr<T>,
}

impl<T> Link<T> {
    /// Creates an unlinked link.
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl<T> Default for Link<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({:p})", self.next.load(Ordering::Relaxed))
    }
}

/// Types that can be linked into a [`Stack`].
///
/// # Safety
///
/// `link` must return the same field of `self` on every call, and that
/// field must not be used by anything but the stack.
///
/// # Examples
///
/// ```
/// use lockfree::{Link, Linked};
///
/// struct Job {
///     link: Link<Job>,
///     id: u32,
/// }
///
/// unsafe impl Linked for Job {
///     fn link(&self) -> &Link<Self> {
///         &self.link
///     }
/// }
/// ```
pub unsafe trait Linked: Sized {
    /// Returns the embedded link.
    fn link(&self) -> &Link<Self>;
}

/// Exclusive handle to a heap-allocated stack node.
///
/// Created by the caller, given to [`Stack::push`], and handed back by
/// [`Stack::pop`]. Only shared access is exposed: a thread that stalled
/// in `pop` may still read the node's link, so the allocation is
/// released through deferred reclamation when the handle goes away.
pub struct Owned<T: Linked + Send + 'static> {
    ptr: NonNull<T>,
    _marker: marker<T>,
}

unsafe impl<T: Linked + Send + 'static> Send for Owned<T> {}
unsafe impl<T: Linked + Send + Sync + 'static> Sync for Owned<T> {}

impl<T: Linked + Send + 'static> Owned<T> {
    /// Moves `value` to the heap.
    pub fn new(value: T) -> Self {
        Box::new(value).into()
    }

    /// Takes the value out, retiring the allocation.
    pub fn into_inner(self) -> T {
        let ptr = self.into_raw();
        // SAFETY: the handle was the only owner of an initialized `T`
        let value = unsafe { ptr::read(ptr) };
        // SAFETY: `MaybeUninit<T>` has the layout of `T`, so the box is
        // freed without dropping the value we just moved out
        unsafe { retire(ptr.cast::<MaybeUninit<T>>()) };
        value
    }

    fn into_raw(self) -> *mut T {
        let ptr = self.ptr.as_ptr();
        mem::forget(self);
        ptr
    }

    /// # Safety
    ///
    /// `ptr` must come from [`into_raw`](Self::into_raw) and be owned by
    /// the caller.
    unsafe fn from_raw(ptr: *mut T) -> Self {
        Self {
            // SAFETY: forwarded to the caller
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            _marker: marker,
        }
    }
}

impl<T: Linked + Send + 'static> From<Box<T>> for Owned<T> {
    fn from(boxed: Box<T>) -> Self {
        Self {
            ptr: NonNull::from(Box::leak(boxed)),
            _marker: marker,
        }
    }
}

impl<T: Linked + Send + 'static> Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: valid until the handle is dropped
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Linked + Send + 'static> Drop for Owned<T> {
    fn drop(&mut self) {
        // SAFETY: we own the allocation and it is not in any stack
        unsafe { retire(self.ptr.as_ptr()) };
    }
}

impl<T: Linked + Send + fmt::Debug + 'static> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&**self).finish()
    }
}

/// A snapshot of the stack head.
struct Head<T> {
    ptr: *mut T,
    nonce: u64,
}

impl<T> Clone for Head<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Head<T> {}

impl<T> PartialEq for Head<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.nonce == other.nonce
    }
}

impl<T> fmt::Debug for Head<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Head({:p}, {})", self.ptr, self.nonce)
    }
}

impl<T> Head<T> {
    #[inline]
    fn pack(self) -> u128 {
        (self.ptr as usize as u128) | ((self.nonce as u128) << 64)
    }

    #[inline]
    fn unpack(val: u128) -> Self {
        Self {
            ptr: val as u64 as usize as *mut T,
            nonce: (val >> 64) as u64,
        }
    }
}

/// Pointer in the low word, nonce in the high word.
struct VersionedHead<T> {
    data: AtomicU128,
    _marker: marker<*mut T>,
}

impl<T> VersionedHead<T> {
    fn new() -> Self {
        Self {
            data: AtomicU128::new(
                Head::<T> {
                    ptr: ptr::null_mut(),
                    nonce: 0,
                }
                .pack(),
            ),
            _marker: marker,
        }
    }
}

impl<T> CasCell for VersionedHead<T> {
    type State = Head<T>;

    #[inline]
    fn current(&self) -> Head<T> {
        Head::unpack(self.data.load(Ordering::Acquire))
    }

    #[inline]
    fn commit(&self, current: Head<T>, new: Head<T>) -> Result<(), Head<T>> {
        self.data
            .compare_exchange_weak(current.pack(), new.pack(), Ordering::AcqRel, Ordering::Acquire)
            .map(drop)
            .map_err(Head::unpack)
    }
}

/// A lock-free intrusive LIFO stack.
///
/// # Examples
///
/// ```
/// use lockfree::{Link, Linked, Owned, Stack};
///
/// struct Buffer {
///     link: Link<Buffer>,
///     bytes: Vec<u8>,
/// }
///
/// unsafe impl Linked for Buffer {
///     fn link(&self) -> &Link<Self> {
///         &self.link
///     }
/// }
///
/// let pool = Stack::new();
/// pool.push(Owned::new(Buffer { link: Link::new(), bytes: vec![0; 16] }));
///
/// let buffer = pool.pop().unwrap();
/// assert_eq!(buffer.bytes.len(), 16);
/// pool.push(buffer);
/// assert!(!pool.is_empty());
/// ```
pub struct Stack<T: Linked + Send + 'static> {
    head: CachePadded<VersionedHead<T>>,
}

unsafe impl<T: Linked + Send + 'static> Send for Stack<T> {}
unsafe impl<T: Linked + Send + 'static> Sync for Stack<T> {}

impl<T: Linked + Send + 'static> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked + Send + 'static> Stack<T> {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self {
            head: CachePadded::new(VersionedHead::new()),
        }
    }

    /// Pushes a node on top. The nonce is left as it is.
    pub fn push(&self, node: Owned<T>) {
        let node = node.into_raw();
        let _ = cas::try_update(&*self.head, |head| {
            // SAFETY: the node is ours until the commit publishes it
            unsafe { (*node).link().next.store(head.ptr, Ordering::Relaxed) };
            Some(Head {
                ptr: node,
                nonce: head.nonce,
            })
        });
    }

    /// Pops the top node, or returns `None` if the stack is empty.
    pub fn pop(&self) -> Option<Owned<T>> {
        // The observed top may be popped and released by another thread
        // before we read its link; the guard keeps it allocated.
        let _guard = pin();
        let popped = cas::try_update(&*self.head, |head| {
            if head.ptr.is_null() {
                return None;
            }
            // SAFETY: protected by the guard
            let next = unsafe { (*head.ptr).link().next.load(Ordering::Relaxed) };
            Some(Head {
                ptr: next,
                nonce: head.nonce.wrapping_add(1),
            })
        })?;
        // SAFETY: winning the commit unlinked the node and made it ours
        Some(unsafe { Owned::from_raw(popped.ptr) })
    }

    /// Returns `true` if the stack holds no nodes right now.
    pub fn is_empty(&self) -> bool {
        self.head.current().ptr.is_null()
    }
}

impl<T: Linked + Send + 'static> Drop for Stack<T> {
    fn drop(&mut self) {
        // A popper stalled on another stack may still read these links,
        // so the nodes are retired rather than freed.
        let mut curr = self.head.current().ptr;
        while !curr.is_null() {
            // SAFETY: `&mut self` rules out concurrent pops on this stack;
            // every linked node came from `Owned::into_raw`
            let node = unsafe { Owned::from_raw(curr) };
            curr = node.link().next.load(Ordering::Relaxed);
        }
    }
}

impl<T: Linked + Send + 'static> fmt::Debug for Stack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = self.head.current();
        f.debug_struct("Stack")
            .field("empty", &head.ptr.is_null())
            .field("nonce", &head.nonce)
            .finish()
    }
}
