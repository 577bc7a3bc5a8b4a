//! Thread slots and global epoch state.
//!
//! Each registered thread owns one slot in a fixed table. A slot holds
//! the epoch the thread announced when it pinned, or [`INACTIVE`] while
//! the thread is outside any critical section. The global epoch may only
//! move from `e` to `e + 1` when every active slot announces `e`.

use crate::retired::Retired;
use crate::ttas::TTas;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Maximum number of threads holding a slot at the same time
pub(crate) const MAX_THREADS: usize = 128;

/// Retirements between two collection attempts on the same thread
pub(crate) const COLLECT_FREQ: usize = 64;

/// Slot value of a thread that is not pinned
pub(crate) const INACTIVE: u64 = 0;

#[repr(align(128))]
pub(crate) struct ThreadSlot {
    epoch: AtomicU64,
}

impl ThreadSlot {
    const fn new() -> Self {
        Self {
            epoch: AtomicU64::new(INACTIVE),
        }
    }
}

/// Global reclamation state
pub(crate) struct Registry {
    slots: &'static [ThreadSlot],
    /// Global epoch counter (starts at 1, 0 is [`INACTIVE`])
    epoch: AtomicU64,
    /// Slot high-water mark; slots at or past it were never handed out
    next_tid: AtomicUsize,
    free_tids: TTas<Vec<usize>>,
    /// Retirements left behind by exited threads
    orphans: TTas<Vec<Retired>>,
}

impl Registry {
    fn new() -> Self {
        let slots: Vec<ThreadSlot> = (0..MAX_THREADS).map(|_| ThreadSlot::new()).collect();
        Self {
            slots: Box::leak(slots.into_boxed_slice()),
            epoch: AtomicU64::new(1),
            next_tid: AtomicUsize::new(0),
            free_tids: TTas::new(Vec::new()),
            orphans: TTas::new(Vec::new()),
        }
    }

    #[inline]
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Publish the current global epoch in slot `tid`.
    ///
    /// The epoch is re-read after the store: if it moved in between, an
    /// advancing thread may have scanned the slot while it still looked
    /// inactive, so the announcement is retried with the newer value.
    pub(crate) fn announce(&self, tid: usize) -> u64 {
        let slot = &self.slots[tid].epoch;
        loop {
            let epoch = self.epoch.load(Ordering::SeqCst);
            slot.store(epoch, Ordering::SeqCst);
            if self.epoch.load(Ordering::SeqCst) == epoch {
                return epoch;
            }
        }
    }

    #[inline]
    pub(crate) fn deactivate(&self, tid: usize) {
        self.slots[tid].epoch.store(INACTIVE, Ordering::Release);
    }

    #[inline]
    pub(crate) fn announced(&self, tid: usize) -> u64 {
        self.slots[tid].epoch.load(Ordering::SeqCst)
    }

    /// Try to move the global epoch one step forward.
    ///
    /// Returns the global epoch after the attempt. Fails silently when a
    /// pinned thread still announces an older epoch.
    pub(crate) fn try_advance(&self) -> u64 {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let registered = self.next_tid.load(Ordering::Acquire).min(MAX_THREADS);

        for slot in &self.slots[..registered] {
            let announced = slot.epoch.load(Ordering::SeqCst);
            if announced != INACTIVE && announced != epoch {
                return epoch;
            }
        }

        match self
            .epoch
            .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                tracing::trace!(epoch = epoch + 1, "advanced global epoch");
                epoch + 1
            }
            Err(current) => current,
        }
    }

    /// Allocate a thread slot, recycling released ones first.
    pub(crate) fn alloc_tid(&self) -> usize {
        if let Some(tid) = self.free_tids.lock().pop() {
            tracing::trace!(tid, "reused thread slot");
            return tid;
        }
        let tid = self.next_tid.fetch_add(1, Ordering::AcqRel);
        assert!(
            tid < MAX_THREADS,
            "lockfree-epoch: more than {MAX_THREADS} threads registered at once"
        );
        tracing::debug!(tid, "registered thread slot");
        tid
    }

    /// Release a thread slot for recycling.
    pub(crate) fn free_tid(&self, tid: usize) {
        self.deactivate(tid);
        self.free_tids.lock().push(tid);
        tracing::trace!(tid, "released thread slot");
    }

    /// Hand retirements of an exiting thread over to the survivors.
    pub(crate) fn push_orphans(&self, bag: Vec<Retired>) {
        if bag.is_empty() {
            return;
        }
        tracing::debug!(count = bag.len(), "orphaned pending retirements");
        self.orphans.lock().extend(bag);
    }

    /// Take the orphan list if nobody else is adopting it right now.
    pub(crate) fn adopt_orphans(&self) -> Vec<Retired> {
        match self.orphans.try_lock() {
            Some(mut orphans) => core::mem::take(&mut *orphans),
            None => Vec::new(),
        }
    }
}

use once_cell::race::OnceBox;

static GLOBAL: OnceBox<Registry> = OnceBox::new();

#[inline]
pub(crate) fn global() -> &'static Registry {
    GLOBAL.get_or_init(|| Box::new(Registry::new()))
}
