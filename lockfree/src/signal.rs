//! Parking for blocked dequeuers.
//!
//! A dequeuer that found the queue empty registers a [`Signal`], checks
//! the queue once more, and only then parks. A producer that links a node
//! and then sees a non-zero sleeper count wakes one registered signal.
//! Both sides put a `SeqCst` fence between their write and their read, so
//! at least one of them observes the other: either the re-check finds the
//! node, or the producer finds the sleeper.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering, fence};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, Thread};
use std::time::Instant;

/// One-shot wakeup for a parked thread.
pub(crate) struct Signal {
    notified: AtomicBool,
    thread: Thread,
}

impl Signal {
    /// Creates a signal for the current thread.
    pub(crate) fn new() -> Self {
        Self {
            notified: AtomicBool::new(false),
            thread: thread::current(),
        }
    }

    /// Park until notified or until `deadline` passes.
    ///
    /// Returns whether the signal was notified.
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> bool {
        while !self.notified.load(Ordering::Acquire) {
            match deadline {
                None => thread::park(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return self.notified.load(Ordering::Acquire);
                    }
                    thread::park_timeout(deadline - now);
                }
            }
        }
        true
    }

    /// Wake the owning thread.
    pub(crate) fn notify(&self) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Registry of parked dequeuers.
#[derive(Default)]
pub(crate) struct Waiters {
    sleepers: AtomicUsize,
    parked: Mutex<VecDeque<Arc<Signal>>>,
}

impl Waiters {
    fn parked(&self) -> MutexGuard<'_, VecDeque<Arc<Signal>>> {
        // A panic while holding the lock cannot leave the deque half-edited.
        self.parked.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, signal: &Arc<Signal>) {
        self.parked().push_back(signal.clone());
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }

    /// Remove `signal` if it is still registered.
    ///
    /// Returns `false` if a producer already took it, meaning a wakeup
    /// was spent on us.
    fn cancel(&self, signal: &Arc<Signal>) -> bool {
        let mut parked = self.parked();
        match parked.iter().position(|s| Arc::ptr_eq(s, signal)) {
            Some(index) => {
                parked.remove(index);
                self.sleepers.fetch_sub(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Wake one parked dequeuer, if there is any.
    ///
    /// Costs one fence and one load when nobody is parked.
    pub(crate) fn notify_one(&self) {
        fence(Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) == 0 {
            return;
        }
        let signal = {
            let mut parked = self.parked();
            let signal = parked.pop_front();
            if signal.is_some() {
                self.sleepers.fetch_sub(1, Ordering::SeqCst);
            }
            signal
        };
        if let Some(signal) = signal {
            signal.notify();
        }
    }

    /// Run `attempt` until it yields a value, parking between attempts.
    ///
    /// Returns `None` only if `deadline` passes first.
    pub(crate) fn wait_for<R>(
        &self,
        deadline: Option<Instant>,
        mut attempt: impl FnMut() -> Option<R>,
    ) -> Option<R> {
        loop {
            let signal = Arc::new(Signal::new());
            self.register(&signal);

            if let Some(value) = attempt() {
                self.withdraw(&signal);
                return Some(value);
            }

            tracing::trace!("parking dequeuer");
            if !signal.wait(deadline) {
                self.withdraw(&signal);
                return attempt();
            }
        }
    }

    /// Deregister `signal`; pass on a wakeup it swallowed.
    fn withdraw(&self, signal: &Arc<Signal>) {
        if !self.cancel(signal) {
            self.notify_one();
        }
    }

    #[cfg(test)]
    pub(crate) fn sleepers(&self) -> usize {
        self.sleepers.load(Ordering::SeqCst)
    }
}
