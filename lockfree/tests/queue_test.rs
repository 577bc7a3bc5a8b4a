use lockfree::{Error, Queue};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_queue_simple() {
    let q = Queue::new();
    q.enqueue(1);
    q.enqueue(2);
    assert_eq!(q.try_dequeue(), Some(1));
    assert_eq!(q.try_dequeue(), Some(2));
    assert_eq!(q.try_dequeue(), None);
}

#[test]
fn test_new_queue_is_empty() {
    let q: Queue<u64> = Queue::new();
    assert!(q.is_empty());
    assert_eq!(q.len(), 0);
    assert_eq!(q.try_dequeue(), None);
}

#[test]
fn test_len_and_is_empty_track_contents() {
    let q = Queue::new();
    for i in 0..10 {
        q.enqueue(i);
        assert_eq!(q.len(), i + 1);
    }
    assert!(!q.is_empty());
    for i in 0..10 {
        assert_eq!(q.try_dequeue(), Some(i));
    }
    assert!(q.is_empty());
    assert_eq!(q.len(), 0);
}

#[test]
fn test_interleaved_enqueue_dequeue() {
    let q = Queue::new();
    q.enqueue(1);
    q.enqueue(2);
    assert_eq!(q.try_dequeue(), Some(1));
    q.enqueue(3);
    assert_eq!(q.try_dequeue(), Some(2));
    assert_eq!(q.try_dequeue(), Some(3));
    assert_eq!(q.try_dequeue(), None);
    q.enqueue(4);
    assert_eq!(q.try_dequeue(), Some(4));
}

#[test]
fn test_owned_payloads() {
    let q = Queue::new();
    q.enqueue(String::from("alpha"));
    q.enqueue(String::from("beta"));
    assert_eq!(q.try_dequeue().as_deref(), Some("alpha"));
    assert_eq!(q.dequeue(), "beta");
}

#[test]
fn test_from_iter_and_extend() {
    let mut q: Queue<i32> = (0..5).collect();
    q.extend(5..8);
    let drained: Vec<_> = std::iter::from_fn(|| q.try_dequeue()).collect();
    assert_eq!(drained, (0..8).collect::<Vec<_>>());
}

#[test]
fn test_debug_reports_len() {
    let q: Queue<u8> = [1, 2, 3].into_iter().collect();
    assert_eq!(format!("{q:?}"), "Queue { len: 3, .. }");
}

#[test]
fn test_try_enqueue() {
    let q = Queue::new();
    assert!(q.try_enqueue(7).is_ok());
    assert_eq!(q.try_dequeue(), Some(7));
}

#[test]
fn test_drop_releases_undequeued_payloads() {
    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let q = Queue::new();
    for _ in 0..10 {
        q.enqueue(Tracked(drops.clone()));
    }
    for _ in 0..3 {
        drop(q.try_dequeue());
    }
    assert_eq!(drops.load(Ordering::SeqCst), 3);

    drop(q);
    assert_eq!(drops.load(Ordering::SeqCst), 10);
}

#[test]
fn test_dequeue_timeout_on_empty_queue() {
    let q: Queue<u32> = Queue::new();
    let timeout = Duration::from_millis(30);
    let start = Instant::now();
    assert_eq!(q.dequeue_timeout(timeout), Err(Error::Timeout(timeout)));
    assert!(start.elapsed() >= timeout);
}

#[test]
fn test_dequeue_timeout_returns_ready_value() {
    let q = Queue::new();
    q.enqueue(9);
    assert_eq!(q.dequeue_timeout(Duration::from_millis(1)), Ok(9));
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_dequeue_blocks_until_enqueue() {
    let q = Arc::new(Queue::new());

    let consumer = {
        let q = q.clone();
        thread::spawn(move || q.dequeue())
    };

    thread::sleep(Duration::from_millis(50));
    q.enqueue(42u64);
    assert_eq!(consumer.join().unwrap(), 42);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_dequeue_timeout_wakes_on_enqueue() {
    let q = Arc::new(Queue::new());

    let consumer = {
        let q = q.clone();
        thread::spawn(move || q.dequeue_timeout(Duration::from_secs(10)))
    };

    thread::sleep(Duration::from_millis(20));
    q.enqueue("ready");
    assert_eq!(consumer.join().unwrap(), Ok("ready"));
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_every_blocked_consumer_is_woken() {
    const CONSUMERS: usize = 8;
    const ROUNDS: usize = 200;

    let q = Arc::new(Queue::new());
    let mut handles = vec![];

    for _ in 0..CONSUMERS {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            (0..ROUNDS).map(|_| q.dequeue()).sum::<usize>()
        }));
    }

    for i in 0..CONSUMERS * ROUNDS {
        q.enqueue(i);
        if i % 64 == 0 {
            thread::yield_now();
        }
    }

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, (0..CONSUMERS * ROUNDS).sum());
    assert!(q.is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_mpmc_no_loss_no_duplication() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 5000;

    let q = Arc::new(Queue::new());
    let taken = Arc::new(AtomicUsize::new(0));
    let mut producers = vec![];
    let mut consumers = vec![];

    for p in 0..PRODUCERS {
        let q = q.clone();
        producers.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                q.enqueue(p * PER_PRODUCER + i);
            }
        }));
    }

    for _ in 0..CONSUMERS {
        let q = q.clone();
        let taken = taken.clone();
        consumers.push(thread::spawn(move || {
            let mut seen = Vec::new();
            while taken.load(Ordering::SeqCst) < PRODUCERS * PER_PRODUCER {
                match q.try_dequeue() {
                    Some(v) => {
                        taken.fetch_add(1, Ordering::SeqCst);
                        seen.push(v);
                    }
                    None => thread::yield_now(),
                }
            }
            seen
        }));
    }

    for h in producers {
        h.join().unwrap();
    }

    let mut all = HashSet::new();
    let mut count = 0;
    for h in consumers {
        for v in h.join().unwrap() {
            assert!(all.insert(v), "value {v} dequeued twice");
            count += 1;
        }
    }

    assert_eq!(count, PRODUCERS * PER_PRODUCER);
    assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
    assert!(q.try_dequeue().is_none());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_per_producer_order_is_preserved() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 10_000;

    let q = Arc::new(Queue::new());
    let mut handles = vec![];

    for p in 0..PRODUCERS {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                q.enqueue((p, seq));
            }
        }));
    }

    let mut next = [0usize; PRODUCERS];
    for _ in 0..PRODUCERS * PER_PRODUCER {
        let (p, seq) = q.dequeue();
        assert_eq!(seq, next[p], "producer {p} out of order");
        next[p] += 1;
    }

    for h in handles {
        h.join().unwrap();
    }
    assert!(next.iter().all(|&n| n == PER_PRODUCER));
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_try_dequeue_on_empty_queue() {
    const THREADS: usize = 8;

    let q: Arc<Queue<u64>> = Arc::new(Queue::new());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let q = q.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (0..10_000).all(|_| q.try_dequeue().is_none())
            })
        })
        .collect();

    for h in handles {
        assert!(h.join().unwrap());
    }
    assert!(q.is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_drop_accounting() {
    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    const THREADS: usize = 4;
    const PER_THREAD: usize = 2000;

    let drops = Arc::new(AtomicUsize::new(0));
    let q = Arc::new(Queue::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let q = q.clone();
            let drops = drops.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    q.enqueue(Tracked(drops.clone()));
                    if i % 2 == 0 {
                        drop(q.try_dequeue());
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    drop(Arc::try_unwrap(q).ok().expect("queue still shared"));
    assert_eq!(drops.load(Ordering::SeqCst), THREADS * PER_THREAD);
}
