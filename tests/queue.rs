use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use weft::queue::LockFreeRingQueue;

#[test]
fn single_producer_pops_in_push_order() {
    let queue: LockFreeRingQueue<usize, 16> = LockFreeRingQueue::new();
    for value in 0..10 {
        assert!(queue.push(value));
    }
    for value in 0..10 {
        assert_eq!(queue.pop(), Some(value));
    }
    assert_eq!(queue.pop(), None);
}

#[test]
fn push_into_full_queue_fails_without_mutating() {
    let queue: LockFreeRingQueue<usize, 4> = LockFreeRingQueue::new();
    for value in 0..4 {
        assert!(queue.push(value));
    }
    // The queue already holds N committed items; the fifth push must fail.
    assert!(!queue.push(99));
    assert_eq!(queue.size_not_thread_safe(), 4);

    // The failed push left the contents untouched.
    for value in 0..4 {
        assert_eq!(queue.pop(), Some(value));
    }
    assert_eq!(queue.pop(), None);
    assert_eq!(queue.size_not_thread_safe(), 0);
}

#[test]
fn pop_from_empty_queue_fails_without_mutating() {
    let queue: LockFreeRingQueue<usize, 4> = LockFreeRingQueue::new();
    assert_eq!(queue.pop(), None);
    assert_eq!(queue.size_not_thread_safe(), 0);
    assert!(queue.push(1));
    assert_eq!(queue.pop(), Some(1));
    assert_eq!(queue.pop(), None);
}

#[test]
fn wraparound_reuses_slots_correctly() {
    let queue: LockFreeRingQueue<usize, 4> = LockFreeRingQueue::new();
    // Drive the counters far past the capacity so every slot is reused many
    // times, including across the full/empty boundary.
    for round in 0..1000 {
        assert!(queue.push(round * 2));
        assert!(queue.push(round * 2 + 1));
        assert_eq!(queue.pop(), Some(round * 2));
        assert_eq!(queue.pop(), Some(round * 2 + 1));
    }
    assert_eq!(queue.pop(), None);
}

#[test]
fn size_is_write_minus_read() {
    let queue: LockFreeRingQueue<usize, 8> = LockFreeRingQueue::new();
    assert_eq!(queue.size_not_thread_safe(), 0);
    queue.push(1);
    queue.push(2);
    queue.push(3);
    assert_eq!(queue.size_not_thread_safe(), 3);
    queue.pop();
    assert_eq!(queue.size_not_thread_safe(), 2);
}

#[test]
fn concurrent_producers_and_consumers_lose_and_duplicate_nothing() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 5_000;

    let queue: Arc<LockFreeRingQueue<usize, 1024>> = Arc::new(LockFreeRingQueue::new());
    let popped: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let value = producer * PER_PRODUCER + i;
                    // A full queue is backpressure, not an error: retry.
                    while !queue.push(value) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let popped = Arc::clone(&popped);
            thread::spawn(move || {
                let mut local = Vec::new();
                loop {
                    match queue.pop() {
                        Some(value) => local.push(value),
                        None => {
                            let mut total = popped.lock().unwrap();
                            total.extend(local.drain(..));
                            if total.len() == PRODUCERS * PER_PRODUCER {
                                return;
                            }
                            drop(total);
                            thread::yield_now();
                        }
                    }
                }
            })
        })
        .collect();

    for handle in producers {
        handle.join().unwrap();
    }
    for handle in consumers {
        handle.join().unwrap();
    }

    // Every pushed value was popped exactly once.
    let popped = popped.lock().unwrap();
    assert_eq!(popped.len(), PRODUCERS * PER_PRODUCER);
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for &value in popped.iter() {
        *counts.entry(value).or_default() += 1;
    }
    for producer in 0..PRODUCERS {
        for i in 0..PER_PRODUCER {
            assert_eq!(counts.get(&(producer * PER_PRODUCER + i)), Some(&1));
        }
    }
}

#[test]
fn per_producer_order_is_preserved_under_concurrency() {
    const PRODUCERS: usize = 2;
    const PER_PRODUCER: usize = 10_000;

    let queue: Arc<LockFreeRingQueue<(usize, usize), 512>> = Arc::new(LockFreeRingQueue::new());
    let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for sequence in 0..PER_PRODUCER {
                    while !queue.push((producer, sequence)) {
                        thread::yield_now();
                    }
                }
                done.fetch_add(1, std::sync::atomic::Ordering::Release);
            })
        })
        .collect();

    // A single consumer must observe each producer's items in push order,
    // whatever the interleaving between producers looks like.
    let mut next_expected = [0usize; PRODUCERS];
    let mut received = 0;
    while received < PRODUCERS * PER_PRODUCER {
        if let Some((producer, sequence)) = queue.pop() {
            assert_eq!(
                sequence, next_expected[producer],
                "producer {producer} items observed out of order"
            );
            next_expected[producer] += 1;
            received += 1;
        } else {
            thread::yield_now();
        }
    }

    for handle in producers {
        handle.join().unwrap();
    }
}
