use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use weft::atomic::{full_fence, AtomicCell};

#[test]
fn compare_exchange_success_keeps_expected() {
    let cell = AtomicCell::new(7u32);
    let mut expected = 7u32;
    assert!(cell.compare_exchange(&mut expected, 8, Ordering::AcqRel));
    assert_eq!(expected, 7);
    assert_eq!(cell.load(Ordering::Acquire), 8);
}

#[test]
fn compare_exchange_failure_reports_actual_value() {
    let cell = AtomicCell::new(42u32);
    let mut expected = 5u32;
    assert!(!cell.compare_exchange(&mut expected, 6, Ordering::AcqRel));
    // The retry contract: the observed value lands in `expected`.
    assert_eq!(expected, 42);
    assert_eq!(cell.load(Ordering::Acquire), 42);

    // Retrying with the observed value must now succeed.
    assert!(cell.compare_exchange(&mut expected, 6, Ordering::AcqRel));
    assert_eq!(cell.load(Ordering::Acquire), 6);
}

#[test]
fn fetch_ops_return_previous_value() {
    let cell = AtomicCell::new(10u32);
    assert_eq!(cell.fetch_add(5), 10);
    assert_eq!(cell.fetch_sub(3), 15);
    assert_eq!(cell.load(Ordering::Relaxed), 12);

    let bits = AtomicCell::new(0b1100u32);
    assert_eq!(bits.fetch_and(0b1010), 0b1100);
    assert_eq!(bits.load(Ordering::Relaxed), 0b1000);
    assert_eq!(bits.fetch_or(0b0011), 0b1000);
    assert_eq!(bits.load(Ordering::Relaxed), 0b1011);
}

#[test]
fn increment_and_decrement_return_new_value() {
    let cell = AtomicCell::new(1u32);
    assert_eq!(cell.increment(), 2);
    assert_eq!(cell.increment(), 3);
    assert_eq!(cell.decrement(), 2);
    assert_eq!(cell.decrement(), 1);
    assert_eq!(cell.decrement(), 0);
}

#[test]
fn store_and_load_orderings() {
    let cell = AtomicCell::new(0usize);
    cell.store(99, Ordering::Release);
    assert_eq!(cell.load(Ordering::Acquire), 99);
    cell.store(100, Ordering::SeqCst);
    full_fence();
    assert_eq!(cell.load(Ordering::SeqCst), 100);
}

#[test]
fn concurrent_increments_do_not_lose_updates() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 10_000;

    let cell = Arc::new(AtomicCell::new(0usize));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    cell.increment();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cell.load(Ordering::SeqCst), THREADS * PER_THREAD);
}
