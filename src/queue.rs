//! A lock-free multi-producer multi-consumer circular FIFO queue.
//!
//! The queue is described by three monotonically increasing 32-bit counters,
//! each taken modulo the capacity to index the slot array:
//!
//! ```text
//!  . - empty slot
//!  | - committed slot (readable)
//!  : - reserved slot (a producer is still writing it)
//!
//!  .......||||||||||||||||||||||||:::::::::::::::::......
//!         ^                      ^                 ^
//!      read counter      committed counter    write counter
//! ```
//!
//! `[read, committed)` holds committed items, `[committed, write)` holds
//! slots reserved by in-flight producers. Producers publish in reservation
//! order, so consumers never observe a gap in the committed region.

use std::{cell::UnsafeCell, mem::MaybeUninit, sync::atomic::Ordering, thread};

use crossbeam_utils::CachePadded;

use crate::atomic::AtomicCell;

/// A bounded lock-free MPMC FIFO queue.
///
/// `N` must be a power of two. Elements are `Copy` because a consumer reads a
/// slot speculatively before it knows whether it has won the claim on it; the
/// scheduler moves small arena ids through these queues.
pub struct LockFreeRingQueue<T: Copy, const N: usize> {
    write: CachePadded<AtomicCell<u32>>,
    committed_write: CachePadded<AtomicCell<u32>>,
    read: CachePadded<AtomicCell<u32>>,
    slots: [UnsafeCell<MaybeUninit<T>>; N],
}

// SAFETY: The slot array is only written through the reservation protocol and
// only read through the claim protocol, so the queue can be shared freely as
// long as the element can be sent between threads.
unsafe impl<T: Copy + Send, const N: usize> Send for LockFreeRingQueue<T, N> {}
unsafe impl<T: Copy + Send, const N: usize> Sync for LockFreeRingQueue<T, N> {}

impl<T: Copy, const N: usize> LockFreeRingQueue<T, N> {
    pub fn new() -> Self {
        assert!(N.is_power_of_two(), "queue capacity must be a power of two");
        // Counter distances are interpreted as unsigned 32-bit values, so the
        // capacity must leave room for that interpretation to be unambiguous.
        assert!(N <= (1 << 31), "queue capacity too large for 32-bit counters");
        LockFreeRingQueue {
            write: CachePadded::new(AtomicCell::new(0)),
            committed_write: CachePadded::new(AtomicCell::new(0)),
            read: CachePadded::new(AtomicCell::new(0)),
            slots: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Pushes an item onto the queue. Returns `false` if the queue is full;
    /// backpressure is the caller's responsibility, this never blocks.
    pub fn push(&self, item: T) -> bool {
        // Reserve a slot. If the reservation CAS fails another producer beat
        // us to this counter value, so the full check must be redone from
        // scratch with fresh counters.
        let mut write;
        loop {
            write = self.write.load(Ordering::Relaxed);
            let read = self.read.load(Ordering::Acquire);

            // Full once N committed-or-in-flight items are held.
            if write.wrapping_sub(read) >= N as u32 {
                return false;
            }

            let mut expected = write;
            if self
                .write
                .compare_exchange(&mut expected, write.wrapping_add(1), Ordering::Acquire)
            {
                break;
            }
        }

        // The reservation gives us exclusive write access to this slot until
        // the commit below makes it visible.
        //
        // SAFETY: No consumer reads past `committed_write`, and no other
        // producer holds this counter value.
        unsafe {
            (*self.slots[Self::index_of(write)].get()).write(item);
        }

        // Commit. Producers must publish in reservation order so the
        // committed region never contains a gap: a producer whose slot is not
        // the oldest unpublished one waits here for its turn, re-arming
        // `expected` with its own reservation each attempt (the failed CAS
        // overwrote it with the current counter). Yielding lets the producer
        // that is actually next make progress; in this scheduler at most two
        // producers push to one queue concurrently (the owning worker and the
        // thread that woke it), so the wait is short in practice.
        let mut expected = write;
        while !self.committed_write.compare_exchange(
            &mut expected,
            write.wrapping_add(1),
            Ordering::Release,
        ) {
            // The commit counter trailing our reservation is the only legal
            // observation; anything else means the protocol was corrupted.
            assert!(
                write.wrapping_sub(expected) < N as u32,
                "ring queue commit counter overtook a reserved slot"
            );
            expected = write;
            thread::yield_now();
        }

        true
    }

    /// Pops the oldest item from the queue. Returns `None` if the queue is
    /// empty (or if all newer items are still being committed).
    pub fn pop(&self) -> Option<T> {
        loop {
            let read = self.read.load(Ordering::Relaxed);
            let committed = self.committed_write.load(Ordering::Acquire);

            if read == committed {
                return None;
            }

            // Speculative read: another consumer may claim this slot first,
            // and a producer may then overwrite it if the queue wraps. The
            // value is only trusted once the claim below succeeds; on failure
            // it is discarded and re-read.
            //
            // SAFETY: The slot was committed, so it was fully written; `T` is
            // `Copy`, so duplicating the bits is fine.
            let item = unsafe { (*self.slots[Self::index_of(read)].get()).assume_init_read() };

            let mut expected = read;
            if self
                .read
                .compare_exchange(&mut expected, read.wrapping_add(1), Ordering::Release)
            {
                // The slot is not cleared on the way out: that would need a
                // second synchronization point with producers. Freshness is
                // guaranteed purely by the counter protocol.
                return Some(item);
            }
        }
    }

    /// Returns `write - read`. Advisory only: the two counters are read
    /// independently, so the result is stale the moment it is produced. Never
    /// base control decisions on it.
    pub fn size_not_thread_safe(&self) -> u32 {
        self.write
            .load(Ordering::Relaxed)
            .wrapping_sub(self.read.load(Ordering::Relaxed))
    }

    #[inline]
    fn index_of(counter: u32) -> usize {
        (counter as usize) & (N - 1)
    }
}

impl<T: Copy, const N: usize> Default for LockFreeRingQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
