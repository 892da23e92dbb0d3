//! Workers and the pool that owns them.
//!
//! A worker owns exactly one bounded lock-free queue and one wake signal.
//! Stealing and local consumption share the same queue and the same
//! concurrency discipline: `try_steal` is simply `pop` called by a sibling,
//! so no separate steal-path locking exists anywhere.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::{queue::LockFreeRingQueue, task::TaskId};

/// Capacity of each worker's local queue. Must be a power of two.
pub(crate) const WORKER_QUEUE_CAPACITY: usize = 512;

/// A manual-reset wake event: `set` latches it, the waiter clears it on the
/// way out. A `set` that lands while the waiter is busy is not lost; the
/// next wait returns immediately.
pub(crate) struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn new() -> Signal {
        Signal {
            raised: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut raised = self.raised.lock();
        *raised = true;
        self.cond.notify_one();
    }

    pub fn wait_and_clear(&self) {
        let mut raised = self.raised.lock();
        while !*raised {
            self.cond.wait(&mut raised);
        }
        *raised = false;
    }
}

/// One worker's shared state. The thread that runs the worker loop lives in
/// the [`TaskManager`]; everything here may be touched by siblings (stealing)
/// and submitters (pushing and waking).
///
/// [`TaskManager`]: crate::manager::TaskManager
pub(crate) struct Worker {
    queue: LockFreeRingQueue<TaskId, WORKER_QUEUE_CAPACITY>,
    wake_signal: Signal,
    /// Stop flags only change under the shutdown protocol: all producers
    /// quiesce first, then the pool broadcasts stop + wake. Relaxed is enough.
    should_stop: AtomicBool,
    has_stopped: AtomicBool,
}

impl Worker {
    fn new() -> Worker {
        Worker {
            queue: LockFreeRingQueue::new(),
            wake_signal: Signal::new(),
            should_stop: AtomicBool::new(false),
            has_stopped: AtomicBool::new(false),
        }
    }

    /// Enqueues a task on the local queue. Returns `false` when the queue is
    /// full; the caller falls back to another worker or runs the task inline.
    pub fn push(&self, task: TaskId) -> bool {
        self.queue.push(task)
    }

    /// Pops from the local queue. Called by the owning worker loop.
    pub fn pop(&self) -> Option<TaskId> {
        self.queue.pop()
    }

    /// What siblings call to steal from this worker. Identical to [`pop`]:
    /// one queue, one discipline.
    ///
    /// [`pop`]: Worker::pop
    pub fn try_steal(&self) -> Option<TaskId> {
        self.queue.pop()
    }

    pub fn wake(&self) {
        self.wake_signal.set();
    }

    /// Blocks until the wake signal is raised, then clears it.
    pub fn wait_for_work(&self) {
        self.wake_signal.wait_and_clear();
    }

    pub fn request_stop(&self) {
        self.should_stop.store(true, Ordering::Relaxed);
    }

    pub fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::Relaxed)
    }

    pub fn mark_stopped(&self) {
        self.has_stopped.store(true, Ordering::Relaxed);
    }

    pub fn has_stopped(&self) -> bool {
        self.has_stopped.load(Ordering::Relaxed)
    }
}

/// The fixed set of workers. Gives the steal scan its stable index-to-worker
/// lookup.
pub(crate) struct WorkerPool {
    workers: Box<[Worker]>,
}

impl WorkerPool {
    pub fn new(size: usize) -> WorkerPool {
        assert!(size > 0, "worker pool must have at least one worker");
        WorkerPool {
            workers: (0..size).map(|_| Worker::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn worker(&self, index: usize) -> &Worker {
        &self.workers[index]
    }

    /// Scans the other workers' queues starting at `thief + 1`, wrapping, and
    /// returns the first task found.
    pub fn steal_from_siblings(&self, thief: usize) -> Option<TaskId> {
        let count = self.workers.len();
        for offset in 1..count {
            let victim = (thief + offset) % count;
            if let Some(task) = self.workers[victim].try_steal() {
                tracing::trace!(thief, victim, "stole task");
                return Some(task);
            }
        }
        None
    }

    /// Scans every queue in index order. Used by helper threads that are not
    /// registered workers.
    pub fn steal_any(&self) -> Option<TaskId> {
        self.workers.iter().find_map(Worker::try_steal)
    }

    /// Broadcasts stop + wake to every worker. Racy if producers are still
    /// submitting: the shutdown protocol requires all producers to quiesce
    /// first.
    pub fn request_stop_all(&self) {
        for worker in self.workers.iter() {
            worker.request_stop();
            worker.wake();
        }
    }
}
