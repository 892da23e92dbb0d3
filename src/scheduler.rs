//! The shared scheduling core: task placement, the worker main loop,
//! completion bookkeeping, and the cooperative help-until loop.
//!
//! A single [`Scheduler`] is shared (via `Arc`) between the owning
//! [`TaskManager`], every worker thread, and any helper thread currently
//! running tasks. No global lock exists; the only blocking point in the
//! system is a worker's wake signal while its queue and all steal targets are
//! empty.
//!
//! [`TaskManager`]: crate::manager::TaskManager

use std::{cell::Cell, panic::AssertUnwindSafe, sync::atomic::Ordering, sync::Arc, thread};

use crate::{
    atomic::AtomicCell,
    manager::TaskContext,
    task::{TaskArena, TaskFn, TaskId, TaskState},
    worker::WorkerPool,
};

pub(crate) struct Scheduler {
    pool: WorkerPool,
    arena: TaskArena,
    /// Round-robin cursor for submissions from threads outside the pool.
    next_worker: AtomicCell<u32>,
}

/// Identifies the worker loop running on the current thread, if any. Lets
/// submissions from inside the pool go to the submitter's own queue, which
/// is what bounds each queue to two concurrent producers in the common case,
/// and lets the help-until loop prefer local work.
#[derive(Clone, Copy)]
struct CurrentWorker {
    scheduler: usize,
    index: usize,
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<CurrentWorker>> = const { Cell::new(None) };
}

impl Scheduler {
    pub fn new(workers: usize, arena_capacity: usize) -> Scheduler {
        Scheduler {
            pool: WorkerPool::new(workers),
            arena: TaskArena::new(arena_capacity),
            next_worker: AtomicCell::new(0),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn arena(&self) -> &TaskArena {
        &self.arena
    }

    /// An opaque identity for matching thread-local worker registrations to
    /// the scheduler that owns them. Stable because the scheduler sits behind
    /// an `Arc` for its whole life.
    fn id(&self) -> usize {
        self as *const Scheduler as usize
    }

    /// Returns the current thread's worker index if it belongs to this
    /// scheduler's pool.
    fn current_worker_index(&self) -> Option<usize> {
        CURRENT_WORKER.with(|current| {
            current
                .get()
                .filter(|worker| worker.scheduler == self.id())
                .map(|worker| worker.index)
        })
    }

    pub fn create(&self, body: TaskFn, parent: Option<TaskId>) -> TaskId {
        self.arena.acquire(body, parent)
    }

    /// Places a task on a worker queue and wakes that worker. Starts at the
    /// submitter's own queue when called from inside the pool, otherwise at
    /// the round-robin cursor; on a full queue it retries the next worker
    /// circularly. Submission never fails: if every queue is full the task
    /// runs inline on the calling thread.
    pub fn submit(&self, id: TaskId) {
        let task = self.arena.task(id);
        assert!(
            task.state() == TaskState::Created,
            "task {} submitted more than once",
            id.index
        );
        task.set_state(TaskState::Queued);

        let count = self.pool.len();
        let start = match self.current_worker_index() {
            Some(index) => index,
            None => self.next_worker.fetch_add(1) as usize % count,
        };

        for offset in 0..count {
            let worker = self.pool.worker((start + offset) % count);
            if worker.push(id) {
                worker.wake();
                return;
            }
        }

        // Capacity failures are recovered locally, never surfaced.
        tracing::warn!(task = id.index, "all worker queues full, running task inline");
        self.execute(id);
    }

    /// Runs a claimed task to completion on the calling thread.
    ///
    /// A panicking body is caught and logged: the completion bookkeeping
    /// below must run as if the body had returned, otherwise ancestors
    /// cooperatively waiting on this task would never be released.
    pub fn execute(&self, id: TaskId) {
        let task = self.arena.task(id);
        task.set_state(TaskState::Running);

        // SAFETY: This thread claimed the task from a queue (or the inline
        // fallback), so it is the single executor.
        let body = unsafe { task.take_body() }.expect("task executed without a body");

        let context = TaskContext::new(self, id);
        if std::panic::catch_unwind(AssertUnwindSafe(|| body(&context))).is_err() {
            tracing::error!(task = id.index, "task body panicked");
        }

        self.complete(id);
    }

    /// Retires one unit of pending work on `id` (its own body, or one
    /// finished child) and propagates completion up the spawn tree. A parent
    /// whose body returned long ago finishes here, on the thread that
    /// finished its last descendant.
    fn complete(&self, id: TaskId) {
        let mut current = id;
        loop {
            let task = self.arena.task(current);
            let previous = task.pending().fetch_sub(1);
            assert!(
                previous != 0,
                "task {} completed more work than it owned",
                current.index
            );
            if previous != 1 {
                return;
            }

            // A holder may release the task the instant it observes
            // Finished, recycling the slot. The parent link must be read
            // first; the Finished store is the slot's last touch.
            let parent = task.parent();
            task.set_state(TaskState::Finished);

            match parent {
                Some(parent) => current = parent,
                None => return,
            }
        }
    }

    pub fn is_finished(&self, id: TaskId) -> bool {
        self.arena.task(id).state() == TaskState::Finished
    }

    /// How many units of work `id` still waits on (its own unreturned body
    /// counts as one).
    pub fn pending_of(&self, id: TaskId) -> u32 {
        self.arena.task(id).pending().load(Ordering::Acquire)
    }

    /// Lets the calling thread behave like a worker until `predicate` holds.
    ///
    /// The thread pops and steals exactly as the worker loop does, re-checks
    /// the predicate after every executed task, and yields (rather than
    /// blocks) when no work is found, since it is not registered to receive
    /// wake signals. This is the mechanism behind a task body's own
    /// [`wait_for`]: a logical task awaiting children keeps the thread
    /// working on other runnable tasks, which is what keeps the system
    /// deadlock-free when more logical tasks wait than physical threads
    /// exist.
    ///
    /// [`wait_for`]: crate::manager::TaskContext::wait_for
    pub fn run_until<F>(&self, predicate: F)
    where
        F: Fn() -> bool,
    {
        while !predicate() {
            match self.find_work() {
                Some(id) => self.execute(id),
                None => thread::yield_now(),
            }
        }
    }

    /// Finds a runnable task: the local queue first when called from a pool
    /// worker, then the sibling scan; plain index-order scan for outside
    /// threads.
    fn find_work(&self) -> Option<TaskId> {
        match self.current_worker_index() {
            Some(index) => self
                .pool
                .worker(index)
                .pop()
                .or_else(|| self.pool.steal_from_siblings(index)),
            None => self.pool.steal_any(),
        }
    }
}

/// The worker thread entry point.
///
/// Blocks on the wake signal; once woken, drains the local queue and steals
/// from siblings until no work remains anywhere, then re-blocks. A stop
/// request is honored at both loop levels.
pub(crate) fn worker_main(scheduler: Arc<Scheduler>, index: usize) {
    CURRENT_WORKER.with(|current| {
        current.set(Some(CurrentWorker {
            scheduler: scheduler.id(),
            index,
        }));
    });

    tracing::trace!(worker = index, "worker thread started");
    let worker = scheduler.pool().worker(index);

    loop {
        worker.wait_for_work();

        if worker.should_stop() {
            break;
        }

        while !worker.should_stop() {
            let task = worker
                .pop()
                .or_else(|| scheduler.pool().steal_from_siblings(index));

            match task {
                Some(id) => scheduler.execute(id),
                None => break,
            }
        }
    }

    worker.mark_stopped();
    tracing::trace!(worker = index, "worker thread stopped");
}
