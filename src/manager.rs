//! The owning entry point of the scheduler and the execution context handed
//! to running task bodies.
//!
//! A [`TaskManager`] is an explicitly constructed, explicitly owned context
//! object: it creates the worker pool and the task arena at startup and tears
//! both down on drop, after joining every worker. Nothing in this crate is a
//! process-wide static.

use std::{sync::Arc, thread};

use crate::{
    batch::TaskBatch,
    scheduler::{worker_main, Scheduler},
    task::{TaskFn, TaskHandle, TaskId, TASK_DATA_SIZE},
};

/// Deployment parameters for a [`TaskManager`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of pool worker threads. At least one. The default leaves one
    /// hardware thread free for the application thread, which is expected to
    /// help out through
    /// [`TaskManager::run_tasks_using_this_thread_until`].
    pub worker_threads: usize,
    /// Number of task slots in the arena. Exhausting the arena is fatal, so
    /// size this for the peak number of simultaneously live tasks.
    pub arena_capacity: usize,
}

impl Default for Config {
    fn default() -> Config {
        let parallelism = thread::available_parallelism()
            .map(|threads| threads.get())
            .unwrap_or(1);
        Config {
            worker_threads: usize::max(1, parallelism - 1),
            arena_capacity: 2048,
        }
    }
}

/// Creates, schedules, and recycles tasks over a fixed pool of worker
/// threads.
pub struct TaskManager {
    scheduler: Arc<Scheduler>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl TaskManager {
    /// Starts a manager with the default [`Config`].
    pub fn new() -> TaskManager {
        TaskManager::with_config(Config::default())
    }

    /// Starts a manager: allocates the arena, spawns and names the worker
    /// threads.
    pub fn with_config(config: Config) -> TaskManager {
        assert!(
            config.worker_threads > 0,
            "task manager needs at least one worker thread"
        );

        let scheduler = Arc::new(Scheduler::new(config.worker_threads, config.arena_capacity));

        let threads = (0..config.worker_threads)
            .map(|index| {
                let scheduler = Arc::clone(&scheduler);
                thread::Builder::new()
                    .name(format!("weft-worker-{index}"))
                    .spawn(move || worker_main(scheduler, index))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        tracing::info!(
            workers = config.worker_threads,
            arena = config.arena_capacity,
            "task manager started"
        );

        TaskManager { scheduler, threads }
    }

    pub fn worker_count(&self) -> usize {
        self.scheduler.pool().len()
    }

    /// Creates a task with no parent. The returned handle owns one reference;
    /// the task must be submitted (submission is not optional once a handle
    /// exists) and later released.
    pub fn create_task<F>(&self, body: F) -> TaskHandle
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        let body: TaskFn = Box::new(body);
        TaskHandle {
            id: self.scheduler.create(body, None),
        }
    }

    /// Creates a task parented to `parent`: the parent will not finish until
    /// this child has. The parent link is not a reference; release the
    /// parent's handle only after the parent has finished.
    pub fn create_child_task<F>(&self, parent: &TaskHandle, body: F) -> TaskHandle
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        let body: TaskFn = Box::new(body);
        TaskHandle {
            id: self.scheduler.create(body, Some(parent.id)),
        }
    }

    /// Acquires an additional reference to the task, producing a second
    /// handle. Each handle must be released on its own; the task is recycled
    /// only after the last one.
    pub fn retain_task(&self, handle: &TaskHandle) -> TaskHandle {
        self.scheduler.arena().retain(handle.id);
        TaskHandle { id: handle.id }
    }

    /// Queues the task on a worker and wakes it. Never fails; see the
    /// placement policy on the scheduler.
    pub fn submit_task(&self, handle: &TaskHandle) {
        self.scheduler.submit(handle.id);
    }

    /// Submits every task in the batch, in order.
    pub fn submit_batch(&self, batch: &TaskBatch) {
        batch.submit_all(&self.scheduler);
    }

    /// Creates an empty batch tied to this manager. Handles added to it are
    /// released when the batch is dropped.
    pub fn create_batch(&self) -> TaskBatch<'_> {
        TaskBatch::new(&self.scheduler)
    }

    pub fn is_finished(&self, handle: &TaskHandle) -> bool {
        self.scheduler.is_finished(handle.id)
    }

    /// Copies `bytes` into the task's inline buffer. Only valid while the
    /// caller is the buffer's single owner (before submission, or after the
    /// task finished).
    pub fn write_payload(&self, handle: &TaskHandle, bytes: &[u8]) {
        self.scheduler.arena().task(handle.id).write_data(bytes);
    }

    /// Copies the front of the task's inline buffer into `out`. Same
    /// ownership contract as [`TaskManager::write_payload`].
    pub fn read_payload(&self, handle: &TaskHandle, out: &mut [u8]) {
        self.scheduler.arena().task(handle.id).read_data(out);
    }

    /// Raw pointer to the task's inline buffer, for callers marshaling their
    /// own formats. Dereferencing is subject to the single-owner contract.
    pub fn payload_ptr(&self, handle: &TaskHandle) -> *mut u8 {
        self.scheduler.arena().task(handle.id).data_ptr()
    }

    /// Size in bytes of every task's inline buffer.
    pub const fn payload_size(&self) -> usize {
        TASK_DATA_SIZE
    }

    /// Lets the calling thread (typically the application's main thread,
    /// which never joined the pool) execute tasks until `predicate` returns
    /// true. Yields instead of blocking when no work is found.
    pub fn run_tasks_using_this_thread_until<F>(&self, predicate: F)
    where
        F: Fn() -> bool,
    {
        self.scheduler.run_until(predicate);
    }

    /// Releases the caller's reference to the task. The last release recycles
    /// the slot into the arena.
    pub fn release_task(&self, handle: TaskHandle) {
        self.scheduler.arena().release(handle.id);
    }

    /// Diagnostic invariant check: `true` once every created task has been
    /// released back to the arena. Useful as a shutdown assertion.
    pub fn are_all_tasks_released(&self) -> bool {
        self.scheduler.arena().all_released()
    }
}

impl Default for TaskManager {
    fn default() -> TaskManager {
        TaskManager::new()
    }
}

impl Drop for TaskManager {
    /// Stops and joins every worker. Callers must have quiesced all
    /// submissions first; tasks still queued at this point are dropped
    /// unexecuted and their handles leak.
    fn drop(&mut self) {
        self.scheduler.pool().request_stop_all();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        debug_assert!((0..self.scheduler.pool().len())
            .all(|index| self.scheduler.pool().worker(index).has_stopped()));
        tracing::info!("task manager stopped");
    }
}

/// The execution context passed to every running task body. Exposes the
/// owning manager's operations plus cooperative waiting, so a body can spawn
/// and await children without ever blocking its OS thread.
pub struct TaskContext<'s> {
    scheduler: &'s Scheduler,
    task: TaskId,
}

impl<'s> TaskContext<'s> {
    pub(crate) fn new(scheduler: &'s Scheduler, task: TaskId) -> TaskContext<'s> {
        TaskContext { scheduler, task }
    }

    /// Creates an unparented task. See [`TaskManager::create_task`].
    pub fn create_task<F>(&self, body: F) -> TaskHandle
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        let body: TaskFn = Box::new(body);
        TaskHandle {
            id: self.scheduler.create(body, None),
        }
    }

    /// Creates a task parented to the *running* task: the current task will
    /// not finish until the child has.
    pub fn create_child_task<F>(&self, body: F) -> TaskHandle
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        let body: TaskFn = Box::new(body);
        TaskHandle {
            id: self.scheduler.create(body, Some(self.task)),
        }
    }

    pub fn submit_task(&self, handle: &TaskHandle) {
        self.scheduler.submit(handle.id);
    }

    pub fn submit_batch(&self, batch: &TaskBatch) {
        batch.submit_all(self.scheduler);
    }

    pub fn create_batch(&self) -> TaskBatch<'s> {
        TaskBatch::new(self.scheduler)
    }

    pub fn is_finished(&self, handle: &TaskHandle) -> bool {
        self.scheduler.is_finished(handle.id)
    }

    pub fn release_task(&self, handle: TaskHandle) {
        self.scheduler.arena().release(handle.id);
    }

    /// Cooperatively waits until `predicate` holds, executing other runnable
    /// tasks on this thread in the meantime. This is how a task awaits its
    /// children or a batch: the OS thread is never parked inside a task body.
    pub fn wait_for<F>(&self, predicate: F)
    where
        F: Fn() -> bool,
    {
        self.scheduler.run_until(predicate);
    }

    /// Cooperatively waits until every child spawned by the current task has
    /// finished.
    pub fn wait_for_children(&self) {
        // Pending work drops back to exactly one, the still-running body,
        // once all children are done.
        self.wait_for(|| self.scheduler.pending_of(self.task) == 1);
    }

    /// Copies `bytes` into the running task's own inline buffer (typically
    /// its result).
    pub fn write_data(&self, bytes: &[u8]) {
        self.scheduler.arena().task(self.task).write_data(bytes);
    }

    /// Copies the front of the running task's own inline buffer into `out`
    /// (typically its arguments).
    pub fn read_data(&self, out: &mut [u8]) {
        self.scheduler.arena().task(self.task).read_data(out);
    }

    /// Raw pointer to the running task's inline buffer.
    pub fn raw_data_ptr(&self) -> *mut u8 {
        self.scheduler.arena().task(self.task).data_ptr()
    }

    /// Size in bytes of the inline buffer.
    pub const fn data_size(&self) -> usize {
        TASK_DATA_SIZE
    }

    /// Reads another task's inline buffer, typically a finished child's
    /// result. The caller must be the buffer's single owner at this point.
    pub fn read_payload(&self, handle: &TaskHandle, out: &mut [u8]) {
        self.scheduler.arena().task(handle.id).read_data(out);
    }

    /// Writes another task's inline buffer, typically a not-yet-submitted
    /// child's arguments.
    pub fn write_payload(&self, handle: &TaskHandle, bytes: &[u8]) {
        self.scheduler.arena().task(handle.id).write_data(bytes);
    }
}
