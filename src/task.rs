//! The schedulable unit of work and the arena it lives in.
//!
//! Tasks are never allocated directly: the [`TaskArena`] owns a fixed array
//! of slots and recycles them through a free list, keeping allocation off the
//! scheduling hot path. A task is identified by a [`TaskId`], an index into
//! the arena plus the slot's generation at acquisition time. Every access
//! checks the generation, so using a handle after its task was released is a
//! detectable fatal error rather than silent corruption.
//!
//! Lifetime is manual reference counting: a task is recycled when its last
//! holder releases it. The scheduler itself does not hold references; queues
//! move plain ids, and the documented contract is that a handle is released
//! only once the task has finished (or was never submitted).

use std::{cell::UnsafeCell, fmt, sync::atomic::Ordering};

use parking_lot::Mutex;

use crate::{atomic::AtomicCell, manager::TaskContext};

/// Capacity in bytes of the inline argument/result buffer carried by every
/// task. The buffer is used for both input and output; the byte layout is
/// entirely caller-defined.
pub const TASK_DATA_SIZE: usize = 64;

/// The type-erased body of a task.
pub(crate) type TaskFn = Box<dyn FnOnce(&TaskContext) + Send>;

/// Where a task is in its lifecycle.
///
/// A task only becomes `Finished` after its own body has returned *and* all
/// of its descendants have finished.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum TaskState {
    Created = 0,
    Queued = 1,
    Running = 2,
    Finished = 3,
}

impl TaskState {
    fn from_u32(value: u32) -> TaskState {
        match value {
            0 => TaskState::Created,
            1 => TaskState::Queued,
            2 => TaskState::Running,
            3 => TaskState::Finished,
            _ => panic!("corrupt task state: {value}"),
        }
    }
}

/// A generation-checked index into the task arena. This is what worker queues
/// actually move around.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaskId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}v{})", self.index, self.generation)
    }
}

/// An owned reference to a task.
///
/// Handles are move-only: releasing one consumes it, so a task cannot be
/// released twice through safe code. Dropping a handle without releasing it
/// leaks the task's reference count (visible through
/// [`TaskManager::are_all_tasks_released`]); put handles in a
/// [`TaskBatch`] when you want them released on every exit path.
///
/// [`TaskManager::are_all_tasks_released`]: crate::manager::TaskManager::are_all_tasks_released
/// [`TaskBatch`]: crate::batch::TaskBatch
#[must_use]
pub struct TaskHandle {
    pub(crate) id: TaskId,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskHandle").field(&self.id).finish()
    }
}

/// One arena slot.
pub(crate) struct Task {
    /// Current [`TaskState`], written with Release and read with Acquire so a
    /// thread that observes `Finished` also observes the task's results.
    state: AtomicCell<u32>,
    /// Unfinished work this task still waits on: one for its own body plus
    /// one per unfinished child. The task finishes when this reaches zero.
    pending: AtomicCell<u32>,
    /// Manual reference count; the slot is recycled when it reaches zero.
    ref_count: AtomicCell<u32>,
    /// Bumped on every recycle to invalidate stale ids.
    generation: AtomicCell<u32>,
    /// Weak back-reference to the parent. Written once while the slot is
    /// privately owned by the creating thread, read only on the completion
    /// path.
    parent: UnsafeCell<Option<TaskId>>,
    /// The body, taken by the single thread that executes the task.
    body: UnsafeCell<Option<TaskFn>>,
    /// Inline argument/result buffer. Exclusively owned by whichever single
    /// logical step currently reads or writes it: the submitter before the
    /// run, the body during the run, the reader after the finish.
    data: UnsafeCell<[u8; TASK_DATA_SIZE]>,
}

// SAFETY: The `UnsafeCell` fields are governed by the lifecycle protocol
// documented on each field; the atomic fields synchronize themselves.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Task {
    fn new() -> Task {
        Task {
            state: AtomicCell::new(TaskState::Created as u32),
            pending: AtomicCell::new(0),
            ref_count: AtomicCell::new(0),
            generation: AtomicCell::new(0),
            parent: UnsafeCell::new(None),
            body: UnsafeCell::new(None),
            data: UnsafeCell::new([0; TASK_DATA_SIZE]),
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TaskState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn pending(&self) -> &AtomicCell<u32> {
        &self.pending
    }

    pub fn parent(&self) -> Option<TaskId> {
        // SAFETY: Written only in `TaskArena::acquire`/`recycle` while the
        // slot is off the free list but not yet (or no longer) shared.
        unsafe { *self.parent.get() }
    }

    /// Takes the body out of the slot for execution.
    ///
    /// # Safety
    ///
    /// Only the single thread that claimed the task from a queue may call
    /// this, exactly once per submission.
    pub unsafe fn take_body(&self) -> Option<TaskFn> {
        (*self.body.get()).take()
    }

    /// Copies `bytes` into the front of the inline buffer.
    ///
    /// The scheduler performs no aliasing protection on the buffer; callers
    /// must uphold the single-role ownership contract documented on `data`.
    pub fn write_data(&self, bytes: &[u8]) {
        assert!(
            bytes.len() <= TASK_DATA_SIZE,
            "payload of {} bytes exceeds the {TASK_DATA_SIZE}-byte task buffer",
            bytes.len()
        );
        // SAFETY: Single-role ownership, see above.
        unsafe {
            (&mut *self.data.get())[..bytes.len()].copy_from_slice(bytes);
        }
    }

    /// Copies the front of the inline buffer into `out`. Same ownership
    /// contract as [`Task::write_data`].
    pub fn read_data(&self, out: &mut [u8]) {
        assert!(
            out.len() <= TASK_DATA_SIZE,
            "read of {} bytes exceeds the {TASK_DATA_SIZE}-byte task buffer",
            out.len()
        );
        // SAFETY: Single-role ownership, see above.
        unsafe {
            out.copy_from_slice(&(&*self.data.get())[..out.len()]);
        }
    }

    /// Raw pointer to the inline buffer, for callers that marshal their own
    /// formats. Dereferencing it is subject to the same ownership contract.
    pub fn data_ptr(&self) -> *mut u8 {
        self.data.get().cast()
    }
}

/// Fixed-capacity pool of task slots with a free list.
pub(crate) struct TaskArena {
    tasks: Box<[Task]>,
    free: Mutex<Vec<u32>>,
    /// Number of currently acquired (not yet recycled) slots. Used by the
    /// shutdown diagnostic `are_all_tasks_released`.
    live: AtomicCell<u32>,
}

impl TaskArena {
    pub fn new(capacity: usize) -> TaskArena {
        assert!(capacity > 0, "task arena capacity must be non-zero");
        assert!(
            capacity <= u32::MAX as usize,
            "task arena capacity must fit in a u32 index"
        );
        let tasks: Box<[Task]> = (0..capacity).map(|_| Task::new()).collect();
        // Hand out low indices first.
        let free = (0..capacity as u32).rev().collect();
        TaskArena {
            tasks,
            free: Mutex::new(free),
            live: AtomicCell::new(0),
        }
    }

    /// Acquires a recycled slot, initializing it with `body` and an optional
    /// parent link. The new task starts with one reference (the caller's
    /// handle) and one pending unit (its own body). A parent's dependency
    /// counter is raised immediately, before the child can possibly run.
    ///
    /// Arena exhaustion is a sizing error, not a runtime condition: it is
    /// fatal.
    pub fn acquire(&self, body: TaskFn, parent: Option<TaskId>) -> TaskId {
        let index = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| panic!("task arena exhausted ({} slots)", self.tasks.len()));

        let task = &self.tasks[index as usize];
        task.ref_count.store(1, Ordering::Relaxed);
        task.pending.store(1, Ordering::Relaxed);
        task.set_state(TaskState::Created);
        // SAFETY: The slot came off the free list and has not been shared
        // yet, so this thread owns it exclusively.
        unsafe {
            *task.parent.get() = parent;
            *task.body.get() = Some(body);
        }

        if let Some(parent_id) = parent {
            self.task(parent_id).pending.increment();
        }

        self.live.increment();
        TaskId {
            index,
            generation: task.generation.load(Ordering::Relaxed),
        }
    }

    /// Resolves an id to its slot, with a fatal staleness check.
    pub fn task(&self, id: TaskId) -> &Task {
        let task = &self.tasks[id.index as usize];
        assert!(
            task.generation.load(Ordering::Relaxed) == id.generation,
            "stale task handle: task {} was already released and recycled",
            id.index
        );
        task
    }

    /// Increments a task's reference count.
    pub fn retain(&self, id: TaskId) {
        self.task(id).ref_count.increment();
    }

    /// Drops one reference; the last release recycles the slot. Releasing a
    /// task whose count already reached zero is fatal.
    pub fn release(&self, id: TaskId) {
        let task = self.task(id);
        let previous = task.ref_count.fetch_sub(1);
        assert!(
            previous != 0,
            "task {} released after its reference count reached zero",
            id.index
        );
        if previous == 1 {
            self.recycle(id);
        }
    }

    fn recycle(&self, id: TaskId) {
        let task = &self.tasks[id.index as usize];
        // Invalidate outstanding ids before the slot can be re-acquired.
        task.generation.increment();
        // SAFETY: The reference count reached zero, so no other holder
        // remains; this thread owns the slot until it re-enters the free
        // list.
        unsafe {
            *task.body.get() = None;
            *task.parent.get() = None;
        }
        let remaining = self.live.fetch_sub(1);
        assert!(remaining != 0, "task arena live count underflow");
        self.free.lock().push(id.index);
    }

    /// Diagnostic invariant check: `true` once every acquired task has been
    /// released back to the arena.
    pub fn all_released(&self) -> bool {
        self.live.load(Ordering::Acquire) == 0
    }
}
