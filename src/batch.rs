//! Batches: ordered groups of task handles submitted and awaited together.

use std::{mem, ops::Index};

use crate::{scheduler::Scheduler, task::TaskHandle};

/// An ordered sequence of task handles with aggregate completion tracking.
///
/// Dropping a batch releases every handle still inside it, on any exit path
/// (normal return, early return, or unwinding), so handles parked in a batch
/// can never leak. Use [`TaskBatch::into_handles`] to take ownership back and
/// opt out of that behavior.
///
/// The usual shape inside a task body:
///
/// ```ignore
/// let mut batch = ctx.create_batch();
/// for work in jobs {
///     batch.add(ctx.create_task(work));
/// }
/// ctx.submit_batch(&batch);
/// ctx.wait_for(|| batch.are_all_finished());
/// // read results out of the members, then let the batch drop
/// ```
pub struct TaskBatch<'s> {
    scheduler: &'s Scheduler,
    handles: Vec<TaskHandle>,
}

impl<'s> TaskBatch<'s> {
    pub(crate) fn new(scheduler: &'s Scheduler) -> TaskBatch<'s> {
        TaskBatch {
            scheduler,
            handles: Vec::new(),
        }
    }

    /// Moves a handle into the batch.
    pub fn add(&mut self, handle: TaskHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TaskHandle> {
        self.handles.get(index)
    }

    pub fn handles(&self) -> &[TaskHandle] {
        &self.handles
    }

    /// True once every member task has finished.
    pub fn are_all_finished(&self) -> bool {
        self.handles
            .iter()
            .all(|handle| self.scheduler.is_finished(handle.id))
    }

    /// Submits every member, in order. Members pushed from one thread become
    /// visible to consumers in this order.
    pub(crate) fn submit_all(&self, scheduler: &Scheduler) {
        debug_assert!(
            std::ptr::eq(self.scheduler, scheduler),
            "batch submitted to a different task manager than it was created on"
        );
        for handle in &self.handles {
            scheduler.submit(handle.id);
        }
    }

    /// Releases every handle still in the batch, immediately.
    pub fn release_all(&mut self) {
        for handle in self.handles.drain(..) {
            self.scheduler.arena().release(handle.id);
        }
    }

    /// Takes the handles out of the batch, opting out of release-on-drop.
    /// The caller becomes responsible for releasing each one.
    pub fn into_handles(mut self) -> Vec<TaskHandle> {
        mem::take(&mut self.handles)
    }
}

impl Index<usize> for TaskBatch<'_> {
    type Output = TaskHandle;

    fn index(&self, index: usize) -> &TaskHandle {
        &self.handles[index]
    }
}

impl Drop for TaskBatch<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}
