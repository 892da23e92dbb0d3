//! A fork-join task scheduler aiming for "speed through simplicity".
//!
//! Weft runs a dynamically growing graph of fine-grained tasks on a fixed
//! pool of worker threads. Each worker owns a bounded lock-free circular
//! queue; load balancing is done by work-stealing (a worker that runs dry
//! scans its siblings' queues), so no central lock or shared run queue exists
//! anywhere on the hot path.
//!
//! Tasks may spawn child tasks while running and cooperatively wait for them:
//! instead of parking the OS thread, a waiting task body re-enters the
//! scheduling loop and executes other runnable tasks. The same mechanism lets
//! any thread, most usefully the application's main thread, temporarily act
//! as a worker through
//! [`TaskManager::run_tasks_using_this_thread_until`](manager::TaskManager::run_tasks_using_this_thread_until).
//!
//! ```no_run
//! use weft::prelude::*;
//!
//! let manager = TaskManager::new();
//!
//! let root = manager.create_task(|ctx| {
//!     let mut batch = ctx.create_batch();
//!     for i in 0u32..8 {
//!         batch.add(ctx.create_task(move |child| {
//!             child.write_data(&(i * i).to_le_bytes());
//!         }));
//!     }
//!     ctx.submit_batch(&batch);
//!     ctx.wait_for(|| batch.are_all_finished());
//!
//!     let mut total = 0u32;
//!     for handle in batch.handles() {
//!         let mut bytes = [0u8; 4];
//!         ctx.read_payload(handle, &mut bytes);
//!         total += u32::from_le_bytes(bytes);
//!     }
//!     ctx.write_data(&total.to_le_bytes());
//! });
//!
//! manager.submit_task(&root);
//! manager.run_tasks_using_this_thread_until(|| manager.is_finished(&root));
//!
//! let mut bytes = [0u8; 4];
//! manager.read_payload(&root, &mut bytes);
//! assert_eq!(u32::from_le_bytes(bytes), 140);
//! manager.release_task(root);
//! ```
//!
//! Task lifetimes are managed by explicit reference counting over a
//! fixed-size arena; there is no garbage collector and no per-task
//! allocation beyond the boxed body. See [`task`] for the lifecycle rules
//! and [`queue`] for the lock-free queue protocol.

pub mod atomic;
pub mod batch;
pub mod manager;
pub mod queue;
pub mod task;

mod scheduler;
mod worker;

pub mod prelude {
    pub use crate::{
        batch::TaskBatch,
        manager::{Config, TaskContext, TaskManager},
        task::{TaskHandle, TaskState, TASK_DATA_SIZE},
    };
}
