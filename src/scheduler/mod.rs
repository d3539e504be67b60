//! Task Scheduler Module
//!
//! Builds the task-level surface on top of the delay queue.
//!
//! ## Architecture Overview
//! 1. **Offer**: a workflow driver schedules a task id for a release time.
//! 2. **Poll**: scheduler processes block until some id falls due and claim it.
//!    The claim is the queue node's delete, so exactly one process wins.
//! 3. **Report**: the running task writes progress and messages to the registry
//!    and checks its cancellation flag.
//! 4. **Finalize**: `task_done` removes the task's registry entry.
//!
//! ## Submodules
//! - **`scheduler`**: `TaskScheduler` (offer, poll, get_scheduled, get_state, shutdown).
//! - **`progress`**: `TaskProgressRegistry` and the per-task `TaskHandle`.
//! - **`state`**: recursive coordination-tree snapshot for operators.
//! - **`executor`**: worker pool running a handler per claimed id.
//! - **`handlers`** / **`protocol`**: operator HTTP endpoints.

pub mod executor;
pub mod handlers;
pub mod progress;
pub mod protocol;
pub mod scheduler;
pub mod state;

pub use progress::{TaskHandle, TaskProgressRegistry};
pub use scheduler::{NO_TASK, TaskScheduler};
