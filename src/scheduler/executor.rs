//! Worker Pool Implementation
//!
//! Spawns workers that pull due task ids from the [`TaskScheduler`] and run a
//! handler for each one.
//!
//! ## Responsibilities
//! - **Polling**: each worker blocks in a bounded `poll`; the queue guarantees
//!   no two workers (in this process or any other) receive the same id.
//! - **Cancellation**: a task flagged before it starts is finalized without
//!   running. A running handler sees the flag through its [`TaskHandle`].
//! - **Finalization**: a successful handler clears the task's registry entry;
//!   a failed or panicking one leaves its entry with a `failed: ...` message
//!   for the operator.

use super::progress::{TaskHandle, TaskProgressRegistry};
use super::scheduler::{NO_TASK, TaskScheduler};

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Type alias for a thread-safe, asynchronous task handler function.
/// It takes the task's handle and returns a Future that resolves to a `Result<()>`.
pub type TaskHandlerFn =
    Arc<dyn Fn(TaskHandle) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Boxes an async closure into a [`TaskHandlerFn`].
pub fn handler_fn<F, Fut>(handler: F) -> TaskHandlerFn
where
    F: Fn(TaskHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |task: TaskHandle| {
        Box::pin(handler(task)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
    })
}

/// What happened to one claimed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    /// Cancelled before the handler started.
    Skipped,
}

/// The engine that drives task execution.
pub struct TaskExecutor {
    scheduler: Arc<TaskScheduler>,
    progress: Arc<TaskProgressRegistry>,
    handler: TaskHandlerFn,
    /// Number of concurrent workers.
    worker_count: usize,
    poll_timeout: Duration,
}

impl TaskExecutor {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        progress: Arc<TaskProgressRegistry>,
        handler: TaskHandlerFn,
        worker_count: usize,
        poll_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            progress,
            handler,
            worker_count,
            poll_timeout,
        })
    }

    /// Spawns the workers and returns their handles.
    /// Each worker runs independently in an infinite loop.
    pub async fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        tracing::info!("Starting {} task workers", self.worker_count);

        let handles = (0..self.worker_count)
            .map(|worker_id| {
                let executor = self.clone();
                tokio::spawn(async move {
                    executor.worker_loop(worker_id).await;
                })
            })
            .collect();

        tracing::info!("Task executor started with {} workers", self.worker_count);
        handles
    }

    async fn worker_loop(&self, worker_id: usize) {
        tracing::info!("Worker {} started", worker_id);

        loop {
            let task_id = self.scheduler.poll(Some(self.poll_timeout)).await;

            if task_id == NO_TASK {
                // Sleep briefly so a failing session does not turn into a hot loop
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }

            tracing::info!("Worker {} claimed task {}", worker_id, task_id);
            let outcome = self.run_task(task_id).await;
            tracing::debug!("Worker {} finished task {}: {:?}", worker_id, task_id, outcome);
        }
    }

    /// Runs one claimed task to completion and records the result.
    pub async fn run_task(&self, task_id: i64) -> TaskOutcome {
        let task = self.progress.task(task_id);

        if task.is_cancelled().await {
            tracing::info!("Task {} was cancelled before it started", task_id);
            self.finalize(task_id).await;
            return TaskOutcome::Skipped;
        }

        // A panicking handler takes down its own task, not the worker
        let result = match tokio::spawn((self.handler)(task.clone())).await {
            Ok(result) => result,
            Err(join_error) => {
                tracing::error!("Handler for task {} aborted: {}", task_id, join_error);
                Err(anyhow::anyhow!("handler aborted: {}", join_error))
            }
        };

        match result {
            Ok(()) => {
                tracing::info!("Task {} completed", task_id);
                self.finalize(task_id).await;
                TaskOutcome::Completed
            }
            Err(e) => {
                tracing::error!("Task {} failed: {}", task_id, e);
                if let Err(report) = task.set_message(&format!("failed: {}", e)).await {
                    tracing::warn!("Could not record failure of task {}: {}", task_id, report);
                }
                TaskOutcome::Failed(e.to_string())
            }
        }
    }

    async fn finalize(&self, task_id: i64) {
        if let Err(e) = self.progress.task_done(task_id).await {
            tracing::error!("Failed to finalize task {}: {}", task_id, e);
        }
    }
}
