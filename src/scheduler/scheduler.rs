//! Task Scheduler Facade
//!
//! Presents a [`SequencedQueue`] as a delay scheduler for task ids, plus a
//! read-only view for operators.
//!
//! Steady-state calls never return an error: `offer` answers `false`, `poll`
//! answers [`NO_TASK`], and the introspection calls answer empty results. Use
//! [`TaskScheduler::try_poll`] when the cause matters.

use super::state::{self, StateNode};
use crate::config::SchedulerConfig;
use crate::coordination::{Acl, Coordinator};
use crate::queue::{DelayItem, QueueError, QueueResult, SequencedQueue};

use std::sync::Arc;
use std::time::Duration;

/// Sentinel id meaning "no task".
pub const NO_TASK: i64 = -1;

pub struct TaskScheduler {
    client: Arc<dyn Coordinator>,
    root: String,
    queue: SequencedQueue,
}

impl TaskScheduler {
    /// Binds the scheduler to `<root>/queue`, creating it if needed. Fails only
    /// if that path cannot be created.
    pub async fn new(client: Arc<dyn Coordinator>, config: &SchedulerConfig) -> QueueResult<Self> {
        let queue = SequencedQueue::create(client.clone(), &config.queue_path(), Acl::Open)
            .await?
            .with_transient_backoff(config.transient_backoff());

        tracing::info!("Task scheduler rooted at {}", config.root);

        Ok(Self {
            client,
            root: config.root.clone(),
            queue,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn queue(&self) -> &SequencedQueue {
        &self.queue
    }

    /// Schedules `id` for release at `release_time` (ms since epoch).
    pub async fn offer(&self, release_time: i64, id: i64) -> bool {
        if id == NO_TASK {
            tracing::debug!("Refusing to schedule the no-task sentinel");
            return false;
        }

        match self.queue.offer(&DelayItem::new(id, release_time)).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to schedule task {}: {}", id, e);
                false
            }
        }
    }

    /// Next due task id, or [`NO_TASK`] if none arrived within `timeout` or the
    /// coordination service could not be used. `None` waits without bound.
    pub async fn poll(&self, timeout: Option<Duration>) -> i64 {
        match self.try_poll(timeout).await {
            Ok(Some(id)) => id,
            Ok(None) => NO_TASK,
            Err(e) => {
                tracing::warn!("Poll failed: {}", e);
                NO_TASK
            }
        }
    }

    /// `poll(None)`.
    pub async fn poll_forever(&self) -> i64 {
        self.poll(None).await
    }

    /// Like [`Self::poll`] but distinguishes "nothing due" (`Ok(None)`) from a fault.
    pub async fn try_poll(&self, timeout: Option<Duration>) -> QueueResult<Option<i64>> {
        Ok(self.queue.take(timeout).await?.map(|item| item.id()))
    }

    /// Up to `max_size` ids whose release time lies strictly between `start`
    /// and `end`, in queue order. Nothing is consumed.
    pub async fn get_scheduled(&self, start: i64, end: i64, max_size: usize) -> Vec<i64> {
        let entries = match self.queue.entries().await {
            Ok(entries) => entries,
            Err(QueueError::NotFound(_)) => return Vec::new(),
            Err(e) => {
                tracing::warn!("Listing scheduled tasks failed: {}", e);
                return Vec::new();
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            if ids.len() >= max_size {
                break;
            }
            if entry.release_time <= start || entry.release_time >= end {
                continue;
            }

            match self.queue.read(&entry).await {
                Ok(Some(item)) => ids.push(item.id()),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Reading scheduled entry {} failed: {}", entry.name, e);
                }
            }
        }

        ids
    }

    /// Snapshot of everything under the scheduler root.
    pub async fn get_state(&self) -> StateNode {
        state::snapshot(self.client.as_ref(), &self.root).await
    }

    /// Closes the coordination session.
    pub async fn shutdown(&self) {
        match self.client.close().await {
            Ok(()) => tracing::info!("Scheduler session {} closed", self.client.session_id()),
            Err(e) => tracing::warn!("Error while closing scheduler session: {}", e),
        }
    }
}
