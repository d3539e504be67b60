//! Task Progress Registry
//!
//! Per-task progress counters, status messages and cancellation flags, kept
//! in the coordination service so every scheduler process and the operator
//! view see the same state:
//!
//! ```text
//! <root>/tasks/progress/<taskId>   8-byte big-endian counter
//! <root>/tasks/messages/<taskId>   UTF-8 text
//! <root>/tasks/cancelled/<taskId>  empty flag node
//! ```
//!
//! Cancellation is advisory: executors check [`TaskHandle::is_cancelled`]
//! themselves. Entries live until [`TaskProgressRegistry::task_done`].

use crate::coordination::coordinator::ensure_path;
use crate::coordination::types::join_path;
use crate::coordination::{Acl, CoordError, CoordResult, Coordinator, CreateMode};
use crate::queue::item::decode_id;
use crate::queue::{QueueError, QueueResult};

use std::collections::HashMap;
use std::sync::Arc;

pub struct TaskProgressRegistry {
    client: Arc<dyn Coordinator>,
    progress_dir: String,
    messages_dir: String,
    cancelled_dir: String,
}

impl TaskProgressRegistry {
    /// Creates the three entry directories under `tasks_root`.
    pub async fn new(client: Arc<dyn Coordinator>, tasks_root: &str) -> QueueResult<Arc<Self>> {
        let registry = Self {
            progress_dir: join_path(tasks_root, "progress"),
            messages_dir: join_path(tasks_root, "messages"),
            cancelled_dir: join_path(tasks_root, "cancelled"),
            client,
        };

        for dir in [
            &registry.progress_dir,
            &registry.messages_dir,
            &registry.cancelled_dir,
        ] {
            ensure_path(registry.client.as_ref(), dir, Acl::Open)
                .await
                .map_err(|source| QueueError::Configuration {
                    path: dir.clone(),
                    source,
                })?;
        }

        tracing::info!("Progress registry ready under {}", tasks_root);
        Ok(Arc::new(registry))
    }

    /// Executor-side handle for one task.
    pub fn task(self: &Arc<Self>, task_id: i64) -> TaskHandle {
        TaskHandle {
            task_id,
            registry: self.clone(),
        }
    }

    pub async fn set_progress(&self, task_id: i64, value: i64) -> CoordResult<()> {
        let path = join_path(&self.progress_dir, &task_id.to_string());
        self.upsert(&self.progress_dir, &path, value.to_be_bytes().to_vec())
            .await?;
        tracing::trace!("Task {} progress {}", task_id, value);
        Ok(())
    }

    pub async fn set_message(&self, task_id: i64, message: &str) -> CoordResult<()> {
        let path = join_path(&self.messages_dir, &task_id.to_string());
        self.upsert(&self.messages_dir, &path, message.as_bytes().to_vec())
            .await?;
        tracing::trace!("Task {} message '{}'", task_id, message);
        Ok(())
    }

    /// All current progress counters. Faults yield an empty map.
    pub async fn get_progress(&self) -> HashMap<i64, i64> {
        match self
            .read_entries(&self.progress_dir, |payload| decode_id(payload).ok())
            .await
        {
            Ok(progress) => progress,
            Err(e) => {
                tracing::warn!("Reading task progress failed: {}", e);
                HashMap::new()
            }
        }
    }

    /// All current status messages. Faults yield an empty map.
    pub async fn get_messages(&self) -> HashMap<i64, String> {
        match self
            .read_entries(&self.messages_dir, |payload| {
                String::from_utf8(payload.to_vec()).ok()
            })
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Reading task messages failed: {}", e);
                HashMap::new()
            }
        }
    }

    /// Flags the task as cancelled. Nothing is interrupted.
    pub async fn cancel(&self, task_id: i64) -> CoordResult<()> {
        let path = join_path(&self.cancelled_dir, &task_id.to_string());

        loop {
            match self
                .client
                .create(&path, Vec::new(), Acl::Open, CreateMode::Persistent)
                .await
            {
                Ok(_) | Err(CoordError::NodeExists(_)) => break,
                Err(CoordError::NoNode(_)) => {
                    ensure_path(self.client.as_ref(), &self.cancelled_dir, Acl::Open).await?;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("Task {} cancelled", task_id);
        Ok(())
    }

    /// Whether the task has been flagged. Faults read as "not cancelled".
    pub async fn is_cancelled(&self, task_id: i64) -> bool {
        let path = join_path(&self.cancelled_dir, &task_id.to_string());
        match self.client.exists(&path).await {
            Ok(stat) => stat.is_some(),
            Err(e) => {
                tracing::warn!("Checking cancellation of task {} failed: {}", task_id, e);
                false
            }
        }
    }

    /// Removes the task's progress, message and flag. Calling it again, or for
    /// an unknown id, does nothing.
    pub async fn task_done(&self, task_id: i64) -> CoordResult<()> {
        let name = task_id.to_string();

        for dir in [&self.progress_dir, &self.messages_dir, &self.cancelled_dir] {
            match self.client.delete(&join_path(dir, &name), None).await {
                Ok(()) | Err(CoordError::NoNode(_)) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::debug!("Task {} finalized", task_id);
        Ok(())
    }

    /// Set-or-create. Races with another writer creating the same node are
    /// resolved by retrying the set.
    async fn upsert(&self, dir: &str, path: &str, data: Vec<u8>) -> CoordResult<()> {
        loop {
            match self.client.set_data(path, data.clone(), None).await {
                Ok(_) => return Ok(()),
                Err(CoordError::NoNode(_)) => {}
                Err(e) => return Err(e),
            }

            match self
                .client
                .create(path, data.clone(), Acl::Open, CreateMode::Persistent)
                .await
            {
                Ok(_) => return Ok(()),
                Err(CoordError::NodeExists(_)) => continue,
                Err(CoordError::NoNode(_)) => {
                    tracing::warn!("Directory {} vanished, recreating", dir);
                    ensure_path(self.client.as_ref(), dir, Acl::Open).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_entries<T>(
        &self,
        dir: &str,
        decode: impl Fn(&[u8]) -> Option<T> + Send + Sync,
    ) -> CoordResult<HashMap<i64, T>>
    where
        T: Send,
    {
        let mut entries = HashMap::new();

        for name in self.client.get_children(dir).await? {
            let Ok(task_id) = name.parse::<i64>() else {
                tracing::warn!("Ignoring non-numeric entry {} in {}", name, dir);
                continue;
            };

            match self.client.get_data(&join_path(dir, &name)).await {
                Ok((payload, _)) => match decode(&payload) {
                    Some(value) => {
                        entries.insert(task_id, value);
                    }
                    None => tracing::warn!("Undecodable entry {} in {}", name, dir),
                },
                Err(CoordError::NoNode(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(entries)
    }
}

/// The view a running task has of its own entry.
#[derive(Clone)]
pub struct TaskHandle {
    task_id: i64,
    registry: Arc<TaskProgressRegistry>,
}

impl TaskHandle {
    pub fn id(&self) -> i64 {
        self.task_id
    }

    pub async fn set_progress(&self, value: i64) -> CoordResult<()> {
        self.registry.set_progress(self.task_id, value).await
    }

    pub async fn set_message(&self, message: &str) -> CoordResult<()> {
        self.registry.set_message(self.task_id, message).await
    }

    pub async fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled(self.task_id).await
    }
}
