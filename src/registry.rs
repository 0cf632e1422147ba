use std::collections::HashMap;

use uuid::Uuid;

use crate::channel::{latest_by_name, StorageChannel};
use crate::error::{Error, Result};
use crate::task::{Task, TaskStatus, DESCRIPTOR_PREFIX};

/// In-memory view of the task set.
///
/// The registry is a cache: the durable descriptors in the channel are the
/// source of truth, and [`TaskRegistry::rebuild`] reconstructs the whole map
/// from them after a restart.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<Uuid, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task record.
    pub fn put(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    pub fn get(&self, id: Uuid) -> Result<&Task> {
        self.tasks
            .get(&id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    pub fn get_mut(&mut self, id: Uuid) -> Result<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Tasks matching the optional status filter, most recently updated
    /// first, capped at `limit`.
    pub fn list(&self, filter: Option<TaskStatus>, limit: usize) -> Vec<Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| filter.map_or(true, |s| t.status == s))
            .collect();
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        tasks.into_iter().take(limit).cloned().collect()
    }

    /// Running tasks that have exceeded their residency bound.
    pub fn expired_tasks(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<Uuid> {
        self.tasks
            .values()
            .filter(|t| t.is_expired(now))
            .map(|t| t.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Reconstructs the registry by listing and parsing every descriptor in
    /// the channel. Duplicate descriptors under one name resolve by recency;
    /// a corrupt descriptor is logged and skipped, never aborting startup.
    pub async fn rebuild(channel: &dyn StorageChannel) -> Result<Self> {
        let entries = channel.list(DESCRIPTOR_PREFIX, None).await?;
        let mut registry = Self::new();
        for meta in latest_by_name(entries) {
            let data = match channel.get(&meta.id).await {
                Ok(data) => data,
                Err(Error::ObjectNotFound(_)) => continue, // deleted mid-scan
                Err(e) => return Err(e),
            };
            match serde_json::from_slice::<Task>(&data) {
                Ok(task) => registry.put(task),
                Err(e) => {
                    tracing::warn!(
                        object = %meta.name,
                        error = %e,
                        "Skipping corrupt task descriptor"
                    );
                }
            }
        }
        tracing::info!(tasks = registry.len(), "Task registry rebuilt from channel");
        Ok(registry)
    }
}
