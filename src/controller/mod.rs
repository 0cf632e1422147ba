//! Controller process: accepts submissions, writes descriptors into the
//! channel, polls for executor results, and applies residency timeouts.
//!
//! The controller and the executor never talk directly; every byte between
//! them goes through the [`StorageChannel`]. Callers reach the controller
//! through the HTTP tool surface in [`tools`].

pub mod tools;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::{read_latest_json, write_json, StorageChannel};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::registry::TaskRegistry;
use crate::task::{
    is_plain_filename, payload_name, result_name, DispatchSignal, FailureKind, Task, TaskKind,
    TaskResult, TaskStatus, DISPATCH_SIGNAL, MAX_TIMEOUT_MINUTES,
};
use crate::timer::PollTimer;

pub struct Controller {
    channel: Arc<dyn StorageChannel>,
    registry: RwLock<TaskRegistry>,
    config: ControllerConfig,
    /// Namespace identifier reported by `authenticate`.
    namespace: String,
    /// Per-task write exclusion. Tasks are independent, so there is no
    /// global lock; two callers racing on one task serialize here.
    task_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Controller {
    pub fn new(channel: Arc<dyn StorageChannel>, config: ControllerConfig, namespace: String) -> Self {
        Self {
            channel,
            registry: RwLock::new(TaskRegistry::new()),
            config,
            namespace,
            task_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn channel(&self) -> &Arc<dyn StorageChannel> {
        &self.channel
    }

    /// Rebuilds the in-memory registry from the durable descriptors.
    /// Called once on startup; the registry is only a cache of the channel.
    pub async fn recover(&self) -> Result<()> {
        let rebuilt = TaskRegistry::rebuild(self.channel.as_ref()).await?;
        *self.registry.write().await = rebuilt;
        Ok(())
    }

    async fn task_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.task_locks.lock().await;
        locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn persist(&self, task: &Task) -> Result<()> {
        write_json(self.channel.as_ref(), &task.descriptor_name(), task).await?;
        Ok(())
    }

    /// Accepts a new task. The payload and its descriptor are durable before
    /// the task id is returned.
    pub async fn submit(
        &self,
        payload: Bytes,
        filename: &str,
        kind: TaskKind,
        dependencies: Vec<String>,
        timeout_minutes: i64,
    ) -> Result<Uuid> {
        if payload.is_empty() {
            return Err(Error::Validation("payload must not be empty".to_string()));
        }
        if !is_plain_filename(filename) {
            return Err(Error::Validation(format!(
                "filename must be a plain file name: {filename:?}"
            )));
        }
        if timeout_minutes <= 0 || timeout_minutes > MAX_TIMEOUT_MINUTES {
            return Err(Error::Validation(format!(
                "timeout_minutes must be between 1 and {MAX_TIMEOUT_MINUTES}, got {timeout_minutes}"
            )));
        }

        let mut task = Task::new(
            kind,
            String::new(),
            filename.to_string(),
            dependencies,
            timeout_minutes,
        );
        task.payload_name = payload_name(task.id, filename);

        self.channel.put(&task.payload_name, payload).await?;
        self.persist(&task).await?;

        tracing::info!(task_id = %task.id, kind = %kind, filename, "Task submitted");
        let id = task.id;
        self.registry.write().await.put(task);
        Ok(id)
    }

    /// Moves a pending task to running and announces it to the executor via
    /// the dispatch signal object.
    pub async fn dispatch(
        &self,
        id: Uuid,
        execution_params: HashMap<String, serde_json::Value>,
    ) -> Result<Task> {
        let lock = self.task_lock(id).await;
        let _guard = lock.lock().await;

        let mut task = self.registry.read().await.get(id)?.clone();
        if task.status != TaskStatus::Pending {
            return Err(Error::InvalidState {
                task_id: id.to_string(),
                expected: TaskStatus::Pending,
                actual: task.status,
            });
        }

        task.status = TaskStatus::Running;
        task.execution_params = execution_params;
        task.updated_at = Utc::now();

        // Descriptor first: the signal must never point at a task the
        // executor cannot read back as running.
        self.persist(&task).await?;
        let signal = DispatchSignal {
            task_id: id,
            dispatched_at: task.updated_at,
        };
        write_json(self.channel.as_ref(), DISPATCH_SIGNAL, &signal).await?;

        tracing::info!(task_id = %id, "Task dispatched");
        self.registry.write().await.put(task.clone());
        Ok(task)
    }

    /// Non-blocking result check. Returns the cached terminal state if known,
    /// otherwise looks for the executor's result object. `StillRunning` is a
    /// control signal, not a failure; callers retry on their own cadence.
    pub async fn poll_result(&self, id: Uuid) -> Result<Task> {
        {
            let registry = self.registry.read().await;
            let task = registry.get(id)?;
            if task.status.is_terminal() {
                return Ok(task.clone());
            }
        }

        let Some(result) =
            read_latest_json::<TaskResult>(self.channel.as_ref(), &result_name(id)).await?
        else {
            return Err(Error::StillRunning(id.to_string()));
        };

        let lock = self.task_lock(id).await;
        let _guard = lock.lock().await;

        let mut task = self.registry.read().await.get(id)?.clone();
        if task.status.is_terminal() {
            // Resolved while we were reading the channel.
            return Ok(task);
        }
        if task.status != TaskStatus::Running {
            // Result from an abandoned attempt: the task was reclaimed and is
            // pending again. Harmless, drop it.
            tracing::debug!(task_id = %id, "Ignoring result for superseded attempt");
            return Err(Error::StillRunning(id.to_string()));
        }

        match result.status {
            TaskStatus::Completed => {
                task.status = TaskStatus::Completed;
                task.result = result.result;
                task.error = None;
                task.failure = None;
            }
            TaskStatus::Failed => {
                task.status = TaskStatus::Failed;
                task.result = None;
                task.error = result.error.or_else(|| Some("unknown failure".to_string()));
                task.failure = result.failure.or(Some(FailureKind::Runtime));
            }
            other => {
                tracing::warn!(task_id = %id, status = %other, "Ignoring non-terminal result object");
                return Err(Error::StillRunning(id.to_string()));
            }
        }
        task.updated_at = Utc::now();

        self.persist(&task).await?;
        tracing::info!(task_id = %id, status = %task.status, "Result observed");
        self.registry.write().await.put(task.clone());
        Ok(task)
    }

    /// Abandons a running task whose residency bound has elapsed. Resets it
    /// to pending for another dispatch, or forces it to failed once the retry
    /// budget is spent. Cancellation is cooperative only: work already
    /// running in the executor is not stopped, its late result is dropped.
    pub async fn reclaim(&self, id: Uuid) -> Result<Task> {
        let lock = self.task_lock(id).await;
        let _guard = lock.lock().await;

        let mut task = self.registry.read().await.get(id)?.clone();
        if task.status != TaskStatus::Running {
            return Err(Error::InvalidState {
                task_id: id.to_string(),
                expected: TaskStatus::Running,
                actual: task.status,
            });
        }
        if !task.is_expired(Utc::now()) {
            return Err(Error::Validation(format!(
                "task {id} has not exceeded its {} minute residency bound",
                task.timeout_minutes
            )));
        }

        if task.retry_count >= self.config.max_retries {
            task.status = TaskStatus::Failed;
            task.error = Some(format!(
                "task exceeded its residency bound after {} retries",
                task.retry_count
            ));
            task.failure = Some(FailureKind::Timeout);
            tracing::warn!(task_id = %id, retries = task.retry_count, "Retry budget exhausted, task failed");
        } else {
            task.status = TaskStatus::Pending;
            task.retry_count += 1;
            task.execution_params.clear();
            tracing::info!(task_id = %id, retry = task.retry_count, "Task reclaimed for retry");
        }
        task.updated_at = Utc::now();

        self.persist(&task).await?;
        self.registry.write().await.put(task.clone());
        Ok(task)
    }

    /// Reclaims every expired running task. Returns the ids that changed.
    pub async fn reclaim_expired(&self) -> Result<Vec<Uuid>> {
        let expired = self.registry.read().await.expired_tasks(Utc::now());
        let mut reclaimed = Vec::new();
        for id in expired {
            match self.reclaim(id).await {
                Ok(_) => reclaimed.push(id),
                // Lost the race with a result or another reclaimer.
                Err(Error::InvalidState { .. }) | Err(Error::Validation(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reclaimed)
    }

    pub async fn list_tasks(&self, filter: Option<TaskStatus>, limit: usize) -> Vec<Task> {
        self.registry.read().await.list(filter, limit)
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Task> {
        Ok(self.registry.read().await.get(id)?.clone())
    }

    /// Lightweight probe used by callers before attempting a submission.
    pub async fn check_connectivity(&self) -> bool {
        self.channel.list("", Some(1)).await.is_ok()
    }

    /// Background sweep applying residency timeouts. Transient channel
    /// errors are logged and retried with backoff; the loop only exits on
    /// cancellation.
    pub async fn run_reclaim_loop(self: Arc<Self>, token: CancellationToken) {
        let mut timer = PollTimer::new(self.config.poll_interval, token.clone());
        let mut backoff = crate::timer::Backoff::new();

        while timer.tick().await {
            match self.reclaim_expired().await {
                Ok(reclaimed) => {
                    backoff.reset();
                    if !reclaimed.is_empty() {
                        tracing::info!(count = reclaimed.len(), "Reclaimed expired tasks");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Reclaim sweep failed, backing off");
                    if !backoff.wait(&token).await {
                        break;
                    }
                }
            }
        }
        tracing::info!("Reclaim loop stopped");
    }
}
