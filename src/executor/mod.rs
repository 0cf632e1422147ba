//! Executor process: watches the channel for dispatched tasks, runs their
//! payloads in a sandbox, and writes results back.
//!
//! The executor is intermittently available by design. It keeps no state of
//! its own: a restart, even under a fresh identity, resumes by re-scanning
//! the channel. Dispatch signals persist until a result is written, so a
//! signal missed while offline is still discovered on the next scan.

pub mod sandbox;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::{read_latest, write_json, StorageChannel};
use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::registry::TaskRegistry;
use crate::task::{
    is_plain_filename, DispatchSignal, ExecutorStatus, FailureKind, Task, TaskResult, TaskStatus,
    DISPATCH_SIGNAL, RESULT_PREFIX, STATUS_OBJECT,
};
use crate::timer::{Backoff, PollTimer};

pub use sandbox::{ExecutionOutcome, Sandbox};

pub struct Executor {
    channel: Arc<dyn StorageChannel>,
    config: ExecutorConfig,
    sandbox: Sandbox,
    /// Fresh per process. Reported in the heartbeat so operators can spot a
    /// second executor sharing the namespace.
    executor_id: Uuid,
    /// Scratch space payloads are downloaded into, one subdirectory per task.
    work_dir: PathBuf,
    /// Tasks currently executing in this process; guards double-starts
    /// between consecutive scans.
    in_flight: Mutex<HashSet<Uuid>>,
    semaphore: Arc<Semaphore>,
}

impl Executor {
    pub fn new(channel: Arc<dyn StorageChannel>, config: ExecutorConfig, work_dir: PathBuf) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            sandbox: Sandbox::new(config.sandbox.clone()),
            channel,
            config,
            executor_id: Uuid::new_v4(),
            work_dir,
            in_flight: Mutex::new(HashSet::new()),
            semaphore,
        }
    }

    pub fn executor_id(&self) -> Uuid {
        self.executor_id
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Runs the watch loop until cancelled, with the heartbeat writer
    /// alongside. Transient channel errors back off and retry; one failing
    /// task degrades to a single failed result and never stops the loop.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let heartbeat = tokio::spawn(Arc::clone(&self).run_heartbeat_loop(token.clone()));

        let mut timer = PollTimer::new(self.config.poll_interval, token.clone());
        let mut backoff = Backoff::new();
        tracing::info!(executor_id = %self.executor_id, "Executor watch loop started");

        while timer.tick().await {
            match Arc::clone(&self).scan_once().await {
                Ok(handles) => {
                    backoff.reset();
                    // Executions run detached under the concurrency bound.
                    drop(handles);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Channel scan failed, backing off");
                    if !backoff.wait(&token).await {
                        break;
                    }
                }
            }
        }

        heartbeat.abort();
        tracing::info!(executor_id = %self.executor_id, "Executor watch loop stopped");
    }

    /// One pass over the channel: find dispatched tasks without results that
    /// are not already running here, and start them. Returns join handles so
    /// tests can await completion deterministically.
    pub async fn scan_once(self: Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        // The well-known signal object is a fast path only; the descriptor
        // scan below is what makes missed signals harmless.
        if let Some(signal) =
            crate::channel::read_latest_json::<DispatchSignal>(self.channel.as_ref(), DISPATCH_SIGNAL)
                .await
                .unwrap_or_default()
        {
            tracing::debug!(task_id = %signal.task_id, "Dispatch signal observed");
        }

        let registry = TaskRegistry::rebuild(self.channel.as_ref()).await?;
        let results_present: HashSet<String> = self
            .channel
            .list(RESULT_PREFIX, None)
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect();

        let mut handles = Vec::new();
        for task in registry.list(Some(TaskStatus::Running), usize::MAX) {
            if results_present.contains(&task.result_name()) {
                continue;
            }
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(task.id) {
                continue;
            }
            drop(in_flight);
            handles.push(Arc::clone(&self).spawn_task(task));
        }
        Ok(handles)
    }

    fn spawn_task(self: Arc<Self>, task: Task) -> JoinHandle<()> {
        tokio::spawn(async move {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore closed, shutting down
            };
            let task_id = task.id;
            self.run_task(task).await;
            drop(permit);
            self.in_flight.lock().await.remove(&task_id);
        })
    }

    /// Downloads, prepares, and executes one task, then writes its result.
    /// All failure modes end in a failed result object for this task only.
    async fn run_task(&self, task: Task) {
        tracing::info!(task_id = %task.id, kind = %task.kind, "Task picked up");

        // Descriptors can be written by any namespace writer; the filename
        // is re-checked here, not trusted from submission-time validation.
        if !is_plain_filename(&task.filename) {
            self.write_result(TaskResult::failed(
                task.id,
                format!("unsafe payload filename: {:?}", task.filename),
                FailureKind::Runtime,
            ))
            .await;
            return;
        }

        let payload = match read_latest(self.channel.as_ref(), &task.payload_name).await {
            Ok(Some((_, data))) => data,
            Ok(None) => {
                self.write_result(TaskResult::failed(
                    task.id,
                    format!("payload object missing: {}", task.payload_name),
                    FailureKind::Dependency,
                ))
                .await;
                return;
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Payload download failed, will retry next scan");
                return;
            }
        };

        let task_dir = self.work_dir.join(task.id.to_string());
        let payload_path = task_dir.join(&task.filename);
        if let Err(e) = self.stage_payload(&task, &task_dir, &payload_path, &payload).await {
            self.write_result(TaskResult::failed(
                task.id,
                format!("failed to stage payload: {e}"),
                FailureKind::Runtime,
            ))
            .await;
            return;
        }

        // Best-effort installs: an individual failure is logged and execution
        // is still attempted.
        for requirement in &task.dependencies {
            if let Err(e) = self.sandbox.install_dependency(task.id, requirement).await {
                tracing::warn!(
                    task_id = %task.id,
                    requirement,
                    error = %e,
                    "Dependency install failed, continuing"
                );
            }
        }

        let outcome = self.sandbox.execute(task.id, &payload_path).await;
        let result = match outcome.status {
            TaskStatus::Completed => TaskResult::completed(
                task.id,
                // Generic marker when the payload declares no output.
                Some(outcome.output.unwrap_or_else(|| "completed".to_string())),
            ),
            _ => TaskResult::failed(
                task.id,
                outcome.error.unwrap_or_else(|| "unknown failure".to_string()),
                outcome.failure.unwrap_or(FailureKind::Runtime),
            ),
        };
        self.write_result(result).await;

        if let Err(e) = tokio::fs::remove_dir_all(&task_dir).await {
            tracing::debug!(task_id = %task.id, error = %e, "Work dir cleanup failed");
        }
    }

    async fn stage_payload(
        &self,
        task: &Task,
        task_dir: &std::path::Path,
        payload_path: &std::path::Path,
        payload: &[u8],
    ) -> std::io::Result<()> {
        tokio::fs::create_dir_all(task_dir).await?;
        tokio::fs::write(payload_path, payload).await?;
        if !task.execution_params.is_empty() {
            // Params land next to the payload as params.json; the payload
            // reads them from its working directory.
            let params = serde_json::to_vec_pretty(&task.execution_params)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            tokio::fs::write(task_dir.join("params.json"), params).await?;
        }
        Ok(())
    }

    async fn write_result(&self, result: TaskResult) {
        let name = crate::task::result_name(result.task_id);
        match write_json(self.channel.as_ref(), &name, &result).await {
            Ok(_) => {
                tracing::info!(
                    task_id = %result.task_id,
                    status = %result.status,
                    "Result written"
                );
            }
            Err(e) => {
                // The task stays result-less and will be retried on a later
                // scan; never take the loop down.
                tracing::error!(task_id = %result.task_id, error = %e, "Failed to write result");
            }
        }
    }

    /// Refreshes the well-known status object so controllers can judge
    /// executor liveness by heartbeat age.
    async fn run_heartbeat_loop(self: Arc<Self>, token: CancellationToken) {
        let mut timer = PollTimer::new(self.config.heartbeat_interval, token);
        while timer.tick().await {
            let status = ExecutorStatus {
                executor_id: self.executor_id,
                timestamp: Utc::now(),
                state: "watching".to_string(),
                in_flight: self.in_flight_count().await,
            };
            if let Err(e) = write_json(self.channel.as_ref(), STATUS_OBJECT, &status).await {
                tracing::warn!(error = %e, "Heartbeat write failed");
            }
        }
    }
}

