use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Object name prefixes inside the shared namespace. Descriptors are the
/// source of truth; the in-memory registry is rebuilt from them on startup.
pub const DESCRIPTOR_PREFIX: &str = "tasks/";
pub const PAYLOAD_PREFIX: &str = "payloads/";
pub const RESULT_PREFIX: &str = "results/";
/// Well-known object announcing the most recently dispatched task.
pub const DISPATCH_SIGNAL: &str = "signals/dispatch.json";
/// Executor heartbeat object, refreshed on an interval while the executor runs.
pub const STATUS_OBJECT: &str = "status.json";

/// Upper bound on a caller-supplied residency bound: one week. Keeps the
/// value safely inside chrono's duration range.
pub const MAX_TIMEOUT_MINUTES: i64 = 7 * 24 * 60;

pub fn descriptor_name(id: Uuid) -> String {
    format!("{DESCRIPTOR_PREFIX}task-{id}.json")
}

pub fn payload_name(id: Uuid, filename: &str) -> String {
    format!("{PAYLOAD_PREFIX}{id}/{filename}")
}

pub fn result_name(id: Uuid) -> String {
    format!("{RESULT_PREFIX}result-{id}.json")
}

/// A payload filename must stage as exactly one file inside the task's own
/// work directory: no separators, no parent components. Checked at
/// submission and again by the executor, which cannot assume descriptors
/// came from a well-behaved controller.
pub fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CodeExecution,
    StructuredJob,
    BatchData,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::CodeExecution => write!(f, "code_execution"),
            TaskKind::StructuredJob => write!(f, "structured_job"),
            TaskKind::BatchData => write!(f, "batch_data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and failed tasks never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether `self -> next` is a legal edge of the task state machine.
    /// The only edge out of a non-pending, non-terminal state besides
    /// completion is the reclaim edge running -> pending.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Pending)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Category attached to a failed result so callers can distinguish a payload
/// bug from an exhausted residency bound or a missing requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Runtime,
    Dependency,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Runtime => write!(f, "runtime_error"),
            FailureKind::Dependency => write!(f, "dependency_error"),
        }
    }
}

/// Durable task descriptor. Serialized as pretty JSON into the channel so the
/// objects stay human-inspectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    /// Channel object name of the uploaded payload.
    pub payload_name: String,
    /// Original filename as supplied by the caller.
    pub filename: String,
    /// Named requirements installed best-effort before execution.
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Opaque mapping handed to the payload at dispatch time.
    #[serde(default)]
    pub execution_params: HashMap<String, serde_json::Value>,
    /// Present only when completed; mutually exclusive with `error`.
    pub result: Option<String>,
    /// Present only when failed; mutually exclusive with `result`.
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub timeout_minutes: i64,
    pub retry_count: u32,
}

impl Task {
    pub fn new(
        kind: TaskKind,
        payload_name: String,
        filename: String,
        dependencies: Vec<String>,
        timeout_minutes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            payload_name,
            filename,
            dependencies,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            execution_params: HashMap::new(),
            result: None,
            error: None,
            failure: None,
            timeout_minutes,
            retry_count: 0,
        }
    }

    pub fn descriptor_name(&self) -> String {
        descriptor_name(self.id)
    }

    pub fn result_name(&self) -> String {
        result_name(self.id)
    }

    /// True once the task has been running longer than its caller-supplied
    /// residency bound. Descriptors are untrusted input, so a bound too
    /// large for chrono to represent simply never elapses.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        match chrono::Duration::try_minutes(self.timeout_minutes) {
            Some(bound) => now - self.updated_at > bound,
            None => false,
        }
    }
}

/// Result object the executor writes back, keyed by task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn completed(task_id: Uuid, result: Option<String>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Completed,
            result,
            error: None,
            failure: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(task_id: Uuid, error: String, failure: FailureKind) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            result: None,
            error: Some(error),
            failure: Some(failure),
            finished_at: Utc::now(),
        }
    }
}

/// Marker object the controller writes at dispatch time so the executor can
/// pick up new work without listing every descriptor first. The signal is
/// advisory: a missed signal is still discovered by rescanning descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSignal {
    pub task_id: Uuid,
    pub dispatched_at: DateTime<Utc>,
}

/// Executor heartbeat, written to the well-known status object. Carries the
/// executor instance id so an operator can spot a second executor sharing
/// the namespace (unsupported configuration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorStatus {
    pub executor_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub state: String,
    pub in_flight: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending_with_zero_retries() {
        let task = Task::new(
            TaskKind::CodeExecution,
            "payloads/x/run.sh".to_string(),
            "run.sh".to_string(),
            vec![],
            5,
        );
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
    }

    #[test]
    fn two_tasks_from_same_payload_have_distinct_ids() {
        let a = Task::new(
            TaskKind::CodeExecution,
            "p".into(),
            "f".into(),
            vec![],
            5,
        );
        let b = Task::new(
            TaskKind::CodeExecution,
            "p".into(),
            "f".into(),
            vec![],
            5,
        );
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn status_transitions_follow_state_machine() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Pending)); // reclaim edge
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn expiry_respects_timeout_minutes() {
        let mut task = Task::new(
            TaskKind::CodeExecution,
            "p".into(),
            "f".into(),
            vec![],
            1,
        );
        task.status = TaskStatus::Running;
        task.updated_at = Utc::now() - chrono::Duration::minutes(2);
        assert!(task.is_expired(Utc::now()));

        task.updated_at = Utc::now();
        assert!(!task.is_expired(Utc::now()));
    }

    #[test]
    fn plain_filenames_only() {
        assert!(is_plain_filename("run.sh"));
        assert!(is_plain_filename("job.tar.gz"));
        assert!(!is_plain_filename(""));
        assert!(!is_plain_filename("."));
        assert!(!is_plain_filename(".."));
        assert!(!is_plain_filename("../escape.sh"));
        assert!(!is_plain_filename("nested/run.sh"));
        assert!(!is_plain_filename("nested\\run.sh"));
    }

    #[test]
    fn oversized_timeout_never_expires() {
        let mut task = Task::new(
            TaskKind::CodeExecution,
            "p".into(),
            "f".into(),
            vec![],
            i64::MAX,
        );
        task.status = TaskStatus::Running;
        task.updated_at = Utc::now() - chrono::Duration::days(365);
        // Out of chrono's range; must not panic, must not report expiry.
        assert!(!task.is_expired(Utc::now()));
    }

    #[test]
    fn pending_task_never_expires() {
        let mut task = Task::new(
            TaskKind::CodeExecution,
            "p".into(),
            "f".into(),
            vec![],
            1,
        );
        task.updated_at = Utc::now() - chrono::Duration::minutes(10);
        assert!(!task.is_expired(Utc::now()));
    }

    #[test]
    fn descriptor_round_trips_through_json() {
        let task = Task::new(
            TaskKind::StructuredJob,
            "payloads/x/job.json".to_string(),
            "job.json".to_string(),
            vec!["numpy".to_string()],
            30,
        );
        let json = serde_json::to_string_pretty(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.kind, task.kind);
        assert_eq!(back.dependencies, task.dependencies);
    }
}
