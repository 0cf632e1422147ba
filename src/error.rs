use thiserror::Error;

use crate::task::TaskStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid submission: {0}")]
    Validation(String),

    #[error("Task {task_id} is {actual}, expected {expected}")]
    InvalidState {
        task_id: String,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Control signal, not a failure: the result object has not appeared yet.
    /// Callers retry on their own cadence.
    #[error("Task {0} is still running")]
    StillRunning(String),

    #[error("Task {task_id} exceeded its residency bound after {retries} retries")]
    Timeout { task_id: String, retries: u32 },

    #[error("Dependency error: {0}")]
    Dependency(String),

    #[error("Payload execution failed: {0}")]
    Runtime(String),

    #[error("Storage channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the storage medium itself is unreachable, as opposed to a
    /// problem with one task. Callers use this to invoke their local fallback.
    pub fn is_channel_unavailable(&self) -> bool {
        matches!(self, Error::ChannelUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
