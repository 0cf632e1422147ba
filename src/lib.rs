//! taskrelay: remote task execution coordinated through shared storage.
//!
//! Two long-running processes cooperate without ever opening a socket to
//! each other. The controller accepts payloads from callers, writes task
//! descriptors into a shared storage namespace, and polls for results. The
//! executor watches the same namespace, runs dispatched payloads in a
//! sandboxed subprocess, and writes result objects back. The namespace is
//! the single source of truth; either side can restart and resume by
//! re-reading it.

pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod registry;
pub mod shutdown;
pub mod task;
pub mod timer;

pub use channel::{FsChannel, MemoryChannel, StorageChannel};
pub use config::{ChannelConfig, ControllerConfig, ExecutorConfig, SandboxConfig};
pub use controller::Controller;
pub use error::{Error, Result};
pub use executor::Executor;
pub use registry::TaskRegistry;
pub use task::{Task, TaskKind, TaskResult, TaskStatus};
