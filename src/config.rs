use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the shared storage namespace both processes point at.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Root directory of the filesystem-backed channel (the mounted shared
    /// folder). Ignored by non-filesystem backends.
    pub root: PathBuf,
    /// Identifier of the target namespace, reported by `authenticate`.
    pub namespace: String,
    /// Opaque credentials location for backends that need one.
    pub credentials_path: Option<PathBuf>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./taskrelay-data"),
            namespace: "taskrelay".to_string(),
            credentials_path: None,
        }
    }
}

/// Configuration for sandboxed payload execution.
///
/// Payloads run in a separate shell process, never in-process. The wall-clock
/// cap is independent of any task's `timeout_minutes` so the watch loop can
/// never wedge on a single payload.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Shell used to run payload files (invoked as `<shell> <file>`).
    pub shell: String,
    /// Hard wall-clock cap per execution.
    pub wall_clock_cap: Duration,
    /// Virtual memory limit (e.g. "256m"), enforced with ulimit in the
    /// payload's shell.
    pub memory_limit: Option<String>,
    /// CPU-time limit enforced with ulimit, independent of the wall clock.
    pub cpu_time_limit: Option<Duration>,
    /// Command used for best-effort dependency installs, one requirement per
    /// invocation. None disables installs.
    pub installer: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            wall_clock_cap: Duration::from_secs(10 * 60),
            memory_limit: Some("256m".to_string()),
            cpu_time_limit: None,
            installer: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Address the tool surface listens on.
    pub listen_addr: SocketAddr,
    /// Cadence of the reclaim sweep.
    pub poll_interval: Duration,
    /// Applied when a submission does not specify a timeout.
    pub default_timeout_minutes: i64,
    /// Reclaim cycles before a task is forced to failed.
    pub max_retries: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8750"
                .parse()
                .expect("default listen address is valid"),
            poll_interval: Duration::from_secs(10),
            default_timeout_minutes: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Cadence of the dispatch-signal watch loop.
    pub poll_interval: Duration,
    /// Simultaneous payload executions.
    pub max_concurrency: usize,
    /// Cadence of heartbeat writes to the status object.
    pub heartbeat_interval: Duration,
    pub sandbox: SandboxConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_concurrency: 4,
            heartbeat_interval: Duration::from_secs(60),
            sandbox: SandboxConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_config_default() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.namespace, "taskrelay");
        assert!(cfg.credentials_path.is_none());
    }

    #[test]
    fn sandbox_config_default() {
        let cfg = SandboxConfig::default();
        assert_eq!(cfg.shell, "sh");
        assert_eq!(cfg.wall_clock_cap, Duration::from_secs(600));
        assert_eq!(cfg.memory_limit.as_deref(), Some("256m"));
        assert!(cfg.cpu_time_limit.is_none());
        assert!(cfg.installer.is_none());
    }

    #[test]
    fn controller_config_default() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8750");
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.default_timeout_minutes, 30);
        assert_eq!(cfg.max_retries, 3);
    }

    #[test]
    fn executor_config_default() {
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.max_concurrency, 4);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(60));
    }
}
