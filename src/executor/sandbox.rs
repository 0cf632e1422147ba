use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::task::{FailureKind, TaskStatus};

/// Diagnostics are bounded so a chatty payload cannot bloat result objects,
/// and full tracebacks never leak payload internals to callers.
const MAX_DIAGNOSTIC_LEN: usize = 2000;

/// Result of one sandboxed payload run.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

/// Runs payloads in a separate shell process, never in-process.
///
/// Every run gets:
/// - a hard wall-clock cap, independent of the task's `timeout_minutes`,
///   so the watch loop can never wedge on one payload
/// - optional memory and CPU-time ulimits
/// - its own working directory holding the downloaded payload
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Execute a downloaded payload file. Never returns an error: every
    /// failure mode degrades to a failed outcome for this one task.
    pub async fn execute(&self, task_id: Uuid, payload_path: &Path) -> ExecutionOutcome {
        tracing::info!(
            task_id = %task_id,
            payload = %payload_path.display(),
            cap_secs = self.config.wall_clock_cap.as_secs(),
            "Executing payload"
        );

        let mut script = String::new();
        if let Some(kb) = self.memory_limit_kb() {
            script.push_str(&format!("ulimit -v {kb} 2>/dev/null; "));
        }
        if let Some(cap) = self.config.cpu_time_limit {
            script.push_str(&format!("ulimit -t {} 2>/dev/null; ", cap.as_secs().max(1)));
        }
        script.push_str(&format!(
            "exec {} '{}'",
            self.config.shell,
            payload_path.display()
        ));

        let child = Command::new("sh")
            .arg("-c")
            .arg(&script)
            .current_dir(payload_path.parent().unwrap_or(Path::new(".")))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.config.wall_clock_cap, child).await {
            Ok(result) => Self::process_output(task_id, result),
            Err(_) => {
                tracing::warn!(task_id = %task_id, "Payload exceeded wall-clock cap, killed");
                ExecutionOutcome {
                    task_id,
                    status: TaskStatus::Failed,
                    output: None,
                    error: Some(format!(
                        "execution exceeded the {} second wall-clock cap",
                        self.config.wall_clock_cap.as_secs()
                    )),
                    failure: Some(FailureKind::Timeout),
                }
            }
        }
    }

    /// Best-effort install of one named requirement. Errors are reported to
    /// the caller, which logs and proceeds; a failed install never aborts
    /// the task on its own.
    pub async fn install_dependency(&self, task_id: Uuid, requirement: &str) -> Result<(), String> {
        let Some(installer) = &self.config.installer else {
            tracing::debug!(task_id = %task_id, requirement, "No installer configured, skipping");
            return Ok(());
        };

        let output = Command::new("sh")
            .arg("-c")
            .arg(format!("{installer} '{requirement}'"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| e.to_string())?;

        if output.status.success() {
            Ok(())
        } else {
            Err(truncate(
                String::from_utf8_lossy(&output.stderr).trim(),
                MAX_DIAGNOSTIC_LEN,
            ))
        }
    }

    fn memory_limit_kb(&self) -> Option<u64> {
        self.config.memory_limit.as_deref().and_then(parse_size_kb)
    }

    fn process_output(
        task_id: Uuid,
        result: std::io::Result<std::process::Output>,
    ) -> ExecutionOutcome {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();

                if output.status.success() {
                    let trimmed = stdout.trim_end();
                    tracing::info!(task_id = %task_id, "Payload completed");
                    ExecutionOutcome {
                        task_id,
                        status: TaskStatus::Completed,
                        output: if trimmed.is_empty() {
                            None
                        } else {
                            Some(trimmed.to_string())
                        },
                        error: None,
                        failure: None,
                    }
                } else {
                    let diagnostic = if stderr.trim().is_empty() {
                        format!("payload exited with code {:?}", output.status.code())
                    } else {
                        truncate(stderr.trim(), MAX_DIAGNOSTIC_LEN)
                    };
                    tracing::info!(task_id = %task_id, code = ?output.status.code(), "Payload failed");
                    ExecutionOutcome {
                        task_id,
                        status: TaskStatus::Failed,
                        output: None,
                        error: Some(diagnostic),
                        failure: Some(FailureKind::Runtime),
                    }
                }
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Failed to spawn payload");
                ExecutionOutcome {
                    task_id,
                    status: TaskStatus::Failed,
                    output: None,
                    error: Some(e.to_string()),
                    failure: Some(FailureKind::Runtime),
                }
            }
        }
    }
}

/// Parses limits like "256m", "1g", "512k" into kilobytes for ulimit -v.
fn parse_size_kb(limit: &str) -> Option<u64> {
    let limit = limit.trim().to_ascii_lowercase();
    let (digits, factor) = match limit.chars().last()? {
        'k' => (&limit[..limit.len() - 1], 1),
        'm' => (&limit[..limit.len() - 1], 1024),
        'g' => (&limit[..limit.len() - 1], 1024 * 1024),
        '0'..='9' => (limit.as_str(), 1), // bare kilobytes
        _ => return None,
    };
    digits.parse::<u64>().ok().map(|n| n * factor)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_kb_units() {
        assert_eq!(parse_size_kb("512k"), Some(512));
        assert_eq!(parse_size_kb("256m"), Some(256 * 1024));
        assert_eq!(parse_size_kb("1g"), Some(1024 * 1024));
        assert_eq!(parse_size_kb("2048"), Some(2048));
        assert_eq!(parse_size_kb("lots"), None);
        assert_eq!(parse_size_kb(""), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 100), "short");
        let long = "é".repeat(60);
        let cut = truncate(&long, 101);
        assert!(cut.ends_with("... (truncated)"));
        assert!(cut.len() <= 101 + "... (truncated)".len());
    }
}
