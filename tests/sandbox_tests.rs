//! Sandbox subprocess tests: real payload files executed through `sh`.

use std::path::PathBuf;
use std::time::Duration;

use taskrelay::config::SandboxConfig;
use taskrelay::executor::Sandbox;
use taskrelay::task::{FailureKind, TaskStatus};
use uuid::Uuid;

fn sandbox() -> Sandbox {
    Sandbox::new(SandboxConfig {
        // Memory limits interfere with some CI shells; the other tests cover
        // limit parsing.
        memory_limit: None,
        ..SandboxConfig::default()
    })
}

/// Writes a payload script into a fresh temp dir and returns its path.
/// The dir guard must stay alive for the duration of the test.
fn stage(script: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("payload.sh");
    std::fs::write(&path, script).expect("write payload");
    (dir, path)
}

#[tokio::test]
async fn simple_command_completes_with_output() {
    let (_dir, path) = stage("echo hello\n");
    let outcome = sandbox().execute(Uuid::new_v4(), &path).await;

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.output.as_deref(), Some("hello"));
    assert!(outcome.error.is_none());
    assert!(outcome.failure.is_none());
}

#[tokio::test]
async fn silent_payload_completes_with_no_output() {
    let (_dir, path) = stage("true\n");
    let outcome = sandbox().execute(Uuid::new_v4(), &path).await;

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert!(outcome.output.is_none());
}

#[tokio::test]
async fn multiline_output_is_preserved() {
    let (_dir, path) = stage("printf 'line1\\nline2\\nline3\\n'\n");
    let outcome = sandbox().execute(Uuid::new_v4(), &path).await;

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.output.unwrap().lines().count(), 3);
}

#[tokio::test]
async fn large_output_survives_intact() {
    let (_dir, path) = stage("seq 1 1000\n");
    let outcome = sandbox().execute(Uuid::new_v4(), &path).await;

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.output.unwrap().lines().count(), 1000);
}

#[tokio::test]
async fn nonzero_exit_is_a_runtime_failure() {
    let (_dir, path) = stage("exit 1\n");
    let outcome = sandbox().execute(Uuid::new_v4(), &path).await;

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.failure, Some(FailureKind::Runtime));
    assert!(outcome.error.is_some());
}

#[tokio::test]
async fn stderr_is_carried_in_the_diagnostic() {
    let (_dir, path) = stage("echo 'division by zero' >&2\nexit 2\n");
    let outcome = sandbox().execute(Uuid::new_v4(), &path).await;

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.error.unwrap().contains("division by zero"));
}

#[tokio::test]
async fn silent_failure_reports_the_exit_code() {
    let (_dir, path) = stage("exit 7\n");
    let outcome = sandbox().execute(Uuid::new_v4(), &path).await;

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.error.unwrap().contains('7'));
}

#[tokio::test]
async fn missing_payload_file_fails_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("does-not-exist.sh");
    let outcome = sandbox().execute(Uuid::new_v4(), &path).await;

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.failure, Some(FailureKind::Runtime));
}

#[tokio::test]
async fn long_diagnostics_are_truncated() {
    // 100k of stderr, far past the diagnostic bound.
    let (_dir, path) = stage("seq 1 20000 | tr '\\n' x >&2\nexit 1\n");
    let outcome = sandbox().execute(Uuid::new_v4(), &path).await;

    assert_eq!(outcome.status, TaskStatus::Failed);
    let error = outcome.error.unwrap();
    assert!(error.ends_with("... (truncated)"));
    assert!(error.len() < 3000);
}

#[tokio::test]
async fn wall_clock_cap_kills_the_payload() {
    let config = SandboxConfig {
        wall_clock_cap: Duration::from_millis(300),
        memory_limit: None,
        ..SandboxConfig::default()
    };
    let (_dir, path) = stage("sleep 30\n");
    let outcome = Sandbox::new(config).execute(Uuid::new_v4(), &path).await;

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.failure, Some(FailureKind::Timeout));
    assert!(outcome.error.unwrap().contains("wall-clock cap"));
}

#[tokio::test]
async fn payload_runs_in_its_own_directory() {
    let (_dir, path) = stage("echo data > scratch.txt\ncat scratch.txt\n");
    let outcome = sandbox().execute(Uuid::new_v4(), &path).await;

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.output.as_deref(), Some("data"));
    // The scratch file landed next to the payload, not in the test's cwd.
    assert!(path.parent().unwrap().join("scratch.txt").exists());
}

#[tokio::test]
async fn install_without_installer_is_a_silent_skip() {
    let result = sandbox()
        .install_dependency(Uuid::new_v4(), "anything")
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn install_runs_the_configured_installer() {
    let ok = Sandbox::new(SandboxConfig {
        installer: Some("true".to_string()),
        ..SandboxConfig::default()
    });
    assert!(ok.install_dependency(Uuid::new_v4(), "pkg").await.is_ok());

    let failing = Sandbox::new(SandboxConfig {
        installer: Some("false".to_string()),
        ..SandboxConfig::default()
    });
    assert!(failing
        .install_dependency(Uuid::new_v4(), "pkg")
        .await
        .is_err());
}
