//! End-to-end walkthrough against a local filesystem channel: submit a shell
//! payload, dispatch it, run one executor scan, and poll the result.
//!
//! Run with: cargo run --example submit_job

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing_subscriber::EnvFilter;

use taskrelay::config::{ControllerConfig, ExecutorConfig};
use taskrelay::task::TaskKind;
use taskrelay::{Controller, Error, Executor, FsChannel, StorageChannel};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = std::env::temp_dir().join("taskrelay-demo");
    let work_dir = data_dir.join("work");
    tokio::fs::create_dir_all(&work_dir).await?;

    let channel: Arc<dyn StorageChannel> = Arc::new(FsChannel::new(&data_dir));
    let controller = Controller::new(
        Arc::clone(&channel),
        ControllerConfig::default(),
        "demo".to_string(),
    );
    let executor = Arc::new(Executor::new(channel, ExecutorConfig::default(), work_dir));

    let task_id = controller
        .submit(
            Bytes::from_static(b"echo \"hello from the sandbox\"\n"),
            "hello.sh",
            TaskKind::CodeExecution,
            vec![],
            5,
        )
        .await?;
    println!("submitted task {task_id}");

    controller.dispatch(task_id, Default::default()).await?;
    println!("dispatched, waiting for the executor to pick it up");

    // One manual scan instead of the full watch loop.
    for handle in Arc::clone(&executor).scan_once().await? {
        handle.await?;
    }

    loop {
        match controller.poll_result(task_id).await {
            Ok(task) => {
                println!("task finished: {}", task.status);
                if let Some(result) = task.result {
                    println!("output: {result}");
                }
                break;
            }
            Err(Error::StillRunning(_)) => {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
