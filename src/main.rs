use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskrelay::config::{ChannelConfig, ControllerConfig, ExecutorConfig, SandboxConfig};
use taskrelay::shutdown::install_shutdown_handler;
use taskrelay::{Controller, Executor, FsChannel};

#[derive(Parser, Debug)]
#[command(name = "taskrelay")]
#[command(version)]
#[command(about = "Remote task execution coordinated through shared storage")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the controller: accept submissions over HTTP and poll for results
    Controller(ControllerArgs),

    /// Run the executor: watch the namespace and execute dispatched payloads
    Executor(ExecutorArgs),
}

#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Root directory of the shared storage namespace (the mounted folder)
    #[arg(long, default_value = "./taskrelay-data")]
    root: PathBuf,

    /// Namespace identifier reported by the authenticate tool
    #[arg(long, default_value = "taskrelay")]
    namespace: String,

    /// Credentials file for channel backends that need one; the filesystem
    /// channel does not
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Address the tool surface listens on
    #[arg(long, default_value = "127.0.0.1:8750")]
    listen: SocketAddr,

    /// Seconds between reclaim sweeps
    #[arg(long, default_value = "10")]
    poll_interval: u64,

    /// Residency bound applied when a submission carries no timeout
    #[arg(long, default_value = "30")]
    default_timeout_minutes: i64,

    /// Reclaim cycles before a task is forced to failed
    #[arg(long, default_value = "3")]
    max_retries: u32,
}

#[derive(Parser, Debug)]
struct ExecutorArgs {
    /// Root directory of the shared storage namespace (the mounted folder)
    #[arg(long, default_value = "./taskrelay-data")]
    root: PathBuf,

    /// Scratch directory payloads are downloaded into
    #[arg(long, default_value = "./taskrelay-work")]
    work_dir: PathBuf,

    /// Seconds between channel scans
    #[arg(long, default_value = "5")]
    poll_interval: u64,

    /// Simultaneous payload executions
    #[arg(long, default_value = "4")]
    max_concurrency: usize,

    /// Seconds between heartbeat writes
    #[arg(long, default_value = "60")]
    heartbeat_interval: u64,

    /// Shell used to run payload files
    #[arg(long, default_value = "sh")]
    shell: String,

    /// Hard wall-clock cap per execution, in seconds
    #[arg(long, default_value = "600")]
    wall_clock_cap: u64,

    /// Virtual memory limit per execution (e.g. "256m"); empty disables it
    #[arg(long, default_value = "256m")]
    memory_limit: String,

    /// Command used for best-effort dependency installs; omit to disable
    #[arg(long)]
    installer: Option<String>,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_controller(args: ControllerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ControllerConfig {
        listen_addr: args.listen,
        poll_interval: Duration::from_secs(args.poll_interval),
        default_timeout_minutes: args.default_timeout_minutes,
        max_retries: args.max_retries,
    };

    let channel_config = ChannelConfig {
        root: args.root,
        namespace: args.namespace,
        credentials_path: args.credentials,
    };
    if channel_config.credentials_path.is_some() {
        tracing::debug!("Credentials file ignored by the filesystem channel");
    }

    tracing::info!(
        root = %channel_config.root.display(),
        namespace = %channel_config.namespace,
        listen = %config.listen_addr,
        "Starting controller"
    );

    let channel = Arc::new(FsChannel::new(channel_config.root.clone()));
    channel.ensure_root().await?;
    let controller = Arc::new(Controller::new(channel, config, channel_config.namespace));
    controller.recover().await?;

    let token = install_shutdown_handler();
    let reclaim = tokio::spawn(Arc::clone(&controller).run_reclaim_loop(token.clone()));

    let listen_addr = controller.config().listen_addr;
    taskrelay::controller::tools::serve(controller, listen_addr, token).await?;

    reclaim.await?;
    tracing::info!("Controller stopped");
    Ok(())
}

async fn run_executor(args: ExecutorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = SandboxConfig {
        shell: args.shell,
        wall_clock_cap: Duration::from_secs(args.wall_clock_cap),
        memory_limit: if args.memory_limit.is_empty() {
            None
        } else {
            Some(args.memory_limit)
        },
        installer: args.installer,
        ..SandboxConfig::default()
    };
    let config = ExecutorConfig {
        poll_interval: Duration::from_secs(args.poll_interval),
        max_concurrency: args.max_concurrency,
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval),
        sandbox,
    };

    tracing::info!(
        root = %args.root.display(),
        work_dir = %args.work_dir.display(),
        "Starting executor"
    );

    tokio::fs::create_dir_all(&args.work_dir).await?;
    let channel = Arc::new(FsChannel::new(args.root));
    channel.ensure_root().await?;
    let executor = Arc::new(Executor::new(channel, config, args.work_dir));

    let token = install_shutdown_handler();
    executor.run(token).await;

    tracing::info!("Executor stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();

    match args.command {
        Commands::Controller(args) => run_controller(args).await,
        Commands::Executor(args) => run_executor(args).await,
    }
}
