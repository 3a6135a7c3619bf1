use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{error, info};

use mailscan_helper::dispatch::HELPER_NAME;
use mailscan_helper::inject::Injector;
use mailscan_helper::protocol::ReplyWriter;
use mailscan_helper::scan::{ScanClient, Timeouts};
use mailscan_helper::worker::WorkerPool;
use mailscan_helper::{Dispatcher, HelperConfig, Listener, ListenerExit, logging};

/// CommuniGate Pro helper that scans messages with an Rspamd-compatible daemon.
#[derive(Parser, Debug)]
#[command(name = "mailscan-helper")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Scan daemon endpoint: `ip:port` or a Unix socket path.
    #[arg(long, env = "RSPAMD_SOCKET", global = true)]
    socket: Option<String>,

    /// CommuniGate Pro base directory.
    #[arg(long, env = "CGP_PATH", global = true)]
    cgp_path: Option<PathBuf>,

    /// Maximum concurrent scans (unbounded when unset).
    #[arg(long, global = true)]
    max_workers: Option<usize>,

    /// Write logs to daily files in this directory instead of stderr.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Serve the helper protocol on stdin/stdout (default)
    Serve,
    /// Check that the scan daemon is reachable
    Check,
    /// Scan a message from stdin and submit it to the queue
    Inject,
}

impl Cli {
    fn apply(&self, config: &mut HelperConfig) -> anyhow::Result<()> {
        if let Some(socket) = &self.socket {
            config.endpoint = socket.clone();
        }
        if let Some(cgp_path) = &self.cgp_path {
            config.cgp_path = cgp_path.clone();
        }
        if let Some(max_workers) = self.max_workers {
            anyhow::ensure!(max_workers > 0, "--max-workers must be at least 1");
            config.max_workers = Some(max_workers);
        }
        if let Some(log_dir) = &self.log_dir {
            config.log_dir = Some(log_dir.clone());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = HelperConfig::from_env().context("invalid configuration")?;
    cli.apply(&mut config)?;

    let guard = logging::init(config.log_dir.as_deref())?;

    let client = ScanClient::new(
        &config.endpoint,
        Timeouts {
            connect: config.connect_timeout,
            request: config.request_timeout,
        },
    )
    .context("failed to build scan client")?;

    let code = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, client).await?,
        Commands::Check => check(&client).await,
        Commands::Inject => {
            let injector = Injector::new(client, config.submitted_dir());
            injector.inject(tokio::io::stdin()).await?;
            0
        }
    };

    // Flush buffered log output before exiting. Exiting explicitly also
    // skips waiting on the blocking stdin reader.
    drop(guard);
    std::process::exit(code);
}

async fn check(client: &ScanClient) -> i32 {
    match client.test_connection().await {
        Ok(()) => {
            info!(endpoint = %client.endpoint(), "Scan daemon reachable");
            0
        }
        Err(e) => {
            error!(error = %e, "Scan daemon unreachable");
            1
        }
    }
}

async fn serve(config: HelperConfig, client: ScanClient) -> anyhow::Result<i32> {
    let writer = Arc::new(ReplyWriter::stdout());

    if let Err(e) = client.test_connection().await {
        error!(endpoint = %client.endpoint(), error = %e, "Startup connectivity check failed");
        writer.diagnostic(&e.to_string()).await?;
        return Ok(1);
    }

    info!(
        endpoint = %client.endpoint(),
        cgp_path = %config.cgp_path.display(),
        max_workers = ?config.max_workers,
        "Helper started"
    );
    writer
        .diagnostic(&format!("{HELPER_NAME} {} started", env!("CARGO_PKG_VERSION")))
        .await?;

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(client),
        Arc::clone(&writer),
        config.cgp_path.clone(),
    ));
    let shutdown = dispatcher.subscribe_shutdown();
    let pool = WorkerPool::new(dispatcher, config.max_workers);
    let listener = Listener::new(pool, shutdown, config.poll_interval, config.drain_timeout);

    let exit = listener
        .run(BufReader::new(tokio::io::stdin()))
        .await
        .context("failed to read from stdin")?;
    match exit {
        ListenerExit::Quit => info!("Stopped by QUIT"),
        ListenerExit::InputClosed => info!("Stopped at end of input"),
    }
    Ok(0)
}
