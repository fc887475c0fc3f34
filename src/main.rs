//! Resilient IPFS Daemon
//!
//! Stores messages on an IPFS node and keeps working from a local cache while
//! the node is unreachable.

use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use resilient_ipfs::ipc::IpcServer;
use resilient_ipfs::{Config, Orchestrator};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run IPC server mode (default)
    Server,
    /// Store one message and print its id (CLI mode)
    Submit { text: String },
    /// Print the content stored under an id (CLI mode)
    Fetch { id: String },
    /// Show help
    Help,
}

#[derive(Debug)]
struct Args {
    command: Command,
    config_path: Option<PathBuf>,
}

fn print_help() {
    eprintln!(
        r#"Resilient IPFS Daemon - IPFS storage with a local fallback cache

USAGE:
    resilient-ipfs-daemon [--config <file>]                 # Run IPC server (default)
    resilient-ipfs-daemon [--config <file>] submit <text>
    resilient-ipfs-daemon [--config <file>] fetch <id>
    resilient-ipfs-daemon help

COMMANDS:
    (none)  Run IPC server mode (newline-delimited JSON on a Unix socket)
    submit  Store a message, remotely if possible, and print its id
    fetch   Print the content stored under a content id or local key
    help    Show this help message

ENVIRONMENT:
    IPFS_HOST, IPFS_PORT, IPFS_PROTOCOL   Primary IPFS API endpoint
    IPFS_TIMEOUT_MS                       Per-request timeout
    IPFS_RETRY_ATTEMPTS, IPFS_RETRY_DELAY_MS
    IPFS_DEBUG                            Verbose logging (1/true/yes)
    PINATA_API_KEY, PINATA_SECRET_KEY     Enable secondary pinning
    CACHE_DIR, CACHE_RETENTION_DAYS       Local cache location and retention
    RESILIENT_IPFS_SOCKET                 IPC socket path
    RUST_LOG                              Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Args> {
    let mut config_path = None;
    let mut rest = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a file path"))?;
                config_path = Some(PathBuf::from(path));
            }
            _ => rest.push(arg),
        }
    }

    let command = match rest.first().map(String::as_str) {
        None => Command::Server,
        Some("submit") => {
            if rest.len() < 2 {
                return Err(anyhow!("Usage: resilient-ipfs-daemon submit <text>"));
            }
            Command::Submit {
                text: rest[1..].join(" "),
            }
        }
        Some("fetch") => {
            let id = rest
                .get(1)
                .ok_or_else(|| anyhow!("Usage: resilient-ipfs-daemon fetch <id>"))?;
            Command::Fetch { id: id.clone() }
        }
        Some("help" | "--help" | "-h") => Command::Help,
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            Command::Help
        }
    };

    Ok(Args { command, config_path })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = args.command {
        print_help();
        return Ok(());
    }

    let config = Config::load(args.config_path.as_deref())?;

    let default_level = if config.remote.debug_mode {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default_level);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(remote = ?config.remote, cache_dir = %config.cache.directory.display(), "Configuration loaded");

    let orchestrator = Arc::new(Orchestrator::from_config(&config));
    let state = orchestrator.start().await?;
    info!(state = %state, "Orchestrator started");

    match orchestrator.purge(config.cache.retention_days).await {
        Ok(0) => {}
        Ok(deleted) => info!(deleted = deleted, "Purged expired cache entries"),
        Err(e) => error!(error = %e, "Startup purge failed"),
    }

    match args.command {
        Command::Server => {
            info!("Starting resilient IPFS daemon in IPC server mode");

            let mut ipc_server = IpcServer::new(
                Arc::clone(&orchestrator),
                config.socket_path(),
                config.cache.retention_days,
            );
            if let Err(e) = ipc_server.start().await {
                error!(error = %e, "Failed to start IPC server");
                return Err(e);
            }
            let ipc_server = Arc::new(ipc_server);

            info!("Daemon ready. Waiting for commands...");

            let runner = Arc::clone(&ipc_server);
            let ipc_handle = tokio::spawn(async move {
                if let Err(e) = runner.run().await {
                    error!(error = %e, "IPC server error");
                }
            });

            tokio::signal::ctrl_c().await?;

            info!("Received shutdown signal, stopping...");
            ipc_handle.abort();
            ipc_server.stop().await?;
            orchestrator.remote().disconnect();

            info!("Shutdown complete.");
        }
        Command::Submit { text } => {
            let receipt = orchestrator.submit(&text).await?;
            println!("{} ({}, {} bytes)", receipt.id, receipt.origin, receipt.size);
        }
        Command::Fetch { id } => {
            let payload = orchestrator.fetch(&id).await?;
            println!("{}", payload);
        }
        Command::Help => print_help(),
    }

    Ok(())
}
