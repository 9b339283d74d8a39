use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use lsp_bridge::agent;
use lsp_bridge::config::BridgeConfig;
use lsp_bridge::logging::init_logger;
use lsp_bridge::ops::Bridge;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LSP bridge",
    long_about = "Supervises language servers and exposes code-intelligence tools \
                  to AI agents over JSON-RPC on stdio."
)]
struct Args {
    #[arg(
        long,
        help = "Use stdin/stdout for the agent channel (the only supported transport)",
        default_value_t = true
    )]
    stdio: bool,
    #[arg(long, help = "Path to the JSON configuration file")]
    config: PathBuf,
    #[arg(
        long,
        help = "Workspace root for servers whose config omits rootDir (defaults to the current directory)"
    )]
    root: Option<PathBuf>,
    #[arg(
        long,
        default_value = "info",
        help = "Logging level for the bridge's own diagnostics",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    log_level: String,
    #[arg(long, help = "Also write logs to this file")]
    log_file: Option<PathBuf>,
    #[arg(long, help = "Disable ANSI color output")]
    no_color: bool,
    #[arg(long, help = "Start every configured server at boot instead of on first use")]
    preload: bool,
}

fn load_config(args: &Args) -> anyhow::Result<BridgeConfig> {
    let raw = std::fs::read_to_string(&args.config)?;
    let mut config: BridgeConfig = serde_json::from_str(&raw)?;
    if let Some(root) = &args.root {
        for server in &mut config.servers {
            if server.root_dir.is_none() {
                server.root_dir = Some(root.clone());
            }
        }
    }
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let bridge = Arc::new(Bridge::new(config)?);
    info!(
        servers = bridge.registry.config.servers.len(),
        stdio = args.stdio,
        "lsp-bridge starting"
    );

    if args.preload {
        bridge.preload().await;
    }

    let serve_bridge = bridge.clone();
    let result = {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;
            tokio::select! {
                result = agent::serve_stdio(serve_bridge) => result.map_err(anyhow::Error::from),
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    Ok(())
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    Ok(())
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::select! {
                result = agent::serve_stdio(serve_bridge) => result.map_err(anyhow::Error::from),
                _ = tokio::signal::ctrl_c() => {
                    info!("received Ctrl+C, shutting down");
                    Ok(())
                }
            }
        }
    };

    bridge.shutdown().await;
    info!("all language servers stopped");
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = match init_logger(args.no_color, Some(&args.log_level), args.log_file.as_deref())
    {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return ExitCode::from(1);
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::from(1)
        }
    }
}
