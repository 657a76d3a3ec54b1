//! Simulation camera to encoder streaming client

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use simstream::capture::{SyntheticConnector, SyntheticOptions};
use simstream::encoder::FfmpegLauncher;
use simstream::pipeline::shutdown::forward_signals;
use simstream::supervisor::{Supervisor, SupervisorExit};
use simstream::Config;

const BANNER: &str = "
Welcome to simstream.

STARTING in a moment...
";

#[derive(Parser, Debug)]
#[command(version, about = "Stream simulator camera frames into an encoder")]
struct Args {
    /// Print debug information
    #[arg(short, long)]
    verbose: bool,
    /// Simulator host; the built-in synthetic world only logs it (default: localhost)
    #[arg(long)]
    host: Option<String>,
    /// Simulator port; the built-in synthetic world only logs it (default: 2000)
    #[arg(short, long)]
    port: Option<u16>,
    /// Enable autopilot
    #[arg(short, long)]
    autopilot: bool,
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let args = Args::parse();

    let default_filter = if args.verbose {
        "simstream=debug"
    } else {
        "simstream=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    // Load configuration, flags win over file and environment
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.source.host = host;
    }
    if let Some(port) = args.port {
        config.source.port = port;
    }
    if args.autopilot {
        config.control.autopilot = true;
    }

    println!("{}", BANNER);

    let (requests_tx, requests_rx) = flume::unbounded();
    tokio::spawn(async move {
        if let Err(e) = forward_signals(requests_tx).await {
            error!("Signal handling failed: {}", e);
        }
    });

    info!(
        "Using the built-in synthetic world ({}x{})",
        config.source.width, config.source.height
    );
    let connector = SyntheticConnector::new(SyntheticOptions::from_config(&config.source));
    let mut supervisor = Supervisor::new(connector, FfmpegLauncher, config, requests_rx);
    let exit = tokio::task::spawn_blocking(move || supervisor.run()).await?;

    match exit {
        SupervisorExit::Interrupted => println!("\nCancelled by user. Bye!"),
        SupervisorExit::Terminated => info!("simstream shutting down"),
    }
    Ok(())
}
