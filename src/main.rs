//! Stub Dispatch Server - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use stub_dispatch_server::{Logger, MockServer, MockServerConfig};
use tracing::{info, Dispatch, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "stub-dispatch-server",
    about = "Stub dispatch server - validate a stub configuration and seed it into an in-process store",
    long_about = "Validates a stub configuration and seeds it into an in-process store.\n\n\
        The binary exposes no network endpoint: stubs are only reachable through the \
        library API (`MockServer::service`). Use it to check a configuration \
        (--validate), print the default one (--print-config), or confirm that \
        seeding succeeds before embedding the library.",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stub-dispatch.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    tracing::dispatcher::set_global_default(dispatch.clone())?;
    let logger = Logger::new(dispatch);

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no stubs)");
        MockServerConfig::default()
    };

    // Validate and exit if requested
    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} stubs defined)",
            config.stubs.len()
        );
        return Ok(());
    }

    // Seed only; the store is not reachable from outside this process
    let server = MockServer::new(config, logger);
    server.start().await?;
    server.ready().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received interrupt, shutting down");
    server.shutdown();

    Ok(())
}
