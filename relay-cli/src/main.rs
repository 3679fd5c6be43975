//! Relay CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use relay_config::{load_config, load_from_file, validate_config, Config, LoggingConfig};
use relay_runtime::{ServerBuilder, SignalHandler};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Rotating single-backend HTTP reverse proxy", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "relay.yaml", env = "RELAY_CONFIG")]
        config: PathBuf,

        /// Log level, overrides the configured one (trace, debug, info, warn, error)
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "relay.yaml", env = "RELAY_CONFIG")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, log_level } => {
            let path = config;
            let config = load_for_serve(&path, log_level)?;

            tracing::info!(
                config = %path.display(),
                listen = %config.server.listen,
                service = %config.proxy.service_name,
                resolver = config.resolver.kind(),
                rotation_period = ?config.proxy.rotation_period,
                "Starting Relay"
            );

            let server = ServerBuilder::new().config(config).build()?;

            let shutdown_signal = server.shutdown_signal();
            tokio::spawn(async move {
                let handler = SignalHandler::new(shutdown_signal);
                handler.run().await;
            });

            server.run().await?;

            Ok(())
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    tracing::info!("  Listen: {}", cfg.server.listen);
                    tracing::info!("  Service: {}", cfg.proxy.service_name);
                    tracing::info!("  Resolver: {}", cfg.resolver.kind());
                    tracing::info!("  Rotation period: {:?}", cfg.proxy.rotation_period);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("Relay reverse proxy");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

/// Parse the configuration, start logging with its settings, then validate
/// so that validation warnings reach the configured output
fn load_for_serve(path: &Path, log_level: Option<String>) -> Result<Config> {
    let config = load_from_file(path)?;

    let mut logging = config.observability.logging.clone();
    if let Some(level) = log_level {
        logging.level = level;
    }
    init_tracing(&logging)?;

    validate_config(&config)?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)?,
    };

    let json = logging.format == "json";

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_target(false)))
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
        }))
        .try_init()?;

    Ok(())
}
