use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(
    name = "dawnbell",
    version,
    about = "Once-a-day broadcast coordinator with advisory locks and insert-once reservations",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML configuration file; environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trigger/status HTTP server
    Serve {
        /// Bind address (host:port)
        #[arg(short, long)]
        bind: Option<String>,

        /// Run the internal scheduler loop alongside the server
        #[arg(long, default_value = "false")]
        internal_scheduler: bool,
    },

    /// Run one scheduler tick now
    Tick {
        /// Classify only; never locks, reserves or sends
        #[arg(long, default_value = "false")]
        test_mode: bool,
    },

    /// Send a manual broadcast through both gates
    Manual {
        /// Topic passed to the executor
        #[arg(short, long)]
        topic: Option<String>,

        /// Slot identity; defaults to the current local hour
        #[arg(short, long)]
        identity: Option<String>,

        /// Classify only; never locks, reserves or sends
        #[arg(long, default_value = "false")]
        test_mode: bool,
    },

    /// Show window classification and today's reservations
    Status,

    /// Create the reservation schema
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    tracing::info!("dawnbell starting");

    match cli.command {
        Commands::Serve {
            bind,
            internal_scheduler,
        } => {
            tracing::info!(
                bind = ?bind,
                internal_scheduler = %internal_scheduler,
                "Starting serve command"
            );
            commands::serve(
                config,
                commands::ServeParams {
                    bind,
                    internal_scheduler,
                },
            )
            .await?;
        }

        Commands::Tick { test_mode } => {
            tracing::info!(test_mode = %test_mode, "Starting tick command");
            commands::tick(config, test_mode).await?;
        }

        Commands::Manual {
            topic,
            identity,
            test_mode,
        } => {
            tracing::info!(
                topic = ?topic,
                identity = ?identity,
                test_mode = %test_mode,
                "Starting manual command"
            );
            commands::manual(config, topic, identity, test_mode).await?;
        }

        Commands::Status => {
            commands::status(config).await?;
        }

        Commands::InitDb => {
            tracing::info!("Starting init-db command");
            commands::init_db(config).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("dawnbell=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("dawnbell={level},warn"))?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
