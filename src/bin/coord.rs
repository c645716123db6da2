//! Coordinator binary

use clap::{Parser, Subcommand};
use minivac::common::{parse_duration, parse_threshold, Config};
use minivac::Coordinator;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minivac-coord")]
#[command(about = "minivac vacuum coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Config file (defaults to $MINIVAC_CONFIG or ./minivac.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Garbage ratio that makes a replica eligible (e.g. 0.3)
        #[arg(long)]
        garbage_threshold: Option<String>,

        /// Sweep period, e.g. "15m" ("0s" disables periodic sweeps)
        #[arg(long)]
        interval: Option<String>,

        /// Deadline for each protocol phase, e.g. "30m"
        #[arg(long)]
        phase_timeout: Option<String>,

        /// Volumes vacuumed at once (0 = no cap)
        #[arg(long)]
        max_concurrent_volumes: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            bind,
            garbage_threshold,
            interval,
            phase_timeout,
            max_concurrent_volumes,
        } => {
            // File and environment first, CLI has priority
            let mut config = match config {
                Some(path) => Config::load_from(&path)?,
                None => Config::load()?,
            };

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(bind) = bind {
                config.coordinator.bind_addr = bind.parse()?;
            }
            if let Some(threshold) = garbage_threshold {
                config.vacuum.garbage_threshold = parse_threshold(&threshold)?;
            }
            if let Some(interval) = interval {
                config.vacuum.interval_secs = parse_duration(&interval)?.as_secs();
            }
            if let Some(timeout) = phase_timeout {
                config.vacuum.phase_timeout_ms = u64::try_from(parse_duration(&timeout)?.as_millis())
                    .map_err(|_| anyhow::anyhow!("phase timeout too large: {}", timeout))?;
            }
            if let Some(limit) = max_concurrent_volumes {
                config.vacuum.max_concurrent_volumes = limit;
            }
            config.validate()?;

            Coordinator::new(config).serve().await?;
        }
    }

    Ok(())
}
