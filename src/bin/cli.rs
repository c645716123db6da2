//! CLI for cluster operations

use clap::{Parser, Subcommand};
use minivac::coordinator::{VolumeId, VolumeOutcome};
use minivac::ops::{cluster_status, vacuum_cluster, vacuum_volume};

#[derive(Parser)]
#[command(name = "minivac")]
#[command(about = "minivac vacuum coordinator CLI")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, default_value = "http://localhost:9333")]
    coordinator: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Vacuum the cluster (or one volume)
    Vacuum {
        /// Garbage ratio override (coordinator default if omitted)
        #[arg(long)]
        garbage_threshold: Option<f64>,

        /// Only this volume
        #[arg(long)]
        volume: Option<u32>,
    },

    /// Show layouts, writable volumes and vacuum state
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Vacuum {
            garbage_threshold,
            volume: Some(vid),
        } => {
            let vid = VolumeId(vid);
            let outcome = vacuum_volume(&cli.coordinator, vid, garbage_threshold).await?;
            println!("Volume {}: {:?}", vid, outcome.state());
            if let VolumeOutcome::PartiallyCommitted { committed, .. } = &outcome {
                let nodes: Vec<&str> = committed.iter().map(|n| n.as_str()).collect();
                println!("  Committed on: {}", nodes.join(", "));
            }
            for failure in outcome.failures() {
                println!("  {} failed on {}: {}", failure.phase, failure.node, failure.error);
            }
        }

        Commands::Vacuum {
            garbage_threshold,
            volume: None,
        } => {
            let report = vacuum_cluster(&cli.coordinator, garbage_threshold).await?;
            println!("Vacuum report ({}):", report.sweep_id);
            println!("  Garbage threshold: {}", report.garbage_threshold);
            println!("  Volumes checked: {}", report.checked);
            println!("  Compacted: {}", report.compacted);
            println!("  Fully committed: {}", report.fully_committed);
            println!("  Partially committed: {}", report.partially_committed);
            println!("  Compaction failed: {}", report.compact_failed);
            println!("  Skipped: {}", report.skipped);
            println!("  Busy: {}", report.busy);
            println!("  Interrupted: {}", report.interrupted);
            for item in &report.attention {
                println!("  ! volume {} is {}", item.volume, item.state);
                for failure in &item.failures {
                    println!("      {} on {}: {}", failure.phase, failure.node, failure.error);
                }
            }
        }

        Commands::Status => {
            let status = cluster_status(&cli.coordinator).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
