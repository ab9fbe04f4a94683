mod commands;
mod vcs;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use soul_config::{AppConfig, DEFAULT_CONFIG_PATH};

#[derive(Debug, Parser)]
#[command(
    name = "soul",
    version,
    about = "Distill memory files into a tiered, traceable soul document"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fold new signals, promote axioms and rewrite the soul document.
    Synthesize {
        /// Run even when too little new content has accumulated.
        #[arg(long)]
        force: bool,
        /// Compute everything but write nothing.
        #[arg(long)]
        dry_run: bool,
        /// Notation: native, labeled, math or math-emoji.
        #[arg(long)]
        format: Option<String>,
        /// Show the line diff against the current document.
        #[arg(long)]
        diff: bool,
    },
    /// Show run state, pending content and document integrity.
    Status {
        #[arg(long, short)]
        verbose: bool,
    },
    /// Restore the soul document from a backup.
    Rollback {
        /// List available backups instead of restoring.
        #[arg(long)]
        list: bool,
        /// Backup id; defaults to the latest.
        backup_id: Option<String>,
        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },
    /// Inspect promoted axioms and their provenance.
    Audit {
        #[arg(long)]
        list: bool,
        #[arg(long)]
        stats: bool,
        /// Axiom id, short id or symbol.
        axiom_id: Option<String>,
    },
    /// Follow one axiom back to its strongest sources.
    Trace {
        /// Axiom id, short id or symbol.
        axiom_id: String,
    },
    /// Print the effective configuration, or write it to the config path.
    Config {
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Synthesize {
            force,
            dry_run,
            format,
            diff,
        } => {
            let args = commands::SynthesizeArgs {
                force,
                dry_run,
                format,
                diff,
            };
            commands::run_synthesize(&config, args).await?;
        }
        Commands::Status { verbose } => {
            commands::run_status(&config, verbose).await?;
        }
        Commands::Rollback {
            list,
            backup_id,
            force,
        } => {
            if list {
                commands::run_rollback_list(&config).await?;
            } else {
                commands::run_rollback(&config, backup_id.as_deref(), force).await?;
            }
        }
        Commands::Audit {
            list,
            stats,
            axiom_id,
        } => {
            commands::run_audit(&config, list, stats, axiom_id.as_deref()).await?;
        }
        Commands::Trace { axiom_id } => {
            commands::run_trace(&config, &axiom_id).await?;
        }
        Commands::Config { write } => {
            commands::run_config(&config, &cli.config, write)?;
        }
    }

    Ok(())
}
