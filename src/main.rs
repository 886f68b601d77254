mod cli;
mod config;
mod loader;
mod pipeline;
mod reconcile_mode;
mod structures;
mod writer;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let outcome = pipeline::run_pipeline(args)?;
            if !outcome.reconciled {
                warn!(
                    output_dir = ?outcome.output_dir,
                    summary = ?outcome.summary_path,
                    "tables written with unmatched countries; see the reconciliation section of the run summary"
                );
            }
        }
        Commands::Reconcile(args) => {
            reconcile_mode::run_reconcile(args)?;
        }
    }

    Ok(())
}
