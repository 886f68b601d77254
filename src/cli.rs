use crate::writer::OutputFormat;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "covid-spread")]
#[command(about = "Case-count spread tables normalized by population", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline and write the derived tables
    Run(RunArgs),
    /// Show country names that fail to match the population table
    Reconcile(ReconcileArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Case-count table (.csv or .csv.gz)
    #[arg(long)]
    pub cases: PathBuf,

    /// Population table (.csv or .csv.gz)
    #[arg(long)]
    pub population: PathBuf,

    #[arg(long)]
    pub output_dir: PathBuf,

    /// JSON rename table {"version": N, "renames": {old: canonical}}; replaces the built-in one
    #[arg(long)]
    pub renames: Option<PathBuf>,

    #[arg(long, default_value_t = 100)]
    pub confirmed_threshold: i64,

    #[arg(long, default_value_t = 10)]
    pub deaths_threshold: i64,

    #[arg(long, default_value_t = 1_000_000)]
    pub min_population: u64,

    #[arg(long, default_value_t = 10)]
    pub top_n: usize,

    /// Comma-separated countries always included in the selection
    #[arg(long)]
    pub watch: Option<String>,

    #[arg(long, default_value_t = 1_000)]
    pub negligible_confirmed: i64,

    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    pub format: OutputFormat,

    /// Fail when an unmatched country exceeds the negligible-volume threshold
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    #[arg(long)]
    pub cases: PathBuf,

    #[arg(long)]
    pub population: PathBuf,

    #[arg(long)]
    pub renames: Option<PathBuf>,

    #[arg(long, default_value_t = 1_000)]
    pub negligible_confirmed: i64,
}
