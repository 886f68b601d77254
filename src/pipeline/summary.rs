use crate::pipeline::enrich::ExcludedCountry;
use crate::pipeline::reconcile::ReconcileReport;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct Thresholds {
    pub confirmed: i64,
    pub deaths: i64,
    pub min_population: u64,
    pub top_n: usize,
}

/// Country names ordered by latest per-million value, highest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rankings {
    pub confirmed_per_million: Vec<String>,
    pub active_per_million: Vec<String>,
    pub deaths_per_million: Vec<String>,
}

/// Machine-readable record of one pipeline run, written next to the tables.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// Wall clock; the only field that differs between identical runs.
    pub generated_at: String,
    pub cases_path: PathBuf,
    pub population_path: PathBuf,
    /// Latest source refresh found in the case table.
    pub source_last_update: Option<String>,
    pub case_rows: usize,
    /// `line N: <error>` for each row kept with a null observation date.
    pub unparseable_dates: Vec<String>,
    pub population_rows: usize,
    pub thresholds: Thresholds,
    pub reconciliation: ReconcileReport,
    pub excluded_countries: Vec<ExcludedCountry>,
    pub rankings: Rankings,
    pub selected_countries: Vec<String>,
    pub outputs: Vec<PathBuf>,
}

impl RunSummary {
    pub fn stamp() -> String {
        Utc::now().to_rfc3339()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).context("Failed to create run summary file")?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self).context("Failed to write run summary")?;
        Ok(())
    }
}
