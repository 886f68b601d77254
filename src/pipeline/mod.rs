pub mod aggregate;
pub mod enrich;
pub mod normalize;
pub mod reconcile;
pub mod summary;

use crate::cli::RunArgs;
use crate::config::RenameTable;
use crate::loader::{load_cases, load_population};
use crate::pipeline::enrich::{Enrichment, RankMetric};
use crate::pipeline::normalize::NormalizeReport;
use crate::pipeline::reconcile::ReconcileReport;
use crate::pipeline::summary::{Rankings, RunSummary, Thresholds};
use crate::structures::PipelineConfig;
use crate::writer::TableWriter;
use anyhow::Result;
use polars::prelude::*;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Every table the pipeline derives from one pair of inputs.
#[derive(Debug)]
pub struct DerivedTables {
    pub normalize_report: NormalizeReport,
    pub reconcile_report: ReconcileReport,
    pub area: DataFrame,
    pub global: DataFrame,
    pub country: DataFrame,
    pub enrichment: Enrichment,
    /// Latest snapshot per country, ranked by active cases per million.
    pub latest_ranked: DataFrame,
    pub rankings: Rankings,
    pub selected: BTreeSet<String>,
    pub trajectories: DataFrame,
    pub doubling: DataFrame,
}

/// Normalize -> reconcile -> aggregate -> enrich. Pure: identical inputs give
/// identical tables.
#[instrument(skip_all, fields(case_rows = raw.height(), population_rows = population.height()))]
pub fn derive_tables(
    raw: DataFrame,
    population: &DataFrame,
    renames: &RenameTable,
    config: &PipelineConfig,
) -> Result<DerivedTables> {
    let (cases, normalize_report) = normalize::normalize(raw)?;
    let (cases, reconcile_report) =
        reconcile::reconcile(cases, population, renames, config.negligible_confirmed)?;

    let area = aggregate::area_spread(&cases)?;
    let global = aggregate::global_spread(&cases)?;
    let country = aggregate::country_spread(
        &cases,
        config.confirmed_threshold,
        config.deaths_threshold,
    )?;

    let enrichment = enrich::enrich(&country, population, config.min_population)?;
    let latest = enrich::latest_snapshot(&enrichment.rows)?;
    let selected = enrich::select_countries(&latest, config.top_n, &config.watch_list)?;
    let ranked_names = |metric: RankMetric| -> Result<Vec<String>> {
        enrich::countries(&enrich::rank_latest(&latest, metric)?.head(Some(config.top_n)))
    };
    let rankings = Rankings {
        confirmed_per_million: ranked_names(RankMetric::Confirmed)?,
        active_per_million: ranked_names(RankMetric::Active)?,
        deaths_per_million: ranked_names(RankMetric::Deaths)?,
    };
    let latest_ranked = enrich::rank_latest(&latest, RankMetric::Active)?;
    let trajectories = enrich::trajectories(&enrichment.rows, &selected)?;
    let max_days = trajectories
        .column("days_since_confirmed")?
        .i64()?
        .max()
        .unwrap_or(0);
    let doubling = enrich::doubling_curves(&config.doubling_periods, max_days)?;

    info!(
        selected = selected.len(),
        trajectory_rows = trajectories.height(),
        max_days,
        "derived tables ready"
    );

    Ok(DerivedTables {
        normalize_report,
        reconcile_report,
        area,
        global,
        country,
        enrichment,
        latest_ranked,
        rankings,
        selected,
        trajectories,
        doubling,
    })
}

impl DerivedTables {
    pub fn write(&mut self, writer: &TableWriter) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        written.extend(writer.write("area_spread", &mut self.area)?);
        written.extend(writer.write("global_spread", &mut self.global)?);
        written.extend(writer.write("country_spread", &mut self.country)?);
        written.extend(writer.write("country_per_million", &mut self.enrichment.rows)?);
        written.extend(writer.write("latest_per_million", &mut self.latest_ranked)?);
        written.extend(writer.write("selected_trajectories", &mut self.trajectories)?);
        written.extend(writer.write("doubling_curves", &mut self.doubling)?);
        Ok(written)
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub output_dir: PathBuf,
    pub summary_path: PathBuf,
    /// False when an unmatched country is above the negligible volume.
    pub reconciled: bool,
}

pub fn parse_watch_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn config_from_args(args: &RunArgs) -> PipelineConfig {
    let defaults = PipelineConfig::default();
    PipelineConfig {
        confirmed_threshold: args.confirmed_threshold,
        deaths_threshold: args.deaths_threshold,
        min_population: args.min_population,
        top_n: args.top_n,
        watch_list: args
            .watch
            .as_deref()
            .map(parse_watch_list)
            .unwrap_or(defaults.watch_list),
        negligible_confirmed: args.negligible_confirmed,
        doubling_periods: defaults.doubling_periods,
    }
}

#[instrument(skip(args))]
pub fn run_pipeline(args: RunArgs) -> Result<RunOutcome> {
    info!(cases = ?args.cases, population = ?args.population, output_dir = ?args.output_dir, "starting pipeline");

    let t_load = Instant::now();
    let cases = load_cases(&args.cases)?;
    let population = load_population(&args.population)?;
    let renames = RenameTable::load_or_builtin(args.renames.as_deref())?;
    info!(
        case_rows = cases.height(),
        population_rows = population.height(),
        rename_table_version = renames.version,
        duration_s = t_load.elapsed().as_secs_f32(),
        "inputs loaded"
    );

    let config = config_from_args(&args);
    let t_derive = Instant::now();
    let mut tables = derive_tables(cases, &population, &renames, &config)?;
    info!(duration_s = t_derive.elapsed().as_secs_f32(), "pipeline stages completed");

    let reconciled = match tables.reconcile_report.check_closure() {
        Ok(()) => true,
        Err(e) if args.strict => return Err(e.into()),
        Err(e) => {
            warn!(error = %e, "continuing with unmatched countries (use --strict to fail)");
            false
        }
    };

    let t_write = Instant::now();
    let writer = TableWriter::new(&args.output_dir, args.format)?;
    let outputs = tables.write(&writer)?;
    info!(
        files = outputs.len(),
        duration_s = t_write.elapsed().as_secs_f32(),
        "tables written"
    );

    let summary = RunSummary {
        generated_at: RunSummary::stamp(),
        cases_path: args.cases.clone(),
        population_path: args.population.clone(),
        source_last_update: tables
            .normalize_report
            .latest_last_update
            .map(|t| t.to_string()),
        case_rows: tables.normalize_report.rows,
        unparseable_dates: tables
            .normalize_report
            .unparseable_dates
            .iter()
            .map(|issue| format!("line {}: {}", issue.line, issue.error))
            .collect(),
        population_rows: population.height(),
        thresholds: Thresholds {
            confirmed: config.confirmed_threshold,
            deaths: config.deaths_threshold,
            min_population: config.min_population,
            top_n: config.top_n,
        },
        reconciliation: tables.reconcile_report.clone(),
        excluded_countries: tables.enrichment.excluded.clone(),
        rankings: tables.rankings.clone(),
        selected_countries: tables.selected.iter().cloned().collect(),
        outputs,
    };
    let summary_path = args.output_dir.join("run_summary.json");
    summary.save(&summary_path)?;
    info!(summary = ?summary_path, reconciled, "pipeline completed");

    Ok(RunOutcome {
        output_dir: args.output_dir,
        summary_path,
        reconciled,
    })
}
