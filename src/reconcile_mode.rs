use crate::cli::ReconcileArgs;
use crate::config::RenameTable;
use crate::loader::{load_cases, load_population};
use crate::pipeline::normalize::normalize;
use crate::pipeline::reconcile::{reconcile, ReconcileReport, UnmatchedCountry};
use anyhow::Result;
use colored::Colorize;
use std::time::Instant;
use tracing::info;

fn render_unmatched(title: &str, unmatched: &[UnmatchedCountry], negligible: i64) -> String {
    let mut out = format!("{} ({})\n", title.bold(), unmatched.len());
    for u in unmatched {
        let line = format!("  {:<40} {:>12}", u.country, u.confirmed);
        if u.confirmed > negligible {
            out.push_str(&format!("{}\n", line.red()));
        } else {
            out.push_str(&format!("{}\n", line.dimmed()));
        }
    }
    out
}

pub fn render_report(report: &ReconcileReport) -> String {
    let mut out = render_unmatched(
        "Unmatched before renames",
        &report.unmatched_before,
        report.negligible_confirmed,
    );
    out.push_str(&format!(
        "Rename table v{} rewrote {} rows\n",
        report.rename_table_version, report.renamed_rows
    ));
    out.push_str(&render_unmatched(
        "Unmatched after renames",
        &report.unmatched_after,
        report.negligible_confirmed,
    ));
    out.push_str(&format!(
        "Unmatched confirmed volume: {} of {} ({:.4}%)\n",
        report.unmatched_confirmed,
        report.total_confirmed,
        report.unmatched_share() * 100.0
    ));
    out
}

/// Prints the before/after country diff and fails when a residual mismatch
/// is above the negligible volume.
pub fn run_reconcile(args: ReconcileArgs) -> Result<()> {
    info!(cases = ?args.cases, population = ?args.population, "starting reconcile diagnostics");

    let start_load = Instant::now();
    let cases = load_cases(&args.cases)?;
    let population = load_population(&args.population)?;
    let renames = RenameTable::load_or_builtin(args.renames.as_deref())?;
    info!(
        case_rows = cases.height(),
        population_rows = population.height(),
        elapsed_ms = start_load.elapsed().as_millis(),
        "loaded inputs"
    );

    let (cases, _) = normalize(cases)?;
    let (_, report) = reconcile(cases, &population, &renames, args.negligible_confirmed)?;

    print!("{}", render_report(&report));
    match report.check_closure() {
        Ok(()) => {
            println!("{}", "All material countries match the population table".green());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
