use crate::config::RenameTable;
use anyhow::Result;
use polars::lazy::dsl::{col, lit};
use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedCountry {
    pub country: String,
    /// Cumulative confirmed count on the country's latest observation date.
    pub confirmed: i64,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{} case-table countries above {threshold} confirmed have no population match: {}", .unmatched.len(), names(.unmatched))]
    MaterialMismatch {
        threshold: i64,
        unmatched: Vec<UnmatchedCountry>,
    },
}

fn names(unmatched: &[UnmatchedCountry]) -> String {
    unmatched
        .iter()
        .map(|u| format!("{} ({})", u.country, u.confirmed))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub rename_table_version: u32,
    pub renamed_rows: usize,
    pub unmatched_before: Vec<UnmatchedCountry>,
    pub unmatched_after: Vec<UnmatchedCountry>,
    pub negligible_confirmed: i64,
    /// Latest confirmed volume across every case-table country.
    pub total_confirmed: i64,
    pub unmatched_confirmed: i64,
}

impl ReconcileReport {
    /// Residual mismatches too large to ignore.
    pub fn material(&self) -> Vec<UnmatchedCountry> {
        self.unmatched_after
            .iter()
            .filter(|u| u.confirmed > self.negligible_confirmed)
            .cloned()
            .collect()
    }

    pub fn unmatched_share(&self) -> f64 {
        if self.total_confirmed == 0 {
            0.0
        } else {
            self.unmatched_confirmed as f64 / self.total_confirmed as f64
        }
    }

    pub fn check_closure(&self) -> std::result::Result<(), ReconcileError> {
        let unmatched = self.material();
        if unmatched.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::MaterialMismatch {
                threshold: self.negligible_confirmed,
                unmatched,
            })
        }
    }
}

/// Latest cumulative confirmed count per country, as `country` and
/// `confirmed` columns. Provinces are summed per date and the value on the
/// country's most recent date is kept. Rows with a null date are ignored.
pub fn latest_confirmed_by_country(cases: &DataFrame) -> Result<DataFrame> {
    Ok(cases
        .clone()
        .lazy()
        .filter(col("observation_date").is_not_null())
        .group_by([col("country"), col("observation_date")])
        .agg([col("confirmed").sum()])
        .group_by([col("country")])
        .agg([col("confirmed")
            .filter(col("observation_date").eq(col("observation_date").max()))
            .sum()])
        .sort(["country"], SortMultipleOptions::default())
        .collect()?)
}

/// Case-table countries with no population row of the same name, largest
/// latest confirmed volume first. Countries seen only on undated rows carry
/// zero volume.
pub fn country_diff(cases: &DataFrame, population: &DataFrame) -> Result<Vec<UnmatchedCountry>> {
    let volume = latest_confirmed_by_country(cases)?;
    let unmatched = cases
        .clone()
        .lazy()
        .select([col("country")])
        .unique(None, UniqueKeepStrategy::Any)
        .join(
            volume.lazy(),
            [col("country")],
            [col("country")],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            population.clone().lazy(),
            [col("country")],
            [col("country")],
            JoinArgs::new(JoinType::Left),
        )
        .filter(col("population").is_null())
        .with_column(col("confirmed").fill_null(lit(0i64)))
        .sort(
            ["confirmed", "country"],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .collect()?;

    let names = unmatched.column("country")?.str()?;
    let confirmed = unmatched.column("confirmed")?.i64()?;
    Ok(names
        .into_iter()
        .zip(confirmed)
        .filter_map(|(country, confirmed)| {
            Some(UnmatchedCountry {
                country: country?.to_string(),
                confirmed: confirmed.unwrap_or(0),
            })
        })
        .collect())
}

/// Rewrites the `country` column through the rename table in a single pass.
/// Returns the number of rows touched.
pub fn apply_renames(mut cases: DataFrame, table: &RenameTable) -> Result<(DataFrame, usize)> {
    let mut renamed = 0usize;
    let countries: Vec<Option<String>> = cases
        .column("country")?
        .str()?
        .into_iter()
        .map(|country| {
            country.map(|c| match table.renames.get(c) {
                Some(canonical) => {
                    renamed += 1;
                    canonical.clone()
                }
                None => c.to_string(),
            })
        })
        .collect();
    cases.with_column(Column::new("country".into(), countries))?;
    Ok((cases, renamed))
}

/// Diffs the case table against the population table, applies the rename
/// table and diffs again. The returned cases carry the canonical names.
#[instrument(skip_all, fields(rows = cases.height(), renames = table.len()))]
pub fn reconcile(
    cases: DataFrame,
    population: &DataFrame,
    table: &RenameTable,
    negligible_confirmed: i64,
) -> Result<(DataFrame, ReconcileReport)> {
    let unmatched_before = country_diff(&cases, population)?;

    let (cases, renamed_rows) = apply_renames(cases, table)?;

    let unmatched_after = country_diff(&cases, population)?;
    let total_confirmed = latest_confirmed_by_country(&cases)?
        .column("confirmed")?
        .i64()?
        .sum()
        .unwrap_or(0);

    let report = ReconcileReport {
        rename_table_version: table.version,
        renamed_rows,
        negligible_confirmed,
        total_confirmed,
        unmatched_confirmed: unmatched_after.iter().map(|u| u.confirmed).sum(),
        unmatched_before,
        unmatched_after,
    };

    for u in &report.unmatched_after {
        if u.confirmed > negligible_confirmed {
            warn!(country = %u.country, confirmed = u.confirmed, "unmatched country above negligible volume");
        }
    }
    info!(
        renamed_rows,
        unmatched_before = report.unmatched_before.len(),
        unmatched_after = report.unmatched_after.len(),
        unmatched_share = report.unmatched_share(),
        "reconciliation completed"
    );

    Ok((cases, report))
}
