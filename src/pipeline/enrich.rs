use anyhow::Result;
use polars::lazy::dsl::{col, lit};
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

const PER_MILLION: f64 = 1_000_000.0;

const TOTALS: [&str; 4] = [
    "confirmed_total",
    "deaths_total",
    "recovered_total",
    "active_total",
];

const ENRICHED_COLUMNS: [&str; 13] = [
    "country",
    "observation_date",
    "population",
    "confirmed_total",
    "deaths_total",
    "recovered_total",
    "active_total",
    "confirmed_total_per_1m",
    "deaths_total_per_1m",
    "recovered_total_per_1m",
    "active_total_per_1m",
    "days_since_confirmed",
    "days_since_deaths",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    NoPopulationMatch,
    BelowPopulationFloor { population: u64 },
    BelowConfirmedThreshold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedCountry {
    pub country: String,
    pub latest_confirmed: i64,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone)]
pub struct Enrichment {
    pub rows: DataFrame,
    pub excluded: Vec<ExcludedCountry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMetric {
    Confirmed,
    Active,
    Deaths,
}

impl RankMetric {
    fn column(&self) -> &'static str {
        match self {
            RankMetric::Confirmed => "confirmed_total_per_1m",
            RankMetric::Active => "active_total_per_1m",
            RankMetric::Deaths => "deaths_total_per_1m",
        }
    }
}

fn per_million(total: &str) -> Expr {
    (col(total).cast(DataType::Float64) / col("population").cast(DataType::Float64)
        * lit(PER_MILLION))
    .alias(format!("{}_per_1m", total))
}

fn join_on_country(lf: LazyFrame, other: LazyFrame, how: JoinType) -> LazyFrame {
    lf.join(other, [col("country")], [col("country")], JoinArgs::new(how))
}

/// Inner-joins country spread rows to population. Countries at or below
/// `min_population`, countries without a population row, and rows before the
/// confirmed-threshold crossing are left out entirely. Every excluded country
/// is reported (and logged) with its latest confirmed count.
#[instrument(skip_all, fields(rows = spread.height(), min_population = min_population))]
pub fn enrich(spread: &DataFrame, population: &DataFrame, min_population: u64) -> Result<Enrichment> {
    let rows = join_on_country(spread.clone().lazy(), population.clone().lazy(), JoinType::Inner)
        .filter(col("population").gt(lit(min_population)))
        .filter(col("days_since_confirmed").is_not_null())
        .with_columns(TOTALS.map(per_million))
        .select(ENRICHED_COLUMNS.map(col))
        .sort(["country", "observation_date"], SortMultipleOptions::default())
        .collect()?;

    let per_country = spread.clone().lazy().group_by([col("country")]).agg([
        col("confirmed_total")
            .sort_by([col("observation_date")], SortMultipleOptions::default())
            .last()
            .alias("latest_confirmed"),
        col("days_since_confirmed")
            .is_not_null()
            .any(false)
            .alias("crossed"),
    ]);
    let left_out = join_on_country(per_country, population.clone().lazy(), JoinType::Left)
        .filter(
            col("population")
                .is_null()
                .or(col("population").lt_eq(lit(min_population)))
                .or(col("crossed").not()),
        )
        .sort(["country"], SortMultipleOptions::default())
        .collect()?;

    let names = left_out.column("country")?.str()?;
    let latest = left_out.column("latest_confirmed")?.i64()?;
    let populations = left_out.column("population")?.u64()?;
    let mut excluded = Vec::with_capacity(left_out.height());
    for i in 0..left_out.height() {
        let Some(country) = names.get(i) else { continue };
        let latest_confirmed = latest.get(i).unwrap_or(0);
        let reason = match populations.get(i) {
            None => {
                warn!(country = %country, latest_confirmed, "no population match; left out of per-million tables");
                ExclusionReason::NoPopulationMatch
            }
            Some(p) if p <= min_population => {
                info!(country = %country, population = p, "population below floor; left out of per-million tables");
                ExclusionReason::BelowPopulationFloor { population: p }
            }
            Some(_) => {
                debug!(country = %country, latest_confirmed, "confirmed threshold never crossed");
                ExclusionReason::BelowConfirmedThreshold
            }
        };
        excluded.push(ExcludedCountry {
            country: country.to_string(),
            latest_confirmed,
            reason,
        });
    }

    info!(
        rows = rows.height(),
        excluded = excluded.len(),
        "population enrichment completed"
    );
    Ok(Enrichment { rows, excluded })
}

pub fn countries(df: &DataFrame) -> Result<Vec<String>> {
    Ok(df
        .column("country")?
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect())
}

/// The most recent row of each country, in country order.
pub fn latest_snapshot(rows: &DataFrame) -> Result<DataFrame> {
    Ok(rows
        .clone()
        .lazy()
        .filter(
            col("observation_date").eq(col("observation_date").max().over([col("country")])),
        )
        .sort(["country"], SortMultipleOptions::default())
        .collect()?)
}

/// Descending by `metric`; ties broken by country name.
pub fn rank_latest(latest: &DataFrame, metric: RankMetric) -> Result<DataFrame> {
    Ok(latest
        .clone()
        .lazy()
        .sort(
            [metric.column(), "country"],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .collect()?)
}

/// Top `top_n` countries by latest active cases per million, united with the
/// watch-list. Watch-list entries with no per-million rows are dropped.
pub fn select_countries(
    latest: &DataFrame,
    top_n: usize,
    watch_list: &[String],
) -> Result<BTreeSet<String>> {
    let top = rank_latest(latest, RankMetric::Active)?.head(Some(top_n));
    let mut selected: BTreeSet<String> = countries(&top)?.into_iter().collect();

    let present: BTreeSet<String> = countries(latest)?.into_iter().collect();
    for country in watch_list {
        if present.contains(country) {
            selected.insert(country.clone());
        } else {
            warn!(country = %country, "watch-list country has no per-million rows");
        }
    }
    Ok(selected)
}

pub fn trajectories(rows: &DataFrame, selected: &BTreeSet<String>) -> Result<DataFrame> {
    let keep = df!("country" => selected.iter().map(String::as_str).collect::<Vec<_>>())?;
    Ok(join_on_country(rows.clone().lazy(), keep.lazy(), JoinType::Inner)
        .sort(
            ["country", "days_since_confirmed"],
            SortMultipleOptions::default(),
        )
        .collect()?)
}

/// `(1 + 1/P)^day` for each period `P` and each day in `0..=max_days`.
pub fn doubling_curves(periods: &[u32], max_days: i64) -> Result<DataFrame> {
    let (mut period_days, mut days, mut values) = (Vec::new(), Vec::new(), Vec::new());
    for &period in periods.iter().filter(|p| **p > 0) {
        let base = 1.0 + 1.0 / period as f64;
        for day in 0..=max_days.max(0) {
            period_days.push(period);
            days.push(day);
            values.push(base.powi(day as i32));
        }
    }
    Ok(df!(
        "period_days" => period_days,
        "days_since_event" => days,
        "value" => values,
    )?)
}
