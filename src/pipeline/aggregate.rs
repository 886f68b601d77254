use anyhow::Result;
use polars::lazy::dsl::{col, lit, when};
use polars::prelude::*;
use tracing::{debug, info, instrument};

pub const GLOBAL_GROUP: &str = "World";

const METRICS: [&str; 4] = ["confirmed", "deaths", "recovered", "active"];

/// `<metric>_total` minus its value on the previous date present in the
/// same group; the first row of a group gets zero.
fn per_day(metric: &str, key: &str) -> Expr {
    let total = format!("{}_total", metric);
    (col(total.as_str()) - col(total.as_str()).shift(lit(1)).over([col(key)]))
        .fill_null(lit(0i64))
        .alias(format!("{}_per_day", metric))
}

/// `numerator / confirmed_total`, null when confirmed is zero.
fn ratio(numerator: &str, name: &str) -> Expr {
    when(col("confirmed_total").eq(lit(0i64)))
        .then(lit(NULL).cast(DataType::Float64))
        .otherwise(
            col(numerator).cast(DataType::Float64) / col("confirmed_total").cast(DataType::Float64),
        )
        .alias(name)
}

/// Days since `metric` first exceeded `threshold` within the country; null
/// before that date and for countries that never cross.
fn days_since(metric: &str, threshold: i64) -> Expr {
    let day = || col("observation_date").cast(DataType::Int32);
    let first = when(col(metric).gt(lit(threshold)))
        .then(day())
        .otherwise(lit(NULL).cast(DataType::Int32))
        .min()
        .over([col("country")]);
    when(day().gt_eq(first.clone()))
        .then((day() - first).cast(DataType::Int64))
        .otherwise(lit(NULL).cast(DataType::Int64))
}

/// Sums provinces per (`key`, date) and derives active cases, per-day deltas
/// and ratios. Rows are sorted by key then date, which the per-day window
/// relies on.
fn spread(cases: LazyFrame, key: &str) -> LazyFrame {
    cases
        .filter(col("observation_date").is_not_null())
        .group_by([col(key), col("observation_date")])
        .agg([
            col("confirmed").sum().alias("confirmed_total"),
            col("deaths").sum().alias("deaths_total"),
            col("recovered").sum().alias("recovered_total"),
        ])
        .sort([key, "observation_date"], SortMultipleOptions::default())
        .with_column(
            (col("confirmed_total") - col("deaths_total") - col("recovered_total"))
                .alias("active_total"),
        )
        .with_columns(METRICS.map(|m| per_day(m, key)))
        .with_columns([
            ratio("deaths_total", "mortality_ratio"),
            ratio("recovered_total", "recovery_ratio"),
        ])
}

fn log_undated(cases: &DataFrame) -> Result<()> {
    let skipped = cases.column("observation_date")?.null_count();
    if skipped > 0 {
        debug!(skipped, "rows without observation date left out of aggregates");
    }
    Ok(())
}

#[instrument(skip_all, fields(rows = cases.height()))]
pub fn area_spread(cases: &DataFrame) -> Result<DataFrame> {
    log_undated(cases)?;
    let spread = spread(cases.clone().lazy(), "area").collect()?;
    info!(rows = spread.height(), "area spread aggregated");
    Ok(spread)
}

/// The whole table as one more area, labelled `World`.
#[instrument(skip_all, fields(rows = cases.height()))]
pub fn global_spread(cases: &DataFrame) -> Result<DataFrame> {
    let world = cases
        .clone()
        .lazy()
        .with_column(lit(GLOBAL_GROUP).alias("area"));
    let spread = spread(world, "area").collect()?;
    info!(rows = spread.height(), "global spread aggregated");
    Ok(spread)
}

/// Country-level spread with threshold-crossing day counters. Rows before a
/// crossing carry null; dropping pre-confirmed-threshold rows is left to the
/// per-million stage.
#[instrument(skip_all, fields(rows = cases.height()))]
pub fn country_spread(
    cases: &DataFrame,
    confirmed_threshold: i64,
    deaths_threshold: i64,
) -> Result<DataFrame> {
    let spread = spread(cases.clone().lazy(), "country")
        .with_columns([
            days_since("confirmed_total", confirmed_threshold).alias("days_since_confirmed"),
            days_since("deaths_total", deaths_threshold).alias("days_since_deaths"),
        ])
        .collect()?;
    info!(
        rows = spread.height(),
        confirmed_threshold,
        deaths_threshold,
        "country spread aggregated"
    );
    Ok(spread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::Area;
    use chrono::NaiveDate;

    type Case<'a> = (&'a str, Area, Option<u32>, i64, i64, i64);

    fn cases(rows: &[Case<'_>]) -> DataFrame {
        df!(
            "country" => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            "area" => rows.iter().map(|r| r.1.label()).collect::<Vec<_>>(),
            "observation_date" => rows
                .iter()
                .map(|r| r.2.and_then(|d| NaiveDate::from_ymd_opt(2020, 3, d)))
                .collect::<Vec<_>>(),
            "confirmed" => rows.iter().map(|r| r.3).collect::<Vec<_>>(),
            "deaths" => rows.iter().map(|r| r.4).collect::<Vec<_>>(),
            "recovered" => rows.iter().map(|r| r.5).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    fn series(country: &str, days: &[(u32, i64, i64)]) -> DataFrame {
        let rows: Vec<Case<'_>> = days
            .iter()
            .map(|(day, c, d)| (country, Area::RestOfWorld, Some(*day), *c, *d, 0))
            .collect();
        cases(&rows)
    }

    fn ints(df: &DataFrame, name: &str) -> Vec<Option<i64>> {
        df.column(name).unwrap().i64().unwrap().into_iter().collect()
    }

    fn floats(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().f64().unwrap().into_iter().collect()
    }

    fn texts(df: &DataFrame, name: &str) -> Vec<String> {
        df.column(name)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn sums_provinces_sharing_a_date() {
        let spread = country_spread(
            &cases(&[
                ("X", Area::RestOfWorld, Some(1), 50, 2, 1),
                ("X", Area::RestOfWorld, Some(1), 30, 1, 4),
            ]),
            0,
            0,
        )
        .unwrap();
        assert_eq!(spread.height(), 1);
        assert_eq!(ints(&spread, "confirmed_total"), vec![Some(80)]);
        assert_eq!(ints(&spread, "deaths_total"), vec![Some(3)]);
        assert_eq!(ints(&spread, "recovered_total"), vec![Some(5)]);
        assert_eq!(ints(&spread, "active_total"), vec![Some(72)]);
    }

    #[test]
    fn active_is_not_floored() {
        let spread = global_spread(&cases(&[("X", Area::RestOfWorld, Some(1), 10, 6, 8)])).unwrap();
        assert_eq!(ints(&spread, "active_total"), vec![Some(-4)]);
        assert_eq!(texts(&spread, "area"), vec![GLOBAL_GROUP.to_string()]);
    }

    #[test]
    fn deltas_follow_present_dates_and_start_at_zero() {
        // day 3 is missing: the day 4 delta is taken against day 2
        let spread = global_spread(&series("X", &[(4, 20, 3), (1, 5, 0), (2, 8, 1)])).unwrap();
        assert_eq!(
            ints(&spread, "confirmed_per_day"),
            vec![Some(0), Some(3), Some(12)]
        );
        assert_eq!(ints(&spread, "deaths_per_day"), vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn deltas_restart_for_each_group() {
        let spread = country_spread(
            &cases(&[
                ("A", Area::RestOfWorld, Some(1), 10, 0, 0),
                ("B", Area::RestOfWorld, Some(1), 500, 0, 0),
                ("A", Area::RestOfWorld, Some(2), 15, 0, 0),
                ("B", Area::RestOfWorld, Some(2), 700, 0, 0),
            ]),
            0,
            0,
        )
        .unwrap();
        assert_eq!(texts(&spread, "country"), vec!["A", "A", "B", "B"]);
        assert_eq!(
            ints(&spread, "confirmed_per_day"),
            vec![Some(0), Some(5), Some(0), Some(200)]
        );
    }

    #[test]
    fn summed_deltas_match_cumulative_difference() {
        let spread = global_spread(&series(
            "X",
            &[(1, 3, 0), (2, 3, 0), (3, 11, 1), (5, 40, 2), (6, 38, 2), (9, 95, 7)],
        ))
        .unwrap();
        let totals = ints(&spread, "confirmed_total");
        let deltas = ints(&spread, "confirmed_per_day");
        let first = totals[0].unwrap();
        let mut running = 0;
        for (total, delta) in totals.iter().zip(&deltas) {
            running += delta.unwrap();
            assert_eq!(running, total.unwrap() - first);
        }
    }

    #[test]
    fn ratios_are_null_when_confirmed_is_zero() {
        let spread = global_spread(&cases(&[
            ("X", Area::RestOfWorld, Some(1), 0, 0, 0),
            ("X", Area::RestOfWorld, Some(2), 10, 1, 4),
        ]))
        .unwrap();
        assert_eq!(floats(&spread, "mortality_ratio"), vec![None, Some(0.1)]);
        assert_eq!(floats(&spread, "recovery_ratio"), vec![None, Some(0.4)]);
    }

    #[test]
    fn areas_are_grouped_separately() {
        let spread = area_spread(&cases(&[
            ("US", Area::Us, Some(1), 7, 0, 0),
            ("Mainland China", Area::Hubei, Some(1), 100, 0, 0),
        ]))
        .unwrap();
        assert_eq!(texts(&spread, "area"), vec!["Hubei", "US"]);
        assert_eq!(ints(&spread, "confirmed_total"), vec![Some(100), Some(7)]);
    }

    #[test]
    fn null_dates_do_not_reach_aggregates() {
        let spread = global_spread(&cases(&[
            ("X", Area::RestOfWorld, None, 1_000, 0, 0),
            ("X", Area::RestOfWorld, Some(1), 5, 0, 0),
        ]))
        .unwrap();
        assert_eq!(spread.height(), 1);
        assert_eq!(ints(&spread, "confirmed_total"), vec![Some(5)]);
    }

    #[test]
    fn deaths_counter_is_null_before_threshold() {
        // deaths first exceed 10 on day 20
        let days: Vec<(u32, i64, i64)> = (1..=25)
            .map(|day| {
                let deaths = if day >= 20 { 11 + day as i64 } else { day as i64 / 2 };
                (day, 1_000, deaths)
            })
            .collect();
        let spread = country_spread(&series("X", &days), 100, 10).unwrap();
        let counter = ints(&spread, "days_since_deaths");
        assert_eq!(counter.len(), 25);
        assert!(counter[..19].iter().all(Option::is_none));
        assert_eq!(counter[19], Some(0));
        assert_eq!(counter[24], Some(5));
    }

    #[test]
    fn confirmed_counter_starts_at_first_crossing() {
        let days: Vec<(u32, i64, i64)> = (1..=15)
            .map(|day| {
                let confirmed = if day >= 10 { 100 + day as i64 } else { 10 * day as i64 };
                (day, confirmed, 0)
            })
            .collect();
        let spread = country_spread(&series("X", &days), 100, 10).unwrap();
        let counter = ints(&spread, "days_since_confirmed");
        assert_eq!(counter[8], None);
        assert_eq!(counter[9], Some(0));
        assert_eq!(counter[14], Some(5));
    }
}
