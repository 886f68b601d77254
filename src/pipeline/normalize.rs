use crate::structures::Area;
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const OBSERVATION_DATE_FORMAT: &str = "%m/%d/%Y";
const LAST_UPDATE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%m/%d/%y %H:%M"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparseable observation date {value:?} (expected month/day/year)")]
pub struct DateParseError {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIssue {
    pub line: usize,
    pub error: DateParseError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    pub rows: usize,
    pub unparseable_dates: Vec<RowIssue>,
    pub unparseable_last_update: usize,
    /// Most recent source refresh seen in `last_update`.
    pub latest_last_update: Option<NaiveDateTime>,
}

/// Canonical lower-case, underscore-separated column name.
///
/// `ObservationDate` -> `observation_date`, `Province/State` ->
/// `province_state`, `Last Update` -> `last_update`.
pub fn canonical_column_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev: Option<char> = None;
    for c in raw.trim().trim_start_matches('\u{feff}').chars() {
        if c.is_alphanumeric() {
            let boundary = c.is_uppercase()
                && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit());
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
        prev = Some(c);
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Missing-value tokens used by the source tables.
pub fn is_missing(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || cell == "NA" || cell == "None"
}

/// First matching rule wins.
pub fn classify_area(province: Option<&str>, country: &str) -> Area {
    if province == Some("Hubei") {
        Area::Hubei
    } else if country == "US" {
        Area::Us
    } else if country.contains("China") {
        Area::ChinaExcludingHubei
    } else {
        Area::RestOfWorld
    }
}

pub fn parse_observation_date(raw: &str) -> Result<NaiveDate, DateParseError> {
    NaiveDate::parse_from_str(raw.trim(), OBSERVATION_DATE_FORMAT).map_err(|_| DateParseError {
        value: raw.to_string(),
    })
}

pub fn parse_last_update(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    LAST_UPDATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Parses the text columns of the raw case table into typed columns:
/// `province` trimmed, `observation_date` as Date (null when unparseable),
/// `last_update` as Datetime (null when unparseable), plus the derived
/// `area` label. Counts pass through unchanged.
#[instrument(skip_all, fields(rows = raw.height()))]
pub fn normalize(raw: DataFrame) -> Result<(DataFrame, NormalizeReport)> {
    let mut report = NormalizeReport {
        rows: raw.height(),
        ..NormalizeReport::default()
    };

    let height = raw.height();
    let mut provinces: Vec<Option<String>> = Vec::with_capacity(height);
    let mut dates: Vec<Option<NaiveDate>> = Vec::with_capacity(height);
    let mut last_updates: Vec<Option<NaiveDateTime>> = Vec::with_capacity(height);
    let mut areas: Vec<&str> = Vec::with_capacity(height);
    {
        let lines = raw.column("line")?.u32()?;
        let province_col = raw.column("province")?.str()?;
        let country_col = raw.column("country")?.str()?;
        let date_col = raw.column("observation_date")?.str()?;
        let last_update_col = raw.column("last_update")?.str()?;

        for i in 0..height {
            let line = lines.get(i).unwrap_or_default() as usize;
            let province = province_col
                .get(i)
                .map(str::trim)
                .filter(|p| !is_missing(p));
            let country = country_col.get(i).unwrap_or_default();

            let observation_date = match parse_observation_date(date_col.get(i).unwrap_or_default()) {
                Ok(d) => Some(d),
                Err(error) => {
                    debug!(line, %error, "observation date left null");
                    report.unparseable_dates.push(RowIssue { line, error });
                    None
                }
            };

            let last_update = last_update_col.get(i).and_then(|text| {
                let parsed = parse_last_update(text);
                if parsed.is_none() {
                    report.unparseable_last_update += 1;
                }
                parsed
            });
            if let Some(ts) = last_update {
                report.latest_last_update = report.latest_last_update.max(Some(ts));
            }

            areas.push(classify_area(province, country).label());
            provinces.push(province.map(str::to_string));
            dates.push(observation_date);
            last_updates.push(last_update);
        }
    }

    let mut cases = raw;
    cases.with_column(Column::new("province".into(), provinces))?;
    cases.with_column(Column::new("observation_date".into(), dates))?;
    cases.with_column(Column::new("last_update".into(), last_updates))?;
    cases.with_column(Column::new("area".into(), areas))?;

    if !report.unparseable_dates.is_empty() {
        warn!(
            rows = report.unparseable_dates.len(),
            "rows with unparseable observation date kept with null date"
        );
    }
    info!(
        rows = cases.height(),
        unparseable_last_update = report.unparseable_last_update,
        latest_last_update = ?report.latest_last_update,
        "normalization completed"
    );

    Ok((cases, report))
}
