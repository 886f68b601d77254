use crate::pipeline::normalize::{canonical_column_name, is_missing};
use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;
use tracing::{info, warn};

/// Opens a table file, transparently gunzipping `.gz` archives.
pub fn open_archive(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("Failed to open table: {:?}", path))?;
    let is_gzip = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"));
    if is_gzip {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn read_archive(path: &Path) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    open_archive(path)?
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read archive: {:?}", path))?;
    Ok(bytes)
}

/// Every column is read as text: a stray token deep in the file must not
/// fail dtype inference, it is handled per cell instead.
fn read_text_table(path: &Path) -> Result<DataFrame> {
    let bytes = read_archive(path)?;
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .with_context(|| format!("Failed reading table: {:?}", path))
}

/// canonical name -> header as written in the file
fn canonical_columns(table: &DataFrame) -> HashMap<String, String> {
    table
        .get_column_names()
        .iter()
        .map(|n| (canonical_column_name(n), n.to_string()))
        .collect()
}

fn text_column<'a>(
    table: &'a DataFrame,
    columns: &HashMap<String, String>,
    candidates: &[&str],
) -> Result<Option<&'a StringChunked>> {
    match candidates.iter().find_map(|c| columns.get(*c)) {
        Some(name) => Ok(Some(table.column(name)?.str()?)),
        None => Ok(None),
    }
}

fn required_column<'a>(
    table: &'a DataFrame,
    columns: &HashMap<String, String>,
    candidates: &[&str],
    path: &Path,
) -> Result<&'a StringChunked> {
    text_column(table, columns, candidates)?.ok_or_else(|| {
        anyhow!(
            "Case table {:?} has no {} column (found: {:?})",
            path,
            candidates[0],
            table.get_column_names()
        )
    })
}

fn cell(column: &StringChunked, row: usize) -> Option<&str> {
    column.get(row).filter(|v| !is_missing(v))
}

fn parse_count(cell: Option<&str>) -> Result<i64> {
    let cell = match cell {
        Some(c) if !is_missing(c) => c.trim(),
        _ => return Ok(0),
    };
    if let Ok(v) = cell.parse::<i64>() {
        return Ok(v);
    }
    let v: f64 = cell
        .parse()
        .map_err(|_| anyhow!("count {:?} is not a number", cell))?;
    if !v.is_finite() || v.fract() != 0.0 {
        return Err(anyhow!("count {:?} is not a whole number", cell));
    }
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    if v < i64::MIN as f64 || v >= i64::MAX as f64 {
        return Err(anyhow!("count {:?} is out of range", cell));
    }
    Ok(v as i64)
}

/// Loads the case-count table into a frame with columns `line`, `province`,
/// `country`, `observation_date`, `last_update` (still text) and `confirmed`,
/// `deaths`, `recovered` (Int64, missing tokens read as zero).
///
/// Header names are canonicalized before lookup, so `ObservationDate`,
/// `Province/State`, `Country/Region` and friends all resolve. A missing
/// required column or a malformed count aborts the load.
pub fn load_cases(path: &Path) -> Result<DataFrame> {
    let table = read_text_table(path)?;
    let columns = canonical_columns(&table);

    let date_col = required_column(&table, &columns, &["observation_date"], path)?;
    let country_col = required_column(&table, &columns, &["country_region", "country"], path)?;
    let confirmed_col = required_column(&table, &columns, &["confirmed"], path)?;
    let deaths_col = required_column(&table, &columns, &["deaths"], path)?;
    let recovered_col = required_column(&table, &columns, &["recovered"], path)?;
    let province_col = text_column(&table, &columns, &["province_state", "province"])?;
    let last_update_col = text_column(&table, &columns, &["last_update"])?;

    let height = table.height();
    let mut lines = Vec::with_capacity(height);
    let mut provinces = Vec::with_capacity(height);
    let mut countries = Vec::with_capacity(height);
    let mut dates = Vec::with_capacity(height);
    let mut last_updates = Vec::with_capacity(height);
    let mut confirmed = Vec::with_capacity(height);
    let mut deaths = Vec::with_capacity(height);
    let mut recovered = Vec::with_capacity(height);

    for i in 0..height {
        // header is line 1
        let line = i + 2;
        let count = |column: &StringChunked, name: &str| {
            parse_count(column.get(i))
                .with_context(|| format!("Case table {:?} line {}: bad {}", path, line, name))
        };

        let country = cell(country_col, i)
            .map(|c| c.trim().to_string())
            .ok_or_else(|| anyhow!("Case table {:?} line {}: missing country", path, line))?;

        lines.push(line as u32);
        provinces.push(province_col.and_then(|c| cell(c, i)).map(str::to_string));
        countries.push(country);
        dates.push(cell(date_col, i).map(str::to_string));
        last_updates.push(last_update_col.and_then(|c| cell(c, i)).map(str::to_string));
        confirmed.push(count(confirmed_col, "confirmed")?);
        deaths.push(count(deaths_col, "deaths")?);
        recovered.push(count(recovered_col, "recovered")?);
    }

    let raw = df!(
        "line" => lines,
        "province" => provinces,
        "country" => countries,
        "observation_date" => dates,
        "last_update" => last_updates,
        "confirmed" => confirmed,
        "deaths" => deaths,
        "recovered" => recovered,
    )?;

    info!(path = ?path, rows = raw.height(), "loaded case table");
    Ok(raw)
}

fn parse_population_text(cell: &str) -> Option<f64> {
    if is_missing(cell) {
        return None;
    }
    let cleaned: String = cell
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();
    cleaned.parse().ok()
}

/// Loads the population table into a frame with columns `country` (String)
/// and `population` (UInt64).
///
/// The key column is the first one whose canonical name starts with
/// `country`, the value column the first starting with `population`. Rows
/// without a country name or a usable positive population are skipped; for
/// a repeated country the first row wins.
pub fn load_population(path: &Path) -> Result<DataFrame> {
    let table = read_text_table(path)?;

    let names: Vec<String> = table
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    let pick = |prefix: &str| {
        names
            .iter()
            .find(|n| canonical_column_name(n).starts_with(prefix))
            .cloned()
            .ok_or_else(|| {
                anyhow!(
                    "Population table {:?} has no {}* column (found: {:?})",
                    path,
                    prefix,
                    names
                )
            })
    };
    let country_name = pick("country")?;
    let population_name = pick("population")?;
    let country_col = table.column(&country_name)?.str()?;
    let population_col = table.column(&population_name)?.str()?;

    let mut seen: HashMap<String, u64> = HashMap::new();
    let mut countries = Vec::with_capacity(table.height());
    let mut populations = Vec::with_capacity(table.height());
    let mut skipped = 0usize;
    for i in 0..table.height() {
        let line = i + 2;
        let Some(country) = cell(country_col, i).map(str::trim) else {
            skipped += 1;
            warn!(line, "population row without country name skipped");
            continue;
        };
        let population = match population_col.get(i).and_then(parse_population_text) {
            Some(p) if p.is_finite() && p >= 1.0 => p.round() as u64,
            _ => {
                skipped += 1;
                warn!(line, country = %country, raw = ?population_col.get(i), "population row without positive population skipped");
                continue;
            }
        };
        if let Some(first) = seen.get(country) {
            warn!(country = %country, kept = first, ignored = population, "duplicate population row ignored");
            continue;
        }
        seen.insert(country.to_string(), population);
        countries.push(country.to_string());
        populations.push(population);
    }

    let population = df!(
        "country" => countries,
        "population" => populations,
    )?;
    info!(path = ?path, rows = population.height(), skipped, "loaded population table");
    Ok(population)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const CASES: &str = "SNo,ObservationDate,Province/State,Country/Region,Last Update,Confirmed,Deaths,Recovered\n\
1,01/22/2020,Hubei,Mainland China,1/22/2020 17:00,444.0,17.0,28.0\n\
2,01/22/2020,,Japan,1/22/2020 17:00,2,NA,None\n";

    fn write_gz(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(content.as_bytes()).unwrap();
        enc.finish().unwrap();
        path
    }

    #[test]
    fn loads_gzipped_case_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_gz(dir.path(), "covid_19_data.csv.gz", CASES);

        let raw = load_cases(&path).unwrap();
        assert_eq!(raw.height(), 2);
        assert_eq!(raw.column("line").unwrap().u32().unwrap().get(0), Some(2));
        let province = raw.column("province").unwrap().str().unwrap();
        assert_eq!(province.get(0), Some("Hubei"));
        assert_eq!(province.get(1), None);
        let country = raw.column("country").unwrap().str().unwrap();
        assert_eq!(country.get(0), Some("Mainland China"));
        let date = raw.column("observation_date").unwrap().str().unwrap();
        assert_eq!(date.get(0), Some("01/22/2020"));

        let confirmed = raw.column("confirmed").unwrap().i64().unwrap();
        let deaths = raw.column("deaths").unwrap().i64().unwrap();
        let recovered = raw.column("recovered").unwrap().i64().unwrap();
        assert_eq!(confirmed.get(0), Some(444));
        assert_eq!(deaths.get(0), Some(17));
        assert_eq!(recovered.get(0), Some(28));
        assert_eq!(deaths.get(1), Some(0));
        assert_eq!(recovered.get(1), Some(0));
    }

    #[test]
    fn loads_plain_case_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.csv");
        std::fs::write(&path, CASES).unwrap();
        assert_eq!(load_cases(&path).unwrap().height(), 2);
    }

    #[test]
    fn missing_archive_is_fatal() {
        let err = load_cases(Path::new("/nonexistent/cases.csv.gz")).unwrap_err();
        assert!(err.to_string().contains("Failed to open table"));
    }

    #[test]
    fn corrupt_gzip_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.csv.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();
        assert!(load_cases(&path).is_err());
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.csv");
        std::fs::write(&path, "ObservationDate,Country/Region,Confirmed\n01/22/2020,Japan,2\n")
            .unwrap();
        let err = load_cases(&path).unwrap_err();
        assert!(err.to_string().contains("deaths"));
    }

    #[test]
    fn fractional_count_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.csv");
        std::fs::write(
            &path,
            "ObservationDate,Country/Region,Confirmed,Deaths,Recovered\n01/22/2020,Japan,2.5,0,0\n",
        )
        .unwrap();
        assert!(load_cases(&path).is_err());
    }

    #[test]
    fn counts_outside_i64_are_rejected() {
        assert_eq!(parse_count(Some("2.0")).unwrap(), 2);
        assert_eq!(parse_count(Some(" -3 ")).unwrap(), -3);
        assert_eq!(parse_count(Some("NA")).unwrap(), 0);
        assert_eq!(parse_count(None).unwrap(), 0);

        let err = parse_count(Some("1e30")).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert!(parse_count(Some("-1e30")).is_err());
        assert!(parse_count(Some("9223372036854775808")).is_err());
        assert!(parse_count(Some("inf")).is_err());
    }

    #[test]
    fn loads_population_with_separators_and_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_gz(
            dir.path(),
            "population.csv.gz",
            "Country (or dependency),Population (2020)\n\
Italy,\"60,461,826\"\n\
Atlantis,N.A.\n\
Italy,\"1\"\n\
Japan,\"126,476,461\"\n",
        );

        let population = load_population(&path).unwrap();
        let countries = population.column("country").unwrap().str().unwrap();
        let values = population.column("population").unwrap().u64().unwrap();
        assert_eq!(population.height(), 2);
        assert_eq!(countries.get(0), Some("Italy"));
        assert_eq!(values.get(0), Some(60_461_826));
        assert_eq!(countries.get(1), Some("Japan"));
        assert_eq!(values.get(1), Some(126_476_461));
    }

    #[test]
    fn loads_numeric_population_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("population.csv");
        std::fs::write(&path, "Country,Population\nX,2000000\nY,0\n").unwrap();

        let population = load_population(&path).unwrap();
        assert_eq!(population.height(), 1);
        let countries = population.column("country").unwrap().str().unwrap();
        assert_eq!(countries.get(0), Some("X"));
        let values = population.column("population").unwrap().u64().unwrap();
        assert_eq!(values.get(0), Some(2_000_000));
    }

    #[test]
    fn late_non_numeric_population_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("population.csv");
        let mut content = String::from("Country,Population\n");
        for i in 0..150 {
            content.push_str(&format!("Country {},{}\n", i, 1_000_000 + i));
        }
        content.push_str("Holy See,N.A.\n");
        content.push_str("Tuvalu,NA\n");
        std::fs::write(&path, content).unwrap();

        let population = load_population(&path).unwrap();
        assert_eq!(population.height(), 150);
        let countries = population.column("country").unwrap().str().unwrap();
        assert!(countries.into_iter().all(|c| c != Some("Holy See")));
    }

    #[test]
    fn population_without_key_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("population.csv");
        std::fs::write(&path, "Nation,Population\nX,2000000\n").unwrap();
        assert!(load_population(&path).is_err());
    }
}
