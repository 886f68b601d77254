use anyhow::{Context, Result};
use clap::ValueEnum;
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Parquet,
    Both,
}

/// Writes tidy tables as `<name>.csv` and/or `<name>.parquet` into one
/// directory.
pub struct TableWriter {
    output_dir: PathBuf,
    format: OutputFormat,
}

impl TableWriter {
    pub fn new(output_dir: &Path, format: OutputFormat) -> Result<Self> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output dir: {:?}", output_dir))?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            format,
        })
    }

    pub fn write(&self, name: &str, df: &mut DataFrame) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        if matches!(self.format, OutputFormat::Csv | OutputFormat::Both) {
            let path = self.output_dir.join(format!("{}.csv", name));
            let mut file = File::create(&path)
                .with_context(|| format!("Failed to create output file: {:?}", path))?;
            CsvWriter::new(&mut file)
                .include_header(true)
                .with_date_format(Some(DATE_FORMAT.to_string()))
                .finish(df)
                .with_context(|| format!("Failed to write {:?}", path))?;
            written.push(path);
        }
        if matches!(self.format, OutputFormat::Parquet | OutputFormat::Both) {
            let path = self.output_dir.join(format!("{}.parquet", name));
            let file = File::create(&path)
                .with_context(|| format!("Failed to create output file: {:?}", path))?;
            ParquetWriter::new(file)
                .finish(df)
                .with_context(|| format!("Failed to write {:?}", path))?;
            written.push(path);
        }
        Ok(written)
    }
}
