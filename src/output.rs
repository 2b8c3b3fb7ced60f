//! CSV Output Layout
//!
//! Each extracted value is keyed by (rcp, ssp, region, year). The
//! `file-organize` keys move components of that tuple into the output file
//! name; the remaining components become row columns.
//!
//! - `csv_organize` splits the tuple into a file key and a row key
//! - `csv_sorted` orders the rows of one file
//! - `csv_makepath` names the file
//! - `CsvSink` writes the table through polars

use crate::config::{ExtractConfig, OrganizeKey};
use crate::slices::YearLabel;
use anyhow::{Context, Result};
use polars::prelude::*;
use regex::Regex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Replaces ssp when `ignore-ssp` is set
const IGNORED_SSP: &str = "NA";

/// One component of a row tuple
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowField {
    Text(String),
    Year(YearLabel),
}

impl fmt::Display for RowField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowField::Text(text) => f.write_str(text),
            RowField::Year(year) => write!(f, "{}", year),
        }
    }
}

pub type RowKey = SmallVec<[RowField; 4]>;

/// File-name components, in `file-organize` order
pub type FileKey = Vec<String>;

/// Tuple components written as row columns
pub fn csv_rownames(config: &ExtractConfig) -> Vec<OrganizeKey> {
    if config.output_file.is_some() {
        return OrganizeKey::ALL.to_vec();
    }
    OrganizeKey::ALL
        .into_iter()
        .filter(|key| !config.file_organize.contains(key))
        .collect()
}

/// Split a row tuple into its file key and row key
pub fn csv_organize(rcp: &str, ssp: &str, region: &str, year: YearLabel, config: &ExtractConfig) -> (FileKey, RowKey) {
    let ssp = if config.ignore_ssp { IGNORED_SSP } else { ssp };
    let field = |key: OrganizeKey| match key {
        OrganizeKey::Rcp => RowField::Text(rcp.to_string()),
        OrganizeKey::Ssp => RowField::Text(ssp.to_string()),
        OrganizeKey::Region => RowField::Text(region.to_string()),
        OrganizeKey::Year => RowField::Year(year),
    };

    let row_key = csv_rownames(config).into_iter().map(field).collect();
    if config.output_file.is_some() {
        return (Vec::new(), row_key);
    }

    let file_key = config.file_organize.iter().map(|&key| field(key).to_string()).collect();
    (file_key, row_key)
}

/// Output path for a file key
///
/// `output-file` wins; otherwise `<output-dir>/<key1>-<key2>..<suffix>.csv`.
/// The output directory is created if needed. `{name}` placeholders in
/// `suffix` are replaced by scalar config values.
pub fn csv_makepath(file_key: &[String], config: &ExtractConfig) -> Result<PathBuf> {
    if let Some(path) = &config.output_file {
        return Ok(path.clone());
    }

    let outdir = config.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&outdir)
        .with_context(|| format!("Failed to create output directory: {:?}", outdir))?;

    let suffix = match &config.suffix {
        Some(suffix) => format_suffix(suffix, config)?,
        None => String::new(),
    };

    Ok(outdir.join(format!("{}{}.csv", file_key.join("-"), suffix)))
}

fn format_suffix(suffix: &str, config: &ExtractConfig) -> Result<String> {
    let placeholder = Regex::new(r"\{([^{}]+)\}")?;

    let mut formatted = String::with_capacity(suffix.len());
    let mut last = 0;
    for caps in placeholder.captures_iter(suffix) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = config
            .scalar(name.as_str())
            .with_context(|| format!("Suffix placeholder {{{}}} has no scalar config value", name.as_str()))?;
        formatted.push_str(&suffix[last..whole.start()]);
        formatted.push_str(&value);
        last = whole.end();
    }
    formatted.push_str(&suffix[last..]);

    Ok(formatted)
}

/// The rcp of a row, from whichever key carries it
pub fn csv_organized_rcp(file_key: &[String], row_key: &RowKey, config: &ExtractConfig) -> Option<String> {
    if config.output_file.is_none() {
        if let Some(ii) = config.file_organize.iter().position(|&key| key == OrganizeKey::Rcp) {
            return file_key.get(ii).cloned();
        }
    }

    let ii = csv_rownames(config).iter().position(|&key| key == OrganizeKey::Rcp)?;
    row_key.get(ii).map(|field| field.to_string())
}

/// Order the rows of one output file
///
/// - year and region both in the file name: unchanged
/// - year a row column: by year (stable, so regions keep discovery order)
/// - only region a row column: by position in `regionorder`, ascending, or
///   descending with `legacy-region-order`; unknown regions go last
pub fn csv_sorted<T>(mut rows: Vec<(RowKey, T)>, config: &ExtractConfig) -> Vec<(RowKey, T)> {
    let names = csv_rownames(config);
    let year_col = names.iter().position(|&key| key == OrganizeKey::Year);
    let region_col = names.iter().position(|&key| key == OrganizeKey::Region);

    match (year_col, region_col) {
        (Some(col), _) => rows.sort_by(|a, b| a.0[col].cmp(&b.0[col])),
        (None, Some(col)) => {
            let order: FxHashMap<&str, usize> = config
                .regionorder
                .iter()
                .enumerate()
                .map(|(ii, region)| (region.as_str(), ii))
                .collect();
            let legacy = config.legacy_region_order;

            rows.sort_by_key(|(key, _)| {
                let position = match &key[col] {
                    RowField::Text(region) => order.get(region.as_str()).copied(),
                    RowField::Year(_) => None,
                };
                match position {
                    Some(ii) if legacy => (0, usize::MAX - ii),
                    Some(ii) => (0, ii),
                    None => (1, 0),
                }
            });
        }
        (None, None) => {}
    }

    rows
}

/// Column-oriented CSV table
#[derive(Debug, Default)]
pub struct CsvSink {
    columns: Vec<Column>,
    height: Option<usize>,
}

impl CsvSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        self.push(Series::new(name.into(), values))
    }

    /// Numeric column; `None` becomes an empty cell
    pub fn number_column(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        self.push(Series::new(name.into(), values))
    }

    fn push(&mut self, series: Series) -> Result<()> {
        match self.height {
            Some(height) if height != series.len() => anyhow::bail!(
                "Column {} has {} rows, expected {}",
                series.name(),
                series.len(),
                height
            ),
            _ => self.height = Some(series.len()),
        }
        self.columns.push(series.into());
        Ok(())
    }

    /// Write the table with a header row
    pub fn write(self, path: &Path) -> Result<()> {
        let mut df = DataFrame::new(self.columns).with_context(|| "Failed to assemble output table")?;

        let mut file = File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)
            .with_context(|| format!("Failed to write CSV: {:?}", path))?;

        tracing::info!("Wrote {} rows to {}", df.height(), path.display());
        Ok(())
    }
}
