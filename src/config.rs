//! Extraction Configuration
//!
//! Typed view of the run configuration. Every key is optional and carries a
//! documented default, so the rest of the crate never probes a loose mapping.
//!
//! Sources, in order of precedence (later wins):
//! 1. A YAML file (first positional `*.yml` argument or `--config=<file>`)
//! 2. `--key=<yaml value>` overrides, bare `--flag` meaning `true`

use crate::error::ExtractError;
use anyhow::{Context, Result};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Region shorthand for the global aggregate (stored as the empty string)
pub const GLOBAL_REGION: &str = "";

/// Region label used when region filtering is skipped entirely
pub const ALL_REGIONS_LABEL: &str = "all";

/// Ranges used when `yearsets: true` is given without explicit ranges
pub const STANDARD_YEARSETS: [(i32, i32); 4] = [(2000, 2019), (2020, 2039), (2040, 2059), (2080, 2099)];

/// A single root or a mapping from path pattern to root
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PathSetting {
    Single(PathBuf),
    Branches(BTreeMap<String, PathBuf>),
}

/// `deltamethod` key: a flag (embedded VCV) or a parallel results tree
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DeltaMethodSetting {
    Flag(bool),
    Parallel(PathSetting),
}

/// How the reader decides whether a file carries delta-method data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaMethodMode {
    /// Infer from the presence of a `vcv` variable
    Auto,
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonteCarloMode {
    Both,
}

/// `do-montecarlo` key: `true`, `false` or `both`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MonteCarloSetting {
    Flag(bool),
    Mode(MonteCarloMode),
}

impl Default for MonteCarloSetting {
    fn default() -> Self {
        MonteCarloSetting::Flag(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirTree {
    #[default]
    Normal,
    ClimateOnly,
}

/// Row-tuple component that can be moved into the output file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizeKey {
    Rcp,
    Ssp,
    Region,
    Year,
}

impl OrganizeKey {
    pub const ALL: [OrganizeKey; 4] = [OrganizeKey::Rcp, OrganizeKey::Ssp, OrganizeKey::Region, OrganizeKey::Year];

    pub fn name(self) -> &'static str {
        match self {
            OrganizeKey::Rcp => "rcp",
            OrganizeKey::Ssp => "ssp",
            OrganizeKey::Region => "region",
            OrganizeKey::Year => "year",
        }
    }
}

/// `yearsets` key: explicit ranges, or `true` for the standard ranges
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum YearsetSetting {
    Flag(bool),
    Ranges(Vec<(i32, i32)>),
}

/// `only-models` key: `all`, a single model, or a list
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ModelFilter {
    Named(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExtractConfig {
    pub region: Option<String>,
    pub regions: Option<Vec<String>>,
    pub year: Option<i32>,
    pub years: Option<Vec<i32>>,
    pub yearsets: Option<YearsetSetting>,

    /// Absent means "infer from each file"
    pub deltamethod: Option<DeltaMethodSetting>,
    pub results_root: Option<PathSetting>,
    #[serde(rename = "multiimpact_vcv")]
    pub multiimpact_vcv: Option<PathBuf>,

    pub file_organize: Vec<OrganizeKey>,
    pub output_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub suffix: Option<String>,
    pub ignore_ssp: bool,
    pub legacy_region_order: bool,

    pub do_montecarlo: MonteCarloSetting,
    pub only_rcp: Option<String>,
    pub only_iam: Option<String>,
    pub only_ssp: Option<String>,
    pub only_models: Option<ModelFilter>,
    pub targetsubdirs: Option<Vec<String>>,
    pub batchdir: Option<String>,
    pub checks: Option<Vec<String>>,
    pub dirtree: DirTree,
    pub verbose: bool,
    pub column: Option<String>,

    /// Region axis of the most recently sliced file, written by `iterate_regions`
    #[serde(skip)]
    pub regionorder: Vec<String>,

    /// Raw key/value pairs, kept for `{key}` substitution in `suffix`
    #[serde(skip)]
    source: Mapping,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            region: None,
            regions: None,
            year: None,
            years: None,
            yearsets: None,
            deltamethod: None,
            results_root: None,
            multiimpact_vcv: None,
            file_organize: vec![OrganizeKey::Rcp, OrganizeKey::Ssp],
            output_file: None,
            output_dir: None,
            suffix: None,
            ignore_ssp: false,
            legacy_region_order: false,
            do_montecarlo: MonteCarloSetting::default(),
            only_rcp: None,
            only_iam: None,
            only_ssp: None,
            only_models: None,
            targetsubdirs: None,
            batchdir: None,
            checks: None,
            dirtree: DirTree::Normal,
            verbose: false,
            column: None,
            regionorder: Vec::new(),
            source: Mapping::new(),
        }
    }
}

impl ExtractConfig {
    /// Build a config from a YAML mapping
    pub fn from_mapping(mapping: Mapping) -> Result<Self> {
        let mut config: ExtractConfig = serde_yaml::from_value(Value::Mapping(mapping.clone()))
            .with_context(|| "Failed to interpret configuration")?;
        config.source = mapping;
        Ok(config)
    }

    /// Load a YAML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_mapping(read_mapping(path)?)
    }

    /// Parse command-line style arguments into a config and positional arguments
    ///
    /// Accepts an optional leading `*.yml` file, `--config=<file>`,
    /// `--key=<yaml value>` and bare `--flag`. Anything else is positional.
    pub fn from_args<I, S>(args: I) -> Result<(Self, Vec<String>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut mapping = Mapping::new();
        let mut positional = Vec::new();

        for (ii, arg) in args.into_iter().map(Into::<String>::into).enumerate() {
            if ii == 0 && arg.ends_with(".yml") {
                mapping = read_mapping(Path::new(&arg))?;
                continue;
            }

            let Some(option) = arg.strip_prefix("--") else {
                positional.push(arg);
                continue;
            };

            match option.split_once('=') {
                Some(("config", file)) => mapping = read_mapping(Path::new(file))?,
                Some((key, raw)) => {
                    let value: Value = serde_yaml::from_str(raw)
                        .with_context(|| format!("Failed to parse value for --{}", key))?;
                    mapping.insert(Value::String(key.to_string()), value);
                }
                None => {
                    mapping.insert(Value::String(option.to_string()), Value::Bool(true));
                }
            }
        }

        Ok((Self::from_mapping(mapping)?, positional))
    }

    /// Scalar config value rendered as text (for `suffix` placeholders)
    pub fn scalar(&self, key: &str) -> Option<String> {
        match self.source.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Regions to extract, in output order
    ///
    /// `global` becomes the empty-string region in place; `countries` and
    /// `funds` are removed and replaced by the matching codes of `available`,
    /// appended in axis order.
    pub fn resolve_regions(&self, available: &[String]) -> Vec<String> {
        if let Some(region) = &self.region {
            return vec![region.clone()];
        }

        let mut regions: Vec<String> = match &self.regions {
            Some(regions) => regions.clone(),
            None => available.to_vec(),
        };

        for region in regions.iter_mut() {
            if region == "global" {
                *region = GLOBAL_REGION.to_string();
            }
        }

        if regions.iter().any(|r| r == "countries") {
            regions.retain(|r| r != "countries");
            regions.extend(available.iter().filter(|r| r.chars().count() == 3).cloned());
        }

        if regions.iter().any(|r| r == "funds") {
            regions.retain(|r| r != "funds");
            regions.extend(available.iter().filter(|r| r.starts_with("FUND-")).cloned());
        }

        regions
    }

    /// Years to extract, in output order
    pub fn resolve_years(&self, available: &[i32]) -> Vec<i32> {
        if let Some(year) = self.year {
            return vec![year];
        }
        match &self.years {
            Some(years) => years.clone(),
            None => available.to_vec(),
        }
    }

    /// Configured year ranges, if any
    pub fn resolve_yearsets(&self) -> Option<Vec<(i32, i32)>> {
        match &self.yearsets {
            Some(YearsetSetting::Ranges(ranges)) if !ranges.is_empty() => Some(ranges.clone()),
            Some(YearsetSetting::Flag(true)) => Some(STANDARD_YEARSETS.to_vec()),
            _ => None,
        }
    }

    /// Load the master VCV, if one is configured
    pub fn load_multiimpact_vcv(&self) -> Result<Option<Array2<f64>>> {
        match &self.multiimpact_vcv {
            Some(path) => read_matrix_csv(path).map(Some),
            None => Ok(None),
        }
    }

    /// True when no region selection is configured at all
    pub fn is_allregions(&self) -> bool {
        self.region.is_none()
            && self.regions.is_none()
            && !self.file_organize.contains(&OrganizeKey::Region)
    }

    /// True when delta-method results live in a separate directory tree
    pub fn is_parallel_deltamethod(&self) -> bool {
        matches!(self.deltamethod, Some(DeltaMethodSetting::Parallel(_)))
    }

    /// True when values carry a leading variance-component axis
    pub fn is_embedded_deltamethod(&self) -> bool {
        matches!(self.deltamethod, Some(DeltaMethodSetting::Flag(true)))
    }

    /// Reader mode implied by the `deltamethod` key
    pub fn deltamethod_mode(&self) -> DeltaMethodMode {
        match self.deltamethod {
            None => DeltaMethodMode::Auto,
            Some(DeltaMethodSetting::Flag(true)) => DeltaMethodMode::On,
            Some(DeltaMethodSetting::Flag(false)) | Some(DeltaMethodSetting::Parallel(_)) => DeltaMethodMode::Off,
        }
    }

    /// Model allow-list, or `None` for all models
    pub fn allowed_models(&self) -> Option<Vec<&str>> {
        match self.only_models.as_ref()? {
            ModelFilter::Named(name) if name == "all" => None,
            ModelFilter::Named(name) => Some(vec![name.as_str()]),
            ModelFilter::List(models) => Some(models.iter().map(String::as_str).collect()),
        }
    }

    pub fn batchdir(&self) -> &str {
        self.batchdir.as_deref().unwrap_or("median")
    }
}

fn read_mapping(path: &Path) -> Result<Mapping> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    match serde_yaml::from_str::<Value>(&contents)
        .with_context(|| format!("Failed to parse config YAML: {:?}", path))?
    {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(Mapping::new()),
        _ => anyhow::bail!("Config file {:?} is not a key/value mapping", path),
    }
}

/// Read a header-less delimited file of numbers as a square matrix
pub fn read_matrix_csv(path: &Path) -> Result<Array2<f64>> {
    let df = CsvReadOptions::default()
        .with_has_header(false)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("Failed to create CSV reader: {:?}", path))?
        .finish()
        .with_context(|| format!("Failed to parse VCV file: {:?}", path))?;

    let (rows, cols) = (df.height(), df.width());
    if rows != cols {
        return Err(ExtractError::InvalidVcv(format!("{:?} is {} x {}, expected square", path, rows, cols)).into());
    }

    let mut vcv = Array2::zeros((rows, cols));
    for (jj, column) in df.get_columns().iter().enumerate() {
        // Cells with surrounding whitespace come back as strings
        let values: Vec<Option<f64>> = match column.dtype() {
            DataType::String => column
                .str()?
                .into_iter()
                .map(|cell| cell.and_then(|cell| cell.trim().parse::<f64>().ok()))
                .collect(),
            _ => column
                .cast(&DataType::Float64)
                .with_context(|| format!("Column {} of {:?} is not numeric", jj + 1, path))?
                .f64()?
                .into_iter()
                .collect(),
        };

        for (ii, value) in values.into_iter().enumerate() {
            vcv[[ii, jj]] = value.ok_or_else(|| {
                ExtractError::InvalidVcv(format!("{:?}: empty or non-numeric cell at row {}, column {}", path, ii + 1, jj + 1))
            })?;
        }
    }

    Ok(vcv)
}
