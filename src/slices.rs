//! Region and Year Slicing
//!
//! `iterate_regions` reads one result file and returns a `RegionSelection`;
//! its `iter()` yields one slice per requested region. `iterate_values`
//! turns a slice into (year label, value) pairs, either at exact years or
//! as means over year ranges.
//!
//! Slice layouts:
//! - point data: `[time]` per region, `[time, region]` for "all"
//! - delta-method data: `[variant, time]` per region, `[variant, time, region]` for "all"

use crate::config::{DeltaMethodSetting, ExtractConfig, ALL_REGIONS_LABEL};
use crate::error::ExtractError;
use crate::reader::{read_region, BatchContext, DatasetOpener, ResultTriple, DEFAULT_COLUMN};
use crate::reconcile::reconcile;
use anyhow::Result;
use ndarray::{Array2, ArrayD, ArrayViewD, Axis};
use rustc_hash::FxHashMap;
use std::fmt;
use std::path::Path;

/// Costs files are stored in units 1e5 times larger than reported
const COSTS_SCALE: f64 = 1e5;

/// Label of an output value along the year dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum YearLabel {
    Single(i32),
    /// Half-open range `[start, end)`
    Range(i32, i32),
}

impl YearLabel {
    /// First year covered, used for numeric ordering
    pub fn start(&self) -> i32 {
        match *self {
            YearLabel::Single(year) | YearLabel::Range(year, _) => year,
        }
    }
}

impl fmt::Display for YearLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YearLabel::Single(year) => write!(f, "{}", year),
            YearLabel::Range(start, end) => write!(f, "{}-{}", start, end),
        }
    }
}

/// Data of one result file, ready to be sliced by region
#[derive(Debug, Clone)]
pub struct RegionSelection {
    triple: ResultTriple,
    /// (label, region index); `None` means every region
    selected: Vec<(String, Option<usize>)>,
}

/// Values of one region
#[derive(Debug, Clone)]
pub struct RegionSlice<'a> {
    pub region: &'a str,
    pub years: &'a [i32],
    pub values: ArrayViewD<'a, f64>,
    pub time_axis: Axis,
}

impl RegionSelection {
    /// Select regions from `triple` according to `config`
    ///
    /// Fails if a requested region is not on the region axis.
    pub fn new(triple: ResultTriple, config: &ExtractConfig) -> Result<Self> {
        if config.is_allregions() {
            return Ok(RegionSelection { triple, selected: vec![(ALL_REGIONS_LABEL.to_string(), None)] });
        }

        let selected = {
            let index: FxHashMap<&str, usize> = triple
                .regions
                .iter()
                .enumerate()
                .map(|(ii, region)| (region.as_str(), ii))
                .collect();

            config
                .resolve_regions(&triple.regions)
                .into_iter()
                .map(|region| match index.get(region.as_str()) {
                    Some(&ii) => Ok((region, Some(ii))),
                    None => Err(ExtractError::RegionNotFound(region).into()),
                })
                .collect::<Result<Vec<_>>>()?
        };

        Ok(RegionSelection { triple, selected })
    }

    pub fn triple(&self) -> &ResultTriple {
        &self.triple
    }

    /// Slices in output order; can be called any number of times
    pub fn iter(&self) -> RegionSlices<'_> {
        RegionSlices { selection: self, position: 0 }
    }
}

impl<'a> IntoIterator for &'a RegionSelection {
    type Item = RegionSlice<'a>;
    type IntoIter = RegionSlices<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct RegionSlices<'a> {
    selection: &'a RegionSelection,
    position: usize,
}

impl<'a> Iterator for RegionSlices<'a> {
    type Item = RegionSlice<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (label, index) = self.selection.selected.get(self.position)?;
        self.position += 1;

        let data = &self.selection.triple.data;
        let values = match index {
            Some(ii) => data.region(*ii),
            None => data.view(),
        };

        Some(RegionSlice {
            region: label,
            years: &self.selection.triple.years,
            values,
            time_axis: data.time_axis(),
        })
    }
}

/// Read `path` and prepare it for region slicing
///
/// - Costs files read without a column use `costs_ub / 1e5` (after reading
///   `costs_lb` for its consistency checks).
/// - A VCV found while `deltamethod` is unset marks the config as delta-method.
/// - With a master VCV and a seeded batch, the data is reconciled.
/// - The file's region axis is recorded in `config.regionorder`.
pub fn iterate_regions(
    opener: &dyn DatasetOpener,
    batch: &mut BatchContext,
    master_vcv: Option<&Array2<f64>>,
    path: &Path,
    column: Option<&str>,
    config: &mut ExtractConfig,
) -> Result<RegionSelection> {
    let mode = config.deltamethod_mode();
    let is_costs = path.to_string_lossy().contains("costs");

    let mut triple = match column {
        Some(column) => read_region(config, opener, batch, path, column, mode)?,
        None if !is_costs => read_region(config, opener, batch, path, DEFAULT_COLUMN, mode)?,
        None => {
            read_region(config, opener, batch, path, "costs_lb", mode)?;
            let ResultTriple { years, regions, data } = read_region(config, opener, batch, path, "costs_ub", mode)?;
            ResultTriple { years, regions, data: data.scaled(1.0 / COSTS_SCALE) }
        }
    };

    if triple.data.is_delta() && config.deltamethod.is_none() {
        config.deltamethod = Some(DeltaMethodSetting::Flag(true));
    }

    if let Some(master) = master_vcv {
        if batch.is_seeded() {
            triple.data = reconcile(batch, master, triple.data, path)?;
        }
    }

    config.regionorder = triple.regions.clone();

    RegionSelection::new(triple, config)
}

/// (label, value) pairs of one region slice
pub struct ValueSlices<'a> {
    years: &'a [i32],
    values: ArrayViewD<'a, f64>,
    time_axis: Axis,
    labels: Vec<YearLabel>,
    position: usize,
}

/// Values at the configured years, or means over the configured year ranges
///
/// Explicit years use exact index lookup; a year missing from the time axis
/// yields `YearNotFound`. Ranges average every year in `[start, end)`; an
/// empty range yields `EmptyYearset`.
pub fn iterate_values<'a>(
    years: &'a [i32],
    values: ArrayViewD<'a, f64>,
    time_axis: Axis,
    config: &ExtractConfig,
) -> ValueSlices<'a> {
    let labels = match config.resolve_yearsets() {
        Some(ranges) => ranges.into_iter().map(|(start, end)| YearLabel::Range(start, end)).collect(),
        None => config.resolve_years(years).into_iter().map(YearLabel::Single).collect(),
    };

    ValueSlices { years, values, time_axis, labels, position: 0 }
}

impl<'a> RegionSlice<'a> {
    pub fn iterate_values(&self, config: &ExtractConfig) -> ValueSlices<'a> {
        iterate_values(self.years, self.values.clone(), self.time_axis, config)
    }
}

impl<'a> ValueSlices<'a> {
    fn value(&self, label: YearLabel) -> Result<ArrayD<f64>> {
        match label {
            YearLabel::Single(year) => {
                let ii = self
                    .years
                    .iter()
                    .position(|&y| y == year)
                    .ok_or(ExtractError::YearNotFound(year))?;
                Ok(self.values.index_axis(self.time_axis, ii).to_owned())
            }
            YearLabel::Range(start, end) => {
                let indices: Vec<usize> = self
                    .years
                    .iter()
                    .enumerate()
                    .filter(|&(_, &y)| y >= start && y < end)
                    .map(|(ii, _)| ii)
                    .collect();

                self.values
                    .select(self.time_axis, &indices)
                    .mean_axis(self.time_axis)
                    .ok_or_else(|| ExtractError::EmptyYearset { start, end }.into())
            }
        }
    }
}

impl<'a> Iterator for ValueSlices<'a> {
    type Item = Result<(YearLabel, ArrayD<f64>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let label = *self.labels.get(self.position)?;
        self.position += 1;
        Some(self.value(label).map(|value| (label, value)))
    }
}
