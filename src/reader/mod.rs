//! Result File Reader
//!
//! Reads one scenario result file into a `ResultTriple`:
//! - `year` and `regions` axes
//! - `<column>` as `[time, region]`, or `<column>_bcde` as
//!   `[variant, time, region]` for delta-method files
//!
//! Delta-method VCVs are checked against the caller's `BatchContext`.
//! Costs files store placeholder regions; their labels come from the
//! companion file without the `-costs` suffix.

pub mod batch;
pub mod dataset;
#[cfg(feature = "netcdf")]
pub mod netcdf_backend;

pub use batch::BatchContext;
pub use dataset::{Dataset, DatasetOpener, MemoryDataset, MemoryStore, RegionAxis};
#[cfg(feature = "netcdf")]
pub use netcdf_backend::NetcdfOpener;

use crate::config::{DeltaMethodMode, ExtractConfig};
use crate::error::ExtractError;
use anyhow::Result;
use ndarray::{Array2, Array3, ArrayViewD, Axis};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};

/// Column read when none is named
pub const DEFAULT_COLUMN: &str = "rebased";

/// Covariance variable of delta-method files
pub const VCV_VARIABLE: &str = "vcv";

const COSTS_SUFFIX: &str = "-costs.nc4";

/// Data array of one result file
#[derive(Debug, Clone, PartialEq)]
pub enum ResultData {
    /// `[time, region]`
    Point(Array2<f64>),
    /// `[variant, time, region]`
    Delta(Array3<f64>),
}

impl ResultData {
    pub fn is_delta(&self) -> bool {
        matches!(self, ResultData::Delta(_))
    }

    pub fn time_axis(&self) -> Axis {
        match self {
            ResultData::Point(_) => Axis(0),
            ResultData::Delta(_) => Axis(1),
        }
    }

    pub fn region_axis(&self) -> Axis {
        match self {
            ResultData::Point(_) => Axis(1),
            ResultData::Delta(_) => Axis(2),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            ResultData::Point(data) => data.shape(),
            ResultData::Delta(data) => data.shape(),
        }
    }

    pub fn view(&self) -> ArrayViewD<'_, f64> {
        match self {
            ResultData::Point(data) => data.view().into_dyn(),
            ResultData::Delta(data) => data.view().into_dyn(),
        }
    }

    /// Values of a single region (region axis removed)
    pub fn region(&self, index: usize) -> ArrayViewD<'_, f64> {
        self.view().index_axis_move(self.region_axis(), index)
    }

    /// Keep only the given region indices, in the given order
    pub fn select_regions(&self, indices: &[usize]) -> ResultData {
        match self {
            ResultData::Point(data) => ResultData::Point(data.select(Axis(1), indices)),
            ResultData::Delta(data) => ResultData::Delta(data.select(Axis(2), indices)),
        }
    }

    pub fn scaled(self, factor: f64) -> ResultData {
        match self {
            ResultData::Point(data) => ResultData::Point(data * factor),
            ResultData::Delta(data) => ResultData::Delta(data * factor),
        }
    }
}

/// Axes and data of one result file
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTriple {
    pub years: Vec<i32>,
    pub regions: Vec<String>,
    pub data: ResultData,
}

impl ResultTriple {
    /// Build a triple, checking axis lengths against the data shape
    pub fn new(years: Vec<i32>, regions: Vec<String>, data: ResultData) -> Result<Self> {
        let time_len = data.shape()[data.time_axis().index()];
        let region_len = data.shape()[data.region_axis().index()];

        if years.len() != time_len || regions.len() != region_len {
            return Err(ExtractError::ShapeMismatch(format!(
                "{} years and {} regions for data of shape {:?}",
                years.len(),
                regions.len(),
                data.shape()
            ))
            .into());
        }

        Ok(ResultTriple { years, regions, data })
    }

    pub fn select_regions(self, indices: &[usize]) -> ResultTriple {
        ResultTriple {
            years: self.years,
            regions: indices.iter().map(|&ii| self.regions[ii].clone()).collect(),
            data: self.data.select_regions(indices),
        }
    }
}

/// Read one result file
///
/// Open failures are fatal (`ExtractError::Open`). The file is closed before
/// returning; a costs companion file is opened only for its region labels.
pub fn read(
    opener: &dyn DatasetOpener,
    batch: &mut BatchContext,
    path: &Path,
    column: &str,
    mode: DeltaMethodMode,
) -> Result<ResultTriple> {
    tracing::debug!("Reading {} from {}", column, path.display());

    let dataset = open(opener, path)?;
    let years = dataset.years()?;
    let mut regions = dataset.regions()?;

    let deltamethod = match mode {
        DeltaMethodMode::Auto => dataset.has_variable(VCV_VARIABLE),
        DeltaMethodMode::On => true,
        DeltaMethodMode::Off => false,
    };

    let data = if deltamethod {
        let data = dataset.read_tensor(&format!("{}_bcde", column))?;
        batch.observe(dataset.read_matrix(VCV_VARIABLE)?, path)?;
        ResultData::Delta(data)
    } else {
        ResultData::Point(dataset.read_matrix(column)?)
    };
    drop(dataset);

    if let Some(companion) = costs_companion(path) {
        if regions.needs_patch() {
            tracing::debug!("Taking region labels for {} from {}", path.display(), companion.display());
            regions = open(opener, &companion)?.regions()?;
        }
    }

    ResultTriple::new(years, regions.into_labels(), data)
}

/// `read`, restricted to the configured regions
///
/// The region mask keeps the file's axis order.
pub fn read_region(
    config: &ExtractConfig,
    opener: &dyn DatasetOpener,
    batch: &mut BatchContext,
    path: &Path,
    column: &str,
    mode: DeltaMethodMode,
) -> Result<ResultTriple> {
    let triple = read(opener, batch, path, column, mode)?;
    if config.is_allregions() {
        return Ok(triple);
    }

    let wanted: FxHashSet<String> = config.resolve_regions(&triple.regions).into_iter().collect();
    let keep: Vec<usize> = triple
        .regions
        .iter()
        .enumerate()
        .filter(|(_, region)| wanted.contains(*region))
        .map(|(ii, _)| ii)
        .collect();

    Ok(triple.select_regions(&keep))
}

fn open(opener: &dyn DatasetOpener, path: &Path) -> Result<Box<dyn Dataset>> {
    opener.open(path).map_err(|source| {
        tracing::error!("Cannot read {}: {:#}", path.display(), source);
        ExtractError::Open { path: path.to_path_buf(), source: source.into() }.into()
    })
}

/// Sibling of a `-costs.nc4` file that carries the region labels
fn costs_companion(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(COSTS_SUFFIX)?;
    Some(path.with_file_name(format!("{}.nc4", stem)))
}
