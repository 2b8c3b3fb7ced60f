//! Gridded dataset access
//!
//! The reader only needs a handful of operations from a result file, so the
//! file format sits behind two small traits. `MemoryStore` keeps datasets in
//! memory; the NetCDF backend lives in `netcdf_backend` (feature `netcdf`).

use crate::error::ExtractError;
use anyhow::Result;
use ndarray::{Array2, Array3};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// Region axis as stored in a file
#[derive(Debug, Clone, PartialEq)]
pub enum RegionAxis {
    Labels(Vec<String>),
    /// Numeric placeholders (costs files store NaN here)
    Unresolved(Vec<f64>),
}

impl RegionAxis {
    pub fn len(&self) -> usize {
        match self {
            RegionAxis::Labels(labels) => labels.len(),
            RegionAxis::Unresolved(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when labels must come from a companion file
    pub fn needs_patch(&self) -> bool {
        matches!(self, RegionAxis::Unresolved(values) if values.first().is_some_and(|v| v.is_nan()))
    }

    /// Labels, with any numeric placeholders rendered as text
    pub fn into_labels(self) -> Vec<String> {
        match self {
            RegionAxis::Labels(labels) => labels,
            RegionAxis::Unresolved(values) => values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// An open result file
pub trait Dataset {
    fn path(&self) -> &Path;

    fn has_variable(&self, name: &str) -> bool;

    /// The `year` axis
    fn years(&self) -> Result<Vec<i32>>;

    /// The `regions` axis
    fn regions(&self) -> Result<RegionAxis>;

    fn read_matrix(&self, name: &str) -> Result<Array2<f64>>;

    fn read_tensor(&self, name: &str) -> Result<Array3<f64>>;
}

/// Opens result files by path
pub trait DatasetOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn Dataset>>;
}

/// In-memory result file
#[derive(Debug, Clone)]
pub struct MemoryDataset {
    path: PathBuf,
    years: Vec<i32>,
    regions: RegionAxis,
    matrices: FxHashMap<String, Array2<f64>>,
    tensors: FxHashMap<String, Array3<f64>>,
}

impl MemoryDataset {
    pub fn new(years: Vec<i32>, regions: RegionAxis) -> Self {
        MemoryDataset {
            path: PathBuf::new(),
            years,
            regions,
            matrices: FxHashMap::default(),
            tensors: FxHashMap::default(),
        }
    }

    /// Dataset with string region labels
    pub fn with_labels(years: Vec<i32>, regions: &[&str]) -> Self {
        Self::new(years, RegionAxis::Labels(regions.iter().map(|r| r.to_string()).collect()))
    }

    pub fn matrix(mut self, name: &str, values: Array2<f64>) -> Self {
        self.matrices.insert(name.to_string(), values);
        self
    }

    pub fn tensor(mut self, name: &str, values: Array3<f64>) -> Self {
        self.tensors.insert(name.to_string(), values);
        self
    }

    fn missing(&self, name: &str) -> anyhow::Error {
        ExtractError::MissingVariable { path: self.path.clone(), name: name.to_string() }.into()
    }
}

impl Dataset for MemoryDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_variable(&self, name: &str) -> bool {
        matches!(name, "year" | "regions") || self.matrices.contains_key(name) || self.tensors.contains_key(name)
    }

    fn years(&self) -> Result<Vec<i32>> {
        Ok(self.years.clone())
    }

    fn regions(&self) -> Result<RegionAxis> {
        Ok(self.regions.clone())
    }

    fn read_matrix(&self, name: &str) -> Result<Array2<f64>> {
        self.matrices.get(name).cloned().ok_or_else(|| self.missing(name))
    }

    fn read_tensor(&self, name: &str) -> Result<Array3<f64>> {
        self.tensors.get(name).cloned().ok_or_else(|| self.missing(name))
    }
}

/// Path-keyed collection of in-memory datasets
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    datasets: FxHashMap<PathBuf, MemoryDataset>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, dataset: MemoryDataset) {
        self.datasets.insert(path.into(), dataset);
    }
}

impl DatasetOpener for MemoryStore {
    fn open(&self, path: &Path) -> Result<Box<dyn Dataset>> {
        let mut dataset = self
            .datasets
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No such dataset: {}", path.display()))?;
        dataset.path = path.to_path_buf();
        Ok(Box::new(dataset))
    }
}
