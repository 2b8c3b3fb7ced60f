//! NetCDF result files (feature `netcdf`)

use super::dataset::{Dataset, DatasetOpener, RegionAxis};
use crate::error::ExtractError;
use anyhow::{Context, Result};
use ndarray::{Array2, Array3};
use std::path::{Path, PathBuf};

/// Opens `.nc4` files with the system netCDF library
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfOpener;

impl DatasetOpener for NetcdfOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn Dataset>> {
        let file = netcdf::open(path).with_context(|| format!("Failed to open netCDF file: {:?}", path))?;
        Ok(Box::new(NetcdfDataset { path: path.to_path_buf(), file }))
    }
}

/// Handle to an open netCDF file; closed on drop
pub struct NetcdfDataset {
    path: PathBuf,
    file: netcdf::File,
}

impl NetcdfDataset {
    fn variable(&self, name: &str) -> Result<netcdf::Variable<'_>> {
        self.file.variable(name).ok_or_else(|| {
            ExtractError::MissingVariable { path: self.path.clone(), name: name.to_string() }.into()
        })
    }

    fn read_values(&self, name: &str, rank: usize) -> Result<(Vec<usize>, Vec<f64>)> {
        let var = self.variable(name)?;
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        if shape.len() != rank {
            return Err(ExtractError::ShapeMismatch(format!(
                "{} in {:?} has {} dimensions, expected {}",
                name,
                self.path,
                shape.len(),
                rank
            ))
            .into());
        }

        let values = var
            .get_values::<f64, _>(..)
            .with_context(|| format!("Failed to read {} from {:?}", name, self.path))?;
        Ok((shape, values))
    }
}

impl Dataset for NetcdfDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_variable(&self, name: &str) -> bool {
        self.file.variable(name).is_some()
    }

    fn years(&self) -> Result<Vec<i32>> {
        let (_, values) = self.read_values("year", 1)?;
        Ok(values.into_iter().map(|year| year.round() as i32).collect())
    }

    fn regions(&self) -> Result<RegionAxis> {
        let var = self.variable("regions")?;

        // Numeric placeholders (costs files) read as floats; labels are strings
        if let Ok(values) = var.get_values::<f64, _>(..) {
            return Ok(RegionAxis::Unresolved(values));
        }

        let len = var.dimensions().first().map(|d| d.len()).unwrap_or(0);
        let labels = (0..len)
            .map(|ii| {
                var.get_string([ii])
                    .with_context(|| format!("Failed to read region {} from {:?}", ii, self.path))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RegionAxis::Labels(labels))
    }

    fn read_matrix(&self, name: &str) -> Result<Array2<f64>> {
        let (shape, values) = self.read_values(name, 2)?;
        Ok(Array2::from_shape_vec((shape[0], shape[1]), values)?)
    }

    fn read_tensor(&self, name: &str) -> Result<Array3<f64>> {
        let (shape, values) = self.read_values(name, 3)?;
        Ok(Array3::from_shape_vec((shape[0], shape[1], shape[2]), values)?)
    }
}
