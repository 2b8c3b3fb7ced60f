//! Batch covariance state
//!
//! Every delta-method file of one batch must carry the same VCV. The context
//! is owned by the caller and threaded through the reader, so independent
//! batches use independent contexts.

use crate::error::ExtractError;
use anyhow::Result;
use ndarray::Array2;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct BatchContext {
    vcv: Option<Array2<f64>>,
}

impl BatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the VCV read from `path`
    ///
    /// The first VCV seeds the context; every later one must match it bit for bit.
    pub fn observe(&mut self, vcv: Array2<f64>, path: &Path) -> Result<()> {
        match &self.vcv {
            None => {
                self.vcv = Some(vcv);
                Ok(())
            }
            Some(seen) if bit_identical(seen, &vcv) => Ok(()),
            Some(_) => Err(ExtractError::CovarianceMismatch { path: path.to_path_buf() }.into()),
        }
    }

    pub fn vcv(&self) -> Option<&Array2<f64>> {
        self.vcv.as_ref()
    }

    pub fn is_seeded(&self) -> bool {
        self.vcv.is_some()
    }

    /// Clear the context so the next batch starts fresh
    pub fn reset(&mut self) -> Option<Array2<f64>> {
        self.vcv.take()
    }
}

fn bit_identical(a: &Array2<f64>, b: &Array2<f64>) -> bool {
    a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_first_observation_seeds() {
        let mut batch = BatchContext::new();
        assert!(!batch.is_seeded());

        batch.observe(arr2(&[[1.0, 0.1], [0.1, 2.0]]), Path::new("a.nc4")).unwrap();
        assert_eq!(batch.vcv(), Some(&arr2(&[[1.0, 0.1], [0.1, 2.0]])));
    }

    #[test]
    fn test_identical_observation_passes() {
        let mut batch = BatchContext::new();
        batch.observe(arr2(&[[1.0]]), Path::new("a.nc4")).unwrap();
        batch.observe(arr2(&[[1.0]]), Path::new("b.nc4")).unwrap();
        assert!(batch.is_seeded());
    }

    #[test]
    fn test_mismatch_fails() {
        let mut batch = BatchContext::new();
        batch.observe(arr2(&[[1.0]]), Path::new("a.nc4")).unwrap();

        let err = batch.observe(arr2(&[[1.0 + 1e-12]]), Path::new("b.nc4")).unwrap_err();
        match err.downcast_ref::<ExtractError>() {
            Some(ExtractError::CovarianceMismatch { path }) => assert_eq!(path, Path::new("b.nc4")),
            other => panic!("unexpected error: {:?}", other),
        }

        let err = batch.observe(arr2(&[[1.0, 0.0], [0.0, 1.0]]), Path::new("c.nc4")).unwrap_err();
        assert!(err.downcast_ref::<ExtractError>().is_some());
    }

    #[test]
    fn test_reset() {
        let mut batch = BatchContext::new();
        batch.observe(arr2(&[[1.0]]), Path::new("a.nc4")).unwrap();
        assert!(batch.reset().is_some());
        assert!(!batch.is_seeded());

        batch.observe(arr2(&[[5.0]]), Path::new("b.nc4")).unwrap();
        assert_eq!(batch.vcv(), Some(&arr2(&[[5.0]])));
    }
}
