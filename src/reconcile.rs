//! Covariance Reconciliation
//!
//! When scenarios are combined under one master VCV, each scenario's VCV is
//! a diagonal block of the master at an unknown offset. Blocks are matched
//! by value (the per-scenario matrices carry no labels), then the scenario
//! data is re-embedded at that offset along its leading axis.
//!
//! Tolerance follows numpy `allclose`: `|a - b| <= ATOL + RTOL * |b|`.

use crate::error::ExtractError;
use crate::reader::{BatchContext, ResultData};
use anyhow::Result;
use ndarray::{s, Array2, ArrayView2, Axis, Slice};
use std::path::Path;

pub const RTOL: f64 = 1e-5;
pub const ATOL: f64 = 1e-8;

/// Element-wise approximate equality of two equally shaped matrices
pub fn allclose(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> bool {
    a.shape() == b.shape()
        && a
            .iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() <= ATOL + RTOL * y.abs())
}

/// First offset `k` with `master[k..k+n, k..k+n] ≈ vcv`
pub fn find_offset(master: &Array2<f64>, vcv: &Array2<f64>) -> Option<usize> {
    let n = vcv.nrows();
    if n == 0 || n > master.nrows() || vcv.ncols() != n {
        return None;
    }

    (0..=master.nrows() - n).find(|&k| allclose(vcv.view(), master.slice(s![k..k + n, k..k + n])))
}

/// Zero-padded copy of `data` whose leading axis has length `size`,
/// holding the original rows at `offset..offset + rows`
pub fn embed(data: ResultData, offset: usize, size: usize) -> Result<ResultData> {
    let rows = data.shape()[0];
    if offset + rows > size {
        return Err(ExtractError::ShapeMismatch(format!(
            "{} rows at offset {} do not fit a leading axis of {}",
            rows, offset, size
        ))
        .into());
    }

    let rows_slice = Slice::from(offset..offset + rows);
    Ok(match data {
        ResultData::Point(data) => {
            let mut padded = Array2::zeros((size, data.ncols()));
            padded.slice_axis_mut(Axis(0), rows_slice).assign(&data);
            ResultData::Point(padded)
        }
        ResultData::Delta(data) => {
            let (_, time, regions) = data.dim();
            let mut padded = ndarray::Array3::zeros((size, time, regions));
            padded.slice_axis_mut(Axis(0), rows_slice).assign(&data);
            ResultData::Delta(padded)
        }
    })
}

/// Place `data` within the master VCV and clear the batch context
///
/// Callers only invoke this when the batch context holds a VCV.
pub fn reconcile(batch: &mut BatchContext, master: &Array2<f64>, data: ResultData, path: &Path) -> Result<ResultData> {
    let Some(vcv) = batch.vcv() else {
        return Ok(data);
    };

    let Some(offset) = find_offset(master, vcv) else {
        log_mismatch(master, vcv);
        return Err(ExtractError::VcvNotFound { path: path.to_path_buf() }.into());
    };

    let n = vcv.nrows();
    if data.shape()[0] != n {
        return Err(ExtractError::ShapeMismatch(format!(
            "{}: leading axis {} does not match VCV size {}",
            path.display(),
            data.shape()[0],
            n
        ))
        .into());
    }

    tracing::debug!("{}: VCV found at offset {} of {}", path.display(), offset, master.nrows());
    let embedded = embed(data, offset, master.nrows())?;
    batch.reset();
    Ok(embedded)
}

/// Absolute differences against the leading and trailing master blocks
fn log_mismatch(master: &Array2<f64>, vcv: &Array2<f64>) {
    let n = vcv.nrows().min(master.nrows());
    let m = vcv.ncols().min(master.ncols());

    let head: f64 = (&master.slice(s![..n, ..m]) - &vcv.slice(s![..n, ..m])).mapv(f64::abs).sum();
    tracing::error!("Sum |vcv - master[head]|: {}", head);

    if vcv.nrows() <= master.nrows() && vcv.ncols() <= master.ncols() {
        let tail_rows = master.nrows() - vcv.nrows();
        let tail_cols = master.ncols() - vcv.ncols();
        let tail = master.slice(s![tail_rows.., tail_cols..]);
        let diff: f64 = (&tail - vcv).mapv(f64::abs).sum();
        tracing::error!("Sum |vcv - master[tail]|: {}", diff);
    }
}
