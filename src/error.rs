//! Fatal extraction errors
//!
//! Every variant aborts the run. Filter rejections in the walker are not
//! errors; they are logged and skipped.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Cannot read {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Variable '{}' not found in {}", .name, .path.display())]
    MissingVariable { path: PathBuf, name: String },

    /// VCV of this file differs from one read earlier in the same batch
    #[error(
        "Covariance in {} differs from a previously loaded file: inputs are not from the same statistical batch",
        .path.display()
    )]
    CovarianceMismatch { path: PathBuf },

    #[error("Cannot find the VCV for {} within the master VCV", .path.display())]
    VcvNotFound { path: PathBuf },

    #[error("Path pattern lookup for '{basename}' matched {matches} branches (expected exactly 1)")]
    AmbiguousPathPattern { basename: String, matches: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Year {0} not found on the time axis")]
    YearNotFound(i32),

    #[error("Region '{0}' not found on the region axis")]
    RegionNotFound(String),

    #[error("Year range {start}-{end} matches no years")]
    EmptyYearset { start: i32, end: i32 },

    /// Two scenarios map onto the same output row (e.g. with `ignore-ssp`)
    #[error("{impact} for {scenario}, region '{region}', year {year} overwrites a value from another scenario")]
    DuplicateRow { impact: String, scenario: String, region: String, year: String },

    #[error("Invalid master VCV: {0}")]
    InvalidVcv(String),
}
