//! Glean: extraction of impact-projection results
//!
//! Walks a results tree keyed by scenario (batch, rcp, model, iam, ssp),
//! reads gridded result files, reconciles delta-method covariances against a
//! master VCV, slices by region and year, and writes the selection as CSV.
//!
//! - `config`: typed run configuration
//! - `walker`: directory layouts and scenario filters
//! - `reader`: result file access and batch covariance checks
//! - `reconcile`: placement within a master VCV
//! - `slices`: region and year iterators
//! - `output`: CSV grouping, ordering and writing
//! - `extract`: the end-to-end driver

pub mod config;
pub mod error;
pub mod extract;
pub mod filenames;
pub mod output;
pub mod reader;
pub mod reconcile;
pub mod slices;
pub mod target;
pub mod walker;

pub use config::ExtractConfig;
pub use error::ExtractError;
pub use extract::{ExtractSummary, Extractor};
pub use filenames::{interpret_filenames, ImpactSpec};
pub use reader::{BatchContext, Dataset, DatasetOpener, MemoryDataset, MemoryStore, ResultData, ResultTriple};
pub use slices::{iterate_regions, iterate_values, RegionSelection, RegionSlice, YearLabel};
pub use target::TargetPath;
pub use walker::{iterate_valid_targets, ScenarioDescriptor, ScenarioWalker, WalkOutcome};
