//! Extraction driver
//!
//! Ties the pieces together for one run:
//! 1. walk the results tree and keep the valid targets
//! 2. per target and impact: read, reconcile, slice by region and year
//! 3. group rows by output file, sort them, write one CSV per file
//!
//! Output columns: `batch, model, iam`, the row-key columns (`csv_rownames`),
//! then one column per impact (`<impact>_<k>` when values are vectors).

use crate::config::{ExtractConfig, PathSetting};
use crate::error::ExtractError;
use crate::filenames::ImpactSpec;
use crate::output::{csv_makepath, csv_organize, csv_rownames, csv_sorted, CsvSink, FileKey, RowKey};
use crate::reader::{BatchContext, DatasetOpener};
use crate::slices::iterate_regions;
use crate::walker::{iterate_valid_targets, ScenarioWalker, WalkOutcome};
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What one run produced
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractSummary {
    pub outcome: WalkOutcome,
    pub files: Vec<PathBuf>,
    pub rows: usize,
}

struct Row {
    batch: String,
    model: String,
    iam: String,
    /// One entry per impact; `None` where the impact was not found
    values: Vec<Option<Vec<f64>>>,
}

/// Rows destined for one output file
#[derive(Default)]
struct Table {
    rows: Vec<(RowKey, Row)>,
    index: FxHashMap<(String, String, String, RowKey), usize>,
}

impl Table {
    fn row_mut(&mut self, batch: &str, model: &str, iam: &str, key: RowKey, impacts: usize) -> &mut Row {
        let lookup = (batch.to_string(), model.to_string(), iam.to_string(), key);
        let ii = match self.index.get(&lookup) {
            Some(&ii) => ii,
            None => {
                let ii = self.rows.len();
                let row = Row {
                    batch: lookup.0.clone(),
                    model: lookup.1.clone(),
                    iam: lookup.2.clone(),
                    values: vec![None; impacts],
                };
                self.rows.push((lookup.3.clone(), row));
                self.index.insert(lookup, ii);
                ii
            }
        };
        &mut self.rows[ii].1
    }
}

pub struct Extractor<'a> {
    config: ExtractConfig,
    opener: &'a dyn DatasetOpener,
}

impl<'a> Extractor<'a> {
    pub fn new(config: ExtractConfig, opener: &'a dyn DatasetOpener) -> Self {
        Extractor { config, opener }
    }

    /// Root the walk starts from; for branched roots, the first branch
    fn walk_root(&self) -> Result<&Path> {
        match &self.config.results_root {
            Some(PathSetting::Single(root)) => Ok(root.as_path()),
            Some(PathSetting::Branches(branches)) => branches
                .values()
                .next()
                .map(PathBuf::as_path)
                .context("results-root has no branches"),
            None => anyhow::bail!("results-root is not configured"),
        }
    }

    /// Extract `impacts` from every valid target and write the CSV files
    pub fn run(&self, impacts: &[ImpactSpec]) -> Result<ExtractSummary> {
        let walker = ScenarioWalker::from_config(self.walk_root()?, &self.config);
        let master = self.config.load_multiimpact_vcv()?;

        let mut basenames: Vec<String> = Vec::new();
        for impact in impacts {
            if !basenames.contains(&impact.basename) {
                basenames.push(impact.basename.clone());
            }
        }

        // Slicing records what it discovers (region order, inferred delta method)
        let mut state = self.config.clone();
        let mut batch = BatchContext::new();
        let mut tables: BTreeMap<FileKey, Table> = BTreeMap::new();

        let mut targets = iterate_valid_targets(&walker, &self.config, Some(basenames.as_slice()));
        for scenario in targets.by_ref() {
            let scenario = scenario?;
            tracing::info!(
                "{} {} {} {} {}",
                scenario.batch,
                scenario.rcp,
                scenario.model,
                scenario.iam,
                scenario.ssp
            );

            for (kk, impact) in impacts.iter().enumerate() {
                let path = scenario.target.result_file(&impact.basename)?;
                if !path.is_file() {
                    tracing::debug!("{} missing", path.display());
                    continue;
                }

                let selection = iterate_regions(
                    self.opener,
                    &mut batch,
                    master.as_ref(),
                    &path,
                    impact.column.as_deref(),
                    &mut state,
                )
                .with_context(|| format!("Failed to extract {} from {}", impact, path.display()))?;

                for slice in selection.iter() {
                    for pair in slice.iterate_values(&state) {
                        let (year, value) = pair.with_context(|| format!("{} in {}", slice.region, path.display()))?;
                        let (file_key, row_key) = csv_organize(&scenario.rcp, &scenario.ssp, slice.region, year, &state);

                        let row = tables.entry(file_key).or_default().row_mut(
                            &scenario.batch,
                            &scenario.model,
                            &scenario.iam,
                            row_key,
                            impacts.len(),
                        );
                        if row.values[kk].is_some() {
                            return Err(ExtractError::DuplicateRow {
                                impact: impact.to_string(),
                                scenario: format!(
                                    "{}/{}/{}/{}/{}",
                                    scenario.batch, scenario.rcp, scenario.model, scenario.iam, scenario.ssp
                                ),
                                region: slice.region.to_string(),
                                year: year.to_string(),
                            }
                            .into());
                        }
                        row.values[kk] = Some(value.iter().map(|v| v * impact.sign()).collect());
                    }
                }
            }
        }
        let outcome = targets.outcome();

        let mut files = Vec::with_capacity(tables.len());
        let mut rows = 0;
        for (file_key, table) in tables {
            let path = csv_makepath(&file_key, &state)?;
            let sorted = csv_sorted(table.rows, &state);
            rows += sorted.len();
            write_table(&path, sorted, impacts, &state)?;
            files.push(path);
        }

        Ok(ExtractSummary { outcome, files, rows })
    }
}

fn write_table(path: &Path, rows: Vec<(RowKey, Row)>, impacts: &[ImpactSpec], config: &ExtractConfig) -> Result<()> {
    let mut sink = CsvSink::new();

    sink.text_column("batch", rows.iter().map(|(_, row)| row.batch.clone()).collect())?;
    sink.text_column("model", rows.iter().map(|(_, row)| row.model.clone()).collect())?;
    sink.text_column("iam", rows.iter().map(|(_, row)| row.iam.clone()).collect())?;

    for (col, name) in csv_rownames(config).into_iter().enumerate() {
        sink.text_column(name.name(), rows.iter().map(|(key, _)| key[col].to_string()).collect())?;
    }

    for (kk, impact) in impacts.iter().enumerate() {
        let width = rows
            .iter()
            .filter_map(|(_, row)| row.values[kk].as_ref().map(Vec::len))
            .max()
            .unwrap_or(1);
        let label = impact.label();

        for jj in 0..width {
            let name = if width == 1 { label.clone() } else { format!("{}_{}", label, jj + 1) };
            let values = rows
                .iter()
                .map(|(_, row)| row.values[kk].as_ref().and_then(|values| values.get(jj).copied()))
                .collect();
            sink.number_column(&name, values)?;
        }
    }

    sink.write(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{MemoryDataset, MemoryStore};
    use ndarray::arr2;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_run_requires_results_root() {
        let store = MemoryStore::new();
        let extractor = Extractor::new(ExtractConfig::default(), &store);
        assert!(extractor.run(&[]).is_err());
    }

    #[test]
    fn test_run_groups_by_rcp_and_ssp() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let out = dir.path().join("out");

        let mut store = MemoryStore::new();
        for (rcp, scale) in [("rcp45", 1.0), ("rcp85", 10.0)] {
            let path = results.join(format!("median/{}/ccsm4/high/SSP3/health.nc4", rcp));
            touch(&path);
            store.insert(
                path,
                MemoryDataset::with_labels(vec![2000, 2001], &["USA", "CAN"])
                    .matrix("rebased", arr2(&[[1.0, 2.0], [3.0, 4.0]]) * scale),
            );
        }

        let mut config = ExtractConfig::default();
        config.results_root = Some(PathSetting::Single(results));
        config.output_dir = Some(out.clone());
        config.regions = Some(vec!["CAN".into(), "USA".into()]);

        let impacts = vec![ImpactSpec { basename: "health".into(), column: None, negate: true }];
        let summary = Extractor::new(config, &store).run(&impacts).unwrap();

        assert_eq!(summary.outcome, WalkOutcome::Found(2));
        assert_eq!(summary.files, vec![out.join("rcp45-SSP3.csv"), out.join("rcp85-SSP3.csv")]);
        assert_eq!(summary.rows, 8);

        let written = fs::read_to_string(out.join("rcp85-SSP3.csv")).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "batch,model,iam,region,year,-health");
        // By year, regions in filter order within a year
        assert_eq!(lines[1], "median,ccsm4,high,CAN,2000,-20.0");
        assert_eq!(lines[2], "median,ccsm4,high,USA,2000,-10.0");
        assert_eq!(lines[3], "median,ccsm4,high,CAN,2001,-40.0");
        assert_eq!(lines[4], "median,ccsm4,high,USA,2001,-30.0");
    }

    #[test]
    fn test_run_rejects_rows_merged_by_ignore_ssp() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");

        let mut store = MemoryStore::new();
        for (ssp, value) in [("SSP2", 1.0), ("SSP3", 100.0)] {
            let path = results.join(format!("median/rcp85/ccsm4/high/{}/health.nc4", ssp));
            touch(&path);
            store.insert(path, MemoryDataset::with_labels(vec![2000], &["USA"]).matrix("rebased", arr2(&[[value]])));
        }

        let mut config = ExtractConfig::default();
        config.results_root = Some(PathSetting::Single(results));
        config.output_dir = Some(dir.path().join("out"));
        config.regions = Some(vec!["USA".into()]);

        let impacts = vec![ImpactSpec { basename: "health".into(), column: None, negate: false }];

        // Distinct ssps land in distinct files
        let summary = Extractor::new(config.clone(), &store).run(&impacts).unwrap();
        assert_eq!(summary.rows, 2);

        config.ignore_ssp = true;
        let err = Extractor::new(config, &store).run(&impacts).unwrap_err();
        match err.downcast_ref::<ExtractError>() {
            Some(ExtractError::DuplicateRow { scenario, region, year, .. }) => {
                assert_eq!(scenario, "median/rcp85/ccsm4/high/SSP3");
                assert_eq!(region, "USA");
                assert_eq!(year, "2000");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_run_reports_no_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let mut config = ExtractConfig::default();
        config.results_root = Some(PathSetting::Single(dir.path().to_path_buf()));

        let impacts = vec![ImpactSpec { basename: "health".into(), column: None, negate: false }];
        let summary = Extractor::new(config, &store).run(&impacts).unwrap();
        assert_eq!(summary.outcome, WalkOutcome::NoCandidates);
        assert!(summary.files.is_empty());
    }
}
