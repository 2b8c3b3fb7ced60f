//! Scenario discovery
//!
//! Walks a results tree (see `layouts`) and applies the scenario filters:
//! - `checks`: relative paths that must exist in the target
//! - `only-rcp`, `only-iam`, `only-ssp`: exact matches
//! - `only-models`: allow-list
//! - requested impacts: at least one result file present, also in the
//!   delta-method tree when delta-method results live in parallel
//!
//! Rejected targets are logged and skipped; they never abort the walk.

pub mod layouts;

pub use layouts::{Layout, LevelWalk, ScenarioWalker};

use crate::config::{DeltaMethodSetting, ExtractConfig};
use crate::target::TargetPath;
use anyhow::Result;
use std::fmt;
use std::path::Path;

/// One scenario result set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioDescriptor {
    pub batch: String,
    pub rcp: String,
    pub model: String,
    pub iam: String,
    pub ssp: String,
    pub target: TargetPath,
}

/// What a finished walk found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// The layout produced no directories at all
    NoCandidates,
    /// Directories were found but every one was filtered out
    NoValidCandidates,
    Found(usize),
}

impl fmt::Display for WalkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkOutcome::NoCandidates => write!(f, "No target directories."),
            WalkOutcome::NoValidCandidates => write!(f, "No valid target directories."),
            WalkOutcome::Found(n) => write!(f, "{} target directories.", n),
        }
    }
}

/// Filtered scenario iterator
pub struct ValidTargets<'a> {
    inner: layouts::DescriptorIter<'a>,
    config: &'a ExtractConfig,
    impacts: Option<&'a [String]>,
    candidates: usize,
    accepted: usize,
    finished: bool,
}

/// Iterate over the scenarios under `walker` that pass every configured filter
///
/// `impacts` lists result basenames (without `.nc4`); when given, a target is
/// kept only if at least one of them is present.
pub fn iterate_valid_targets<'a>(
    walker: &'a ScenarioWalker,
    config: &'a ExtractConfig,
    impacts: Option<&'a [String]>,
) -> ValidTargets<'a> {
    ValidTargets {
        inner: walker.iter(),
        config,
        impacts,
        candidates: 0,
        accepted: 0,
        finished: false,
    }
}

impl<'a> ValidTargets<'a> {
    /// Counts so far; final once the iterator is exhausted
    pub fn outcome(&self) -> WalkOutcome {
        match (self.candidates, self.accepted) {
            (0, _) => WalkOutcome::NoCandidates,
            (_, 0) => WalkOutcome::NoValidCandidates,
            (_, n) => WalkOutcome::Found(n),
        }
    }

    fn accept(&self, scenario: &ScenarioDescriptor) -> Result<bool> {
        let config = self.config;
        let target = &scenario.target;

        if let Some(checks) = &config.checks {
            if !directory_contains(target, checks) {
                if config.verbose {
                    tracing::info!("{} missing {:?}", target, checks);
                } else {
                    tracing::debug!("{} missing {:?}", target, checks);
                }
                return Ok(false);
            }
        }

        for (wanted, actual) in [
            (&config.only_rcp, &scenario.rcp),
            (&config.only_iam, &scenario.iam),
            (&config.only_ssp, &scenario.ssp),
        ] {
            if let Some(wanted) = wanted {
                if actual != wanted {
                    tracing::info!("{} not {}", target, wanted);
                    return Ok(false);
                }
            }
        }

        if let Some(models) = config.allowed_models() {
            if !models.contains(&scenario.model.as_str()) {
                tracing::info!("{} not in {:?}", target, models);
                return Ok(false);
            }
        }

        let Some(impacts) = self.impacts else {
            if !config.is_parallel_deltamethod() {
                return Ok(true);
            }
            return Ok(match self.deltamethod_target(target) {
                Some(dm) => match dm.dirs().into_iter().find(|dir| !dir.is_dir()) {
                    Some(missing) => {
                        tracing::info!("deltamethod {} missing", missing.display());
                        false
                    }
                    None => true,
                },
                None => {
                    tracing::info!("deltamethod path for {} cannot be resolved", target);
                    false
                }
            });
        };

        for impact in impacts {
            if !target.result_file(impact)?.is_file() {
                continue;
            }

            if config.is_parallel_deltamethod() {
                let Some(dm) = self.deltamethod_target(target) else {
                    tracing::info!("deltamethod path for {} cannot be resolved", target);
                    continue;
                };
                let dm_file = dm.result_file(impact)?;
                if !dm_file.is_file() {
                    tracing::info!("deltamethod {} missing", dm_file.display());
                    continue;
                }
            }

            return Ok(true);
        }

        tracing::debug!("{} has none of {:?}", target, impacts);
        Ok(false)
    }

    fn deltamethod_target(&self, target: &TargetPath) -> Option<TargetPath> {
        let Some(DeltaMethodSetting::Parallel(deltamethod)) = &self.config.deltamethod else {
            return None;
        };
        target.deltamethod_path(self.config.results_root.as_ref()?, deltamethod)
    }
}

impl<'a> Iterator for ValidTargets<'a> {
    type Item = Result<ScenarioDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let scenario = match self.inner.next() {
                Some(Ok(scenario)) => scenario,
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    if !self.finished {
                        self.finished = true;
                        if self.accepted == 0 {
                            tracing::warn!("{}", self.outcome());
                        }
                    }
                    return None;
                }
            };

            self.candidates += 1;
            match self.accept(&scenario) {
                Ok(true) => {
                    self.accepted += 1;
                    return Some(Ok(scenario));
                }
                Ok(false) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// True if every relative path in `checks` exists in every target directory
pub fn directory_contains(target: &TargetPath, checks: &[String]) -> bool {
    target
        .dirs()
        .into_iter()
        .all(|dir: &Path| checks.iter().all(|check| dir.join(check).exists()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathSetting;
    use std::fs;
    use std::path::PathBuf;

    fn touch(root: &Path, file: &str) {
        let path = root.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn accepted(walker: &ScenarioWalker, config: &ExtractConfig, impacts: Option<&[String]>) -> (Vec<ScenarioDescriptor>, WalkOutcome) {
        let mut targets = iterate_valid_targets(walker, config, impacts);
        let found = targets.by_ref().map(|t| t.unwrap()).collect();
        (found, targets.outcome())
    }

    #[test]
    fn test_no_candidates_vs_no_valid_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let walker = ScenarioWalker::new(dir.path(), Layout::Batch { batchdir: "median".into() });
        let config = ExtractConfig::default();
        assert_eq!(accepted(&walker, &config, None).1, WalkOutcome::NoCandidates);

        fs::create_dir_all(dir.path().join("rcp85/m/low/SSP3")).unwrap();
        let mut config = ExtractConfig::default();
        config.only_rcp = Some("rcp45".into());
        let (found, outcome) = accepted(&walker, &config, None);
        assert!(found.is_empty());
        assert_eq!(outcome, WalkOutcome::NoValidCandidates);
        assert_eq!(outcome.to_string(), "No valid target directories.");
    }

    #[test]
    fn test_scenario_filters() {
        let dir = tempfile::tempdir().unwrap();
        for d in ["rcp85/ccsm4/low/SSP3", "rcp85/gfdl/low/SSP3", "rcp85/ccsm4/high/SSP2", "rcp45/ccsm4/low/SSP3"] {
            fs::create_dir_all(dir.path().join(d)).unwrap();
        }
        let walker = ScenarioWalker::new(dir.path(), Layout::Batch { batchdir: "median".into() });

        let config: ExtractConfig = serde_yaml::from_str(
            "only-rcp: rcp85\nonly-iam: low\nonly-ssp: SSP3\nonly-models: [ccsm4]",
        )
        .unwrap();
        let (found, outcome) = accepted(&walker, &config, None);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].model, "ccsm4");
        assert_eq!(outcome, WalkOutcome::Found(1));
    }

    #[test]
    fn test_checks_filter() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "rcp85/a/low/SSP3/done.txt");
        fs::create_dir_all(dir.path().join("rcp85/b/low/SSP3")).unwrap();
        let walker = ScenarioWalker::new(dir.path(), Layout::Batch { batchdir: "median".into() });

        let mut config = ExtractConfig::default();
        config.checks = Some(vec!["done.txt".into()]);
        let (found, _) = accepted(&walker, &config, None);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].model, "a");
    }

    #[test]
    fn test_impact_presence() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "rcp85/a/low/SSP3/health.nc4");
        touch(dir.path(), "rcp85/b/low/SSP3/labor.nc4");
        let walker = ScenarioWalker::new(dir.path(), Layout::Batch { batchdir: "median".into() });
        let config = ExtractConfig::default();

        let impacts = vec!["health".to_string(), "agriculture".to_string()];
        let (found, _) = accepted(&walker, &config, Some(impacts.as_slice()));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].model, "a");
    }

    #[test]
    fn test_parallel_deltamethod_presence() {
        let results = tempfile::tempdir().unwrap();
        let dm = tempfile::tempdir().unwrap();
        touch(results.path(), "rcp85/a/low/SSP3/health.nc4");
        touch(results.path(), "rcp85/b/low/SSP3/health.nc4");
        touch(dm.path(), "rcp85/a/low/SSP3/health.nc4");

        let walker = ScenarioWalker::new(results.path(), Layout::Batch { batchdir: "median".into() });
        let mut config = ExtractConfig::default();
        config.results_root = Some(PathSetting::Single(results.path().to_path_buf()));
        config.deltamethod = Some(DeltaMethodSetting::Parallel(PathSetting::Single(dm.path().to_path_buf())));

        let impacts = vec!["health".to_string()];
        let (found, _) = accepted(&walker, &config, Some(impacts.as_slice()));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].model, "a");

        // Without impacts the delta-method directory itself must exist
        let (found, _) = accepted(&walker, &config, None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].target, TargetPath::Single(results.path().join("rcp85/a/low/SSP3")));
    }

    #[test]
    fn test_parallel_deltamethod_without_results_root_rejects() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("rcp85/a/low/SSP3")).unwrap();
        let walker = ScenarioWalker::new(dir.path(), Layout::Batch { batchdir: "median".into() });

        let mut config = ExtractConfig::default();
        config.deltamethod = Some(DeltaMethodSetting::Parallel(PathSetting::Single(PathBuf::from("/dm"))));

        let (found, outcome) = accepted(&walker, &config, None);
        assert!(found.is_empty());
        assert_eq!(outcome, WalkOutcome::NoValidCandidates);
    }
}
