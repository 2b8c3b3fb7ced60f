//! Directory-tree layouts
//!
//! Each layout is a lazy walk over sorted directory listings. Nothing here
//! filters scenarios; see `ValidTargets` for that.

use super::ScenarioDescriptor;
use crate::config::{DirTree, ExtractConfig, MonteCarloMode, MonteCarloSetting, PathSetting};
use crate::target::TargetPath;
use anyhow::Result;
use std::collections::BTreeMap;
use std::iter;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Placeholder for identifiers a layout does not encode
pub const NA: &str = "NA";

/// Batch label used by the climate-only layout
pub const CLIMATE_ONLY_BATCH: &str = "pest";

pub type DescriptorIter<'a> = Box<dyn Iterator<Item = Result<ScenarioDescriptor>> + 'a>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// `<root>/<batchdir>/<rcp>/<model>/<iam>/<ssp>/`
    Batch { batchdir: String },
    /// Explicit list of `[batch/]rcp/model/iam/ssp` paths relative to root
    TargetSubdirs { subdirs: Vec<String>, batchdir: String },
    /// Every `batch*` directory under root
    MonteCarlo,
    /// The `batchdir` tree, then every `batch*` tree
    MonteCarloBoth { batchdir: String },
    /// `<root>/<rcp>/<model>/`
    ClimateOnly,
}

impl Layout {
    pub fn from_config(config: &ExtractConfig) -> Self {
        let batchdir = config.batchdir().to_string();

        if config.dirtree == DirTree::ClimateOnly {
            return Layout::ClimateOnly;
        }
        if let Some(subdirs) = &config.targetsubdirs {
            return Layout::TargetSubdirs { subdirs: subdirs.clone(), batchdir };
        }
        match config.do_montecarlo {
            MonteCarloSetting::Mode(MonteCarloMode::Both) => Layout::MonteCarloBoth { batchdir },
            MonteCarloSetting::Flag(true) => Layout::MonteCarlo,
            MonteCarloSetting::Flag(false) => Layout::Batch { batchdir },
        }
    }
}

/// Restartable enumeration of scenario directories under one root
#[derive(Debug, Clone)]
pub struct ScenarioWalker {
    root: PathBuf,
    layout: Layout,
    /// Parallel result roots; targets are rebased onto each of them
    branches: Option<BTreeMap<String, PathBuf>>,
}

impl ScenarioWalker {
    pub fn new(root: impl Into<PathBuf>, layout: Layout) -> Self {
        ScenarioWalker { root: root.into(), layout, branches: None }
    }

    pub fn from_config(root: impl Into<PathBuf>, config: &ExtractConfig) -> Self {
        let mut walker = Self::new(root, Layout::from_config(config));
        if let Some(PathSetting::Branches(branches)) = &config.results_root {
            walker.branches = Some(branches.clone());
        }
        walker
    }

    /// Start a fresh walk
    pub fn iter(&self) -> DescriptorIter<'_> {
        let walk: DescriptorIter<'_> = match &self.layout {
            Layout::Batch { batchdir } => {
                let dir = self.root.join(batchdir);
                let dir = if dir.is_dir() {
                    dir
                } else {
                    tracing::warn!(
                        "{} not found; walking {} as the {} tree",
                        dir.display(),
                        self.root.display(),
                        batchdir
                    );
                    self.root.clone()
                };
                Box::new(BatchWalk::new(batchdir.clone(), &dir))
            }
            Layout::TargetSubdirs { subdirs, batchdir } => Box::new(
                subdirs
                    .iter()
                    .map(move |subdir| parse_target_subdir(&self.root, subdir, batchdir)),
            ),
            Layout::MonteCarlo => montecarlo_walk(&self.root),
            Layout::MonteCarloBoth { batchdir } => {
                let dir = self.root.join(batchdir);
                let median: DescriptorIter<'_> = if dir.is_dir() {
                    Box::new(BatchWalk::new(batchdir.clone(), &dir))
                } else {
                    Box::new(iter::empty())
                };
                Box::new(median.chain(montecarlo_walk(&self.root)))
            }
            Layout::ClimateOnly => Box::new(LevelWalk::new(&self.root, 2).map(|entry| {
                let (names, path) = entry?;
                Ok(ScenarioDescriptor {
                    batch: CLIMATE_ONLY_BATCH.to_string(),
                    rcp: names[0].clone(),
                    model: names[1].clone(),
                    iam: NA.to_string(),
                    ssp: NA.to_string(),
                    target: TargetPath::Single(path),
                })
            })),
        };

        match &self.branches {
            None => walk,
            Some(branches) => Box::new(walk.map(move |descriptor| {
                let mut descriptor = descriptor?;
                descriptor.target = self.rebase_onto_branches(&descriptor.target, branches);
                Ok(descriptor)
            })),
        }
    }

    fn rebase_onto_branches(&self, target: &TargetPath, branches: &BTreeMap<String, PathBuf>) -> TargetPath {
        let TargetPath::Single(path) = target else {
            return target.clone();
        };
        match path.strip_prefix(&self.root) {
            Ok(relative) => TargetPath::Branched(
                branches
                    .iter()
                    .map(|(pattern, root)| (pattern.clone(), root.join(relative)))
                    .collect(),
            ),
            Err(_) => target.clone(),
        }
    }
}

impl<'a> IntoIterator for &'a ScenarioWalker {
    type Item = Result<ScenarioDescriptor>;
    type IntoIter = DescriptorIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn montecarlo_walk(root: &Path) -> DescriptorIter<'static> {
    let batches = LevelWalk::new(root, 1).filter(|entry| match entry {
        Ok((names, _)) => names[0].starts_with("batch"),
        Err(_) => true,
    });

    Box::new(batches.flat_map(|entry| -> DescriptorIter<'static> {
        match entry {
            Ok((names, path)) => Box::new(BatchWalk::new(names[0].clone(), &path)),
            Err(e) => Box::new(iter::once(Err(e))),
        }
    }))
}

fn parse_target_subdir(root: &Path, subdir: &str, batchdir: &str) -> Result<ScenarioDescriptor> {
    let parts: Vec<&str> = subdir.split('/').filter(|part| !part.is_empty()).collect();
    if parts.len() < 4 {
        anyhow::bail!("Target subdirectory '{}' must end in rcp/model/iam/ssp", subdir);
    }

    let n = parts.len();
    let batch = if n > 4 { parts[n - 5] } else { batchdir };

    Ok(ScenarioDescriptor {
        batch: batch.to_string(),
        rcp: parts[n - 4].to_string(),
        model: parts[n - 3].to_string(),
        iam: parts[n - 2].to_string(),
        ssp: parts[n - 1].to_string(),
        target: TargetPath::Single(root.join(subdir)),
    })
}

/// Directories exactly `levels` below a root, depth-first in name order
pub struct LevelWalk {
    root: PathBuf,
    entries: walkdir::IntoIter,
}

impl LevelWalk {
    pub fn new(root: &Path, levels: usize) -> Self {
        let entries = WalkDir::new(root)
            .follow_links(true)
            .min_depth(levels)
            .max_depth(levels)
            .sort_by_file_name()
            .into_iter();
        LevelWalk { root: root.to_path_buf(), entries }
    }
}

impl Iterator for LevelWalk {
    type Item = Result<(Vec<String>, PathBuf)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let context = format!("Failed to list directory under {:?}", self.root);
                    return Some(Err(anyhow::Error::new(e).context(context)));
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let path = entry.into_path();
            let names = match path.strip_prefix(&self.root) {
                Ok(relative) => relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().into_owned())
                    .collect(),
                Err(_) => continue,
            };
            return Some(Ok((names, path)));
        }
    }
}

/// One batch tree: `<rcp>/<model>/<iam>/<ssp>/`
///
/// An `<iam>` directory without subdirectories is a target with ssp `NA`.
struct BatchWalk {
    batch: String,
    levels: LevelWalk,
    pending: std::vec::IntoIter<ScenarioDescriptor>,
}

impl BatchWalk {
    fn new(batch: String, dir: &Path) -> Self {
        BatchWalk { batch, levels: LevelWalk::new(dir, 3), pending: Vec::new().into_iter() }
    }

    fn descriptor(&self, names: &[String], ssp: &str, path: PathBuf) -> ScenarioDescriptor {
        ScenarioDescriptor {
            batch: self.batch.clone(),
            rcp: names[0].clone(),
            model: names[1].clone(),
            iam: names[2].clone(),
            ssp: ssp.to_string(),
            target: TargetPath::Single(path),
        }
    }
}

impl Iterator for BatchWalk {
    type Item = Result<ScenarioDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(descriptor) = self.pending.next() {
                return Some(Ok(descriptor));
            }

            let (names, iam_dir) = match self.levels.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };

            let ssps = match LevelWalk::new(&iam_dir, 1).collect::<Result<Vec<_>>>() {
                Ok(ssps) => ssps,
                Err(e) => return Some(Err(e)),
            };

            if ssps.is_empty() {
                return Some(Ok(self.descriptor(&names, NA, iam_dir)));
            }

            self.pending = ssps
                .into_iter()
                .map(|(ssp, path)| self.descriptor(&names, &ssp[0], path))
                .collect::<Vec<_>>()
                .into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_dirs(root: &Path, dirs: &[&str]) {
        for dir in dirs {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
    }

    fn collect(walker: &ScenarioWalker) -> Vec<(String, String, String, String, String)> {
        walker
            .iter()
            .map(|d| {
                let d = d.unwrap();
                (d.batch, d.rcp, d.model, d.iam, d.ssp)
            })
            .collect()
    }

    fn row(batch: &str, rcp: &str, model: &str, iam: &str, ssp: &str) -> (String, String, String, String, String) {
        (batch.into(), rcp.into(), model.into(), iam.into(), ssp.into())
    }

    #[test]
    fn test_level_walk_sorted() {
        let dir = tempfile::tempdir().unwrap();
        make_dirs(dir.path(), &["b/y", "a/z", "a/x"]);

        let found: Vec<Vec<String>> = LevelWalk::new(dir.path(), 2).map(|e| e.unwrap().0).collect();
        assert_eq!(
            found,
            vec![
                vec!["a".to_string(), "x".to_string()],
                vec!["a".to_string(), "z".to_string()],
                vec!["b".to_string(), "y".to_string()],
            ]
        );
    }

    #[test]
    fn test_batch_layout_with_batchdir() {
        let dir = tempfile::tempdir().unwrap();
        make_dirs(dir.path(), &["median/rcp85/ccsm4/high/SSP3", "median/rcp45/ccsm4/low/SSP2"]);

        let walker = ScenarioWalker::new(dir.path(), Layout::Batch { batchdir: "median".into() });
        assert_eq!(
            collect(&walker),
            vec![
                row("median", "rcp45", "ccsm4", "low", "SSP2"),
                row("median", "rcp85", "ccsm4", "high", "SSP3"),
            ]
        );
    }

    #[test]
    fn test_batch_layout_falls_back_to_root_and_iam_leaf() {
        let dir = tempfile::tempdir().unwrap();
        make_dirs(dir.path(), &["rcp85/model-a/low"]);

        let walker = ScenarioWalker::new(dir.path(), Layout::Batch { batchdir: "median".into() });
        let found: Vec<ScenarioDescriptor> = walker.iter().map(|d| d.unwrap()).collect();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ssp, NA);
        assert_eq!(found[0].target, TargetPath::Single(dir.path().join("rcp85/model-a/low")));
    }

    #[test]
    fn test_montecarlo_layouts() {
        let dir = tempfile::tempdir().unwrap();
        make_dirs(
            dir.path(),
            &["median/rcp85/m/high/SSP3", "batch0/rcp85/m/high/SSP3", "batch1/rcp85/m/low/SSP3", "other/x/y/z/w"],
        );

        let mc = ScenarioWalker::new(dir.path(), Layout::MonteCarlo);
        assert_eq!(
            collect(&mc),
            vec![row("batch0", "rcp85", "m", "high", "SSP3"), row("batch1", "rcp85", "m", "low", "SSP3")]
        );

        let both = ScenarioWalker::new(dir.path(), Layout::MonteCarloBoth { batchdir: "median".into() });
        let found = collect(&both);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].0, "median");

        // Restartable
        assert_eq!(collect(&both), found);
    }

    #[test]
    fn test_target_subdirs_layout() {
        let walker = ScenarioWalker::new(
            "/root",
            Layout::TargetSubdirs {
                subdirs: vec!["rcp85/ccsm4/high/SSP3".into(), "batch3/rcp45/gfdl/low/SSP2/".into()],
                batchdir: "median".into(),
            },
        );
        assert_eq!(
            collect(&walker),
            vec![row("median", "rcp85", "ccsm4", "high", "SSP3"), row("batch3", "rcp45", "gfdl", "low", "SSP2")]
        );

        let bad = ScenarioWalker::new(
            "/root",
            Layout::TargetSubdirs { subdirs: vec!["rcp85/ccsm4".into()], batchdir: "median".into() },
        );
        assert!(bad.iter().next().unwrap().is_err());
    }

    #[test]
    fn test_climate_only_layout() {
        let dir = tempfile::tempdir().unwrap();
        make_dirs(dir.path(), &["rcp85/ccsm4", "rcp45/gfdl"]);

        let walker = ScenarioWalker::new(dir.path(), Layout::ClimateOnly);
        assert_eq!(
            collect(&walker),
            vec![row("pest", "rcp45", "gfdl", "NA", "NA"), row("pest", "rcp85", "ccsm4", "NA", "NA")]
        );
    }

    #[test]
    fn test_layout_from_config() {
        let mut config = ExtractConfig::default();
        assert_eq!(Layout::from_config(&config), Layout::Batch { batchdir: "median".into() });

        config.do_montecarlo = MonteCarloSetting::Flag(true);
        assert_eq!(Layout::from_config(&config), Layout::MonteCarlo);

        config.targetsubdirs = Some(vec!["a/b/c/d".into()]);
        assert!(matches!(Layout::from_config(&config), Layout::TargetSubdirs { .. }));

        config.dirtree = DirTree::ClimateOnly;
        assert_eq!(Layout::from_config(&config), Layout::ClimateOnly);
    }

    #[test]
    fn test_branched_results_root() {
        let dir = tempfile::tempdir().unwrap();
        make_dirs(dir.path(), &["rcp85/m/low/SSP3"]);

        let mut walker = ScenarioWalker::new(dir.path(), Layout::Batch { batchdir: "median".into() });
        walker.branches = Some(BTreeMap::from([
            ("health".to_string(), PathBuf::from("/r1")),
            ("labor".to_string(), PathBuf::from("/r2")),
        ]));

        let found: Vec<ScenarioDescriptor> = walker.iter().map(|d| d.unwrap()).collect();
        assert_eq!(
            found[0].target,
            TargetPath::Branched(BTreeMap::from([
                ("health".to_string(), PathBuf::from("/r1/rcp85/m/low/SSP3")),
                ("labor".to_string(), PathBuf::from("/r2/rcp85/m/low/SSP3")),
            ]))
        );
    }
}
