//! Scenario target paths
//!
//! A target is either one directory or, when results are split across
//! parallel trees, a mapping from path pattern to directory. Patterns are
//! regular expressions matched against the impact basename.

use crate::config::PathSetting;
use crate::error::ExtractError;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPath {
    Single(PathBuf),
    Branched(BTreeMap<String, PathBuf>),
}

impl TargetPath {
    /// Directory holding `basename`
    ///
    /// For branched targets exactly one pattern must match the basename.
    pub fn resolve(&self, basename: &str) -> Result<&Path> {
        let branches = match self {
            TargetPath::Single(path) => return Ok(path),
            TargetPath::Branched(branches) => branches,
        };

        let mut found = None;
        let mut matches = 0;
        for (pattern, path) in branches {
            let regex = Regex::new(&format!("^(?:{})", pattern))
                .with_context(|| format!("Invalid path pattern '{}'", pattern))?;
            if regex.is_match(basename) {
                matches += 1;
                found = Some(path.as_path());
            }
        }

        match (found, matches) {
            (Some(path), 1) => Ok(path),
            _ => Err(ExtractError::AmbiguousPathPattern { basename: basename.to_string(), matches }.into()),
        }
    }

    /// Path of `<basename>.nc4` inside this target
    pub fn result_file(&self, basename: &str) -> Result<PathBuf> {
        Ok(self.resolve(basename)?.join(format!("{}.nc4", basename)))
    }

    /// Corresponding location in the delta-method tree
    ///
    /// Substitutes the `results_root` prefix with the `deltamethod` root. A
    /// branched target resolves only if every branch does.
    pub fn deltamethod_path(&self, results_root: &PathSetting, deltamethod: &PathSetting) -> Option<TargetPath> {
        match (self, results_root, deltamethod) {
            (TargetPath::Single(path), PathSetting::Single(from), PathSetting::Single(to)) => {
                rebase(path, from, to).map(TargetPath::Single)
            }
            (TargetPath::Branched(branches), PathSetting::Branches(from), PathSetting::Branches(to)) => branches
                .iter()
                .map(|(name, path)| {
                    let rebased = rebase(path, from.get(name)?, to.get(name)?)?;
                    Some((name.clone(), rebased))
                })
                .collect::<Option<BTreeMap<_, _>>>()
                .map(TargetPath::Branched),
            _ => None,
        }
    }

    /// Every directory this target points at
    pub fn dirs(&self) -> Vec<&Path> {
        match self {
            TargetPath::Single(path) => vec![path.as_path()],
            TargetPath::Branched(branches) => branches.values().map(PathBuf::as_path).collect(),
        }
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPath::Single(path) => write!(f, "{}", path.display()),
            TargetPath::Branched(branches) => {
                let parts: Vec<String> = branches
                    .iter()
                    .map(|(name, path)| format!("{}={}", name, path.display()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

fn rebase(path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
    path.strip_prefix(from).ok().map(|rest| to.join(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branched(pairs: &[(&str, &str)]) -> TargetPath {
        TargetPath::Branched(pairs.iter().map(|(k, v)| (k.to_string(), PathBuf::from(v))).collect())
    }

    fn branch_setting(pairs: &[(&str, &str)]) -> PathSetting {
        PathSetting::Branches(pairs.iter().map(|(k, v)| (k.to_string(), PathBuf::from(v))).collect())
    }

    #[test]
    fn test_single_resolves_any_basename() {
        let target = TargetPath::Single(PathBuf::from("/results/rcp85"));
        assert_eq!(target.resolve("anything").unwrap(), Path::new("/results/rcp85"));
        assert_eq!(
            target.result_file("health").unwrap(),
            PathBuf::from("/results/rcp85/health.nc4")
        );
    }

    #[test]
    fn test_branched_pattern_lookup() {
        let target = branched(&[("health-.*", "/a/x"), ("agriculture", "/b/x")]);
        assert_eq!(target.resolve("health-mortality").unwrap(), Path::new("/a/x"));
        assert_eq!(target.resolve("agriculture").unwrap(), Path::new("/b/x"));
    }

    #[test]
    fn test_branched_lookup_requires_exactly_one_match() {
        let target = branched(&[("health", "/a/x"), ("health-.*", "/b/x")]);

        let err = target.resolve("health-mortality").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::AmbiguousPathPattern { matches: 2, .. })
        ));

        let err = target.resolve("labor").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::AmbiguousPathPattern { matches: 0, .. })
        ));
    }

    #[test]
    fn test_single_deltamethod_path() {
        let target = TargetPath::Single(PathBuf::from("/results/median/rcp85/ccsm4"));
        let dm = target
            .deltamethod_path(
                &PathSetting::Single(PathBuf::from("/results")),
                &PathSetting::Single(PathBuf::from("/deltamethod")),
            )
            .unwrap();
        assert_eq!(dm, TargetPath::Single(PathBuf::from("/deltamethod/median/rcp85/ccsm4")));
    }

    #[test]
    fn test_single_deltamethod_path_outside_root() {
        let target = TargetPath::Single(PathBuf::from("/elsewhere/rcp85"));
        let dm = target.deltamethod_path(
            &PathSetting::Single(PathBuf::from("/results")),
            &PathSetting::Single(PathBuf::from("/deltamethod")),
        );
        assert!(dm.is_none());
    }

    #[test]
    fn test_branched_deltamethod_path() {
        let target = branched(&[("health", "/r1/rcp85"), ("labor", "/r2/rcp85")]);
        let roots = branch_setting(&[("health", "/r1"), ("labor", "/r2")]);
        let dm_roots = branch_setting(&[("health", "/d1"), ("labor", "/d2")]);

        let dm = target.deltamethod_path(&roots, &dm_roots).unwrap();
        assert_eq!(dm, branched(&[("health", "/d1/rcp85"), ("labor", "/d2/rcp85")]));
    }

    #[test]
    fn test_branched_deltamethod_path_missing_branch() {
        let target = branched(&[("health", "/r1/rcp85"), ("labor", "/r2/rcp85")]);
        let roots = branch_setting(&[("health", "/r1"), ("labor", "/r2")]);
        let dm_roots = branch_setting(&[("health", "/d1")]);

        assert!(target.deltamethod_path(&roots, &dm_roots).is_none());
    }
}
