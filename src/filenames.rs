//! Impact arguments
//!
//! Each positional argument names one result file basename to extract:
//! - `name`: the configured `column` (or the default column)
//! - `name:column`: an explicit column
//! - `:column`: another column of the previous basename
//! - `-name`: values negated

use crate::config::ExtractConfig;
use anyhow::Result;
use std::fmt;

/// One impact to extract from every valid target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpactSpec {
    pub basename: String,
    pub column: Option<String>,
    pub negate: bool,
}

impl ImpactSpec {
    pub fn sign(&self) -> f64 {
        if self.negate {
            -1.0
        } else {
            1.0
        }
    }

    /// Output column header for this impact
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ImpactSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            f.write_str("-")?;
        }
        f.write_str(&self.basename)?;
        if let Some(column) = &self.column {
            write!(f, ":{}", column)?;
        }
        Ok(())
    }
}

pub fn interpret_filenames<S: AsRef<str>>(argv: &[S], config: &ExtractConfig) -> Result<Vec<ImpactSpec>> {
    let mut impacts: Vec<ImpactSpec> = Vec::with_capacity(argv.len());

    for arg in argv {
        let arg = arg.as_ref();
        let (negate, rest) = match arg.strip_prefix('-') {
            Some("") => anyhow::bail!("Cannot interpret a single dash as an impact"),
            Some(rest) => (true, rest),
            None => (false, arg),
        };

        let (basename, column) = match rest.split_once(':') {
            Some(("", column)) => {
                let Some(previous) = impacts.last() else {
                    anyhow::bail!("'{}' repeats a previous basename, but none was given", arg);
                };
                (previous.basename.clone(), Some(column.to_string()))
            }
            Some((basename, column)) => (basename.to_string(), Some(column.to_string())),
            None => (rest.to_string(), config.column.clone()),
        };

        impacts.push(ImpactSpec { basename, column, negate });
    }

    Ok(impacts)
}
