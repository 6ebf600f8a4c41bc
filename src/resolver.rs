//! Top package lookup and local dependency closure
//!
//! Given a project and platform, find the single top RPM in the source
//! directory and the subset of its declared requirements that are present as
//! files next to it.
//!
//! # Resolution Rules
//!
//! | Step | Rule |
//! |------|------|
//! | Top package | `<project>_*_<platform>.rpm`; first file in name order wins |
//! | Top size | must be non-zero |
//! | Requirements | `rpm -qp --requires`, first word of each line |
//! | Dependency match | file name, or file name without `.rpm`, is a requirement |
//! | Dependency sizes | every zero-size dependency is reported together |
//!
//! # What This Explicitly Refuses To Do
//!
//! - Transitive resolution: requirements of dependencies are not followed
//! - Report missing requirements: anything not on disk here is the package
//!   manager's problem

use crate::context::{ContextError, RunContext};
use crate::package::{Package, PackageSet};
use crate::shell::{self, CommandRunner, ShellCommand};
use globset::GlobBuilder;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const RPM_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum FinderError {
    #[error("no top RPM found to install ({pattern} in {})", .dir.display())]
    NoTopPackage { pattern: String, dir: PathBuf },

    #[error("top RPM has zero size: {}", .0.display())]
    ZeroSizeTop(PathBuf),

    #[error("rpm dependencies of {} found with zero size: {}", .top.display(), .names.join(", "))]
    ZeroSizeDependencies { top: PathBuf, names: Vec<String> },

    #[error("invalid top RPM pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot list requirements of {}: {reason}", .path.display())]
    Requirements { path: PathBuf, reason: String },

    #[error("rpm lookup interrupted ({0})")]
    Cancelled(ContextError),
}

impl FinderError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Declared requirements of an RPM file
pub trait RequirementsReader: Send + Sync {
    fn requires(&self, ctx: &RunContext, rpm: &Path) -> Result<Vec<String>, FinderError>;
}

/// Finds the package set for a project/platform pair.
pub trait PackageFinder: Send + Sync {
    fn find(&self, ctx: &RunContext, project: &str, platform: &str)
        -> Result<PackageSet, FinderError>;

    /// Directory the packages are taken from
    fn src_dir(&self) -> &Path;
}

/// Reads requirements with `rpm -qp --requires`
pub struct RpmQuery {
    runner: Arc<dyn CommandRunner>,
}

impl RpmQuery {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

/// First word of every non-empty line
pub fn parse_requires(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

impl RequirementsReader for RpmQuery {
    fn requires(&self, ctx: &RunContext, rpm: &Path) -> Result<Vec<String>, FinderError> {
        let path = rpm.to_string_lossy();
        let cmd = ShellCommand::new(format!("rpm -qp --requires {}", shell::quote(&path)))
            .timeout(RPM_QUERY_TIMEOUT);

        let out = self
            .runner
            .run(ctx, &cmd)
            .map_err(|e| FinderError::io(rpm, e))?;

        if let Some(err) = out.cancelled() {
            return Err(FinderError::Cancelled(err));
        }
        if !out.success() {
            return Err(FinderError::Requirements {
                path: rpm.to_path_buf(),
                reason: format!("{}: {}", out.describe_failure(), out.stderr_tail(3)),
            });
        }

        Ok(parse_requires(&out.stdout))
    }
}

/// Looks for packages in one local directory
pub struct LocalFinder {
    src_dir: PathBuf,
    reader: Box<dyn RequirementsReader>,
}

impl LocalFinder {
    pub fn new(src_dir: impl Into<PathBuf>, reader: Box<dyn RequirementsReader>) -> Self {
        Self {
            src_dir: src_dir.into(),
            reader,
        }
    }

    /// Regular files in the source dir, sorted by name
    fn listing(&self) -> Result<Vec<PathBuf>, FinderError> {
        let entries =
            std::fs::read_dir(&self.src_dir).map_err(|e| FinderError::io(&self.src_dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FinderError::io(&self.src_dir, e))?;
            let is_file = entry
                .file_type()
                .map_err(|e| FinderError::io(&entry.path(), e))?
                .is_file();
            if is_file {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn top_package(
        &self,
        files: &[PathBuf],
        project: &str,
        platform: &str,
    ) -> Result<PathBuf, FinderError> {
        let pattern = format!("{}_*_{}.rpm", project, platform);
        let matcher = GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| FinderError::Pattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?
            .compile_matcher();

        let matches: Vec<&PathBuf> = files
            .iter()
            .filter(|p| p.file_name().is_some_and(|n| matcher.is_match(n)))
            .collect();

        match matches.as_slice() {
            [] => Err(FinderError::NoTopPackage {
                pattern,
                dir: self.src_dir.clone(),
            }),
            [only] => Ok((*only).clone()),
            [first, ..] => {
                warn!(
                    pattern = %pattern,
                    count = matches.len(),
                    chosen = %first.display(),
                    "several top RPMs match, using the first"
                );
                Ok((*first).clone())
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl PackageFinder for LocalFinder {
    fn find(
        &self,
        ctx: &RunContext,
        project: &str,
        platform: &str,
    ) -> Result<PackageSet, FinderError> {
        let files = self.listing()?;
        let top_path = self.top_package(&files, project, platform)?;

        let top = Package::from_path(&top_path).map_err(|e| FinderError::io(&top_path, e))?;
        if top.is_empty() {
            return Err(FinderError::ZeroSizeTop(top_path));
        }

        let required: HashSet<String> = self.reader.requires(ctx, &top_path)?.into_iter().collect();
        debug!(top = %top_path.display(), requirements = required.len(), "read top RPM requirements");

        let mut set = PackageSet::new();
        set.push(top);

        let mut zero = Vec::new();
        for path in files.iter().filter(|p| **p != top_path) {
            let name = file_name(path);
            let stem = name.strip_suffix(".rpm").unwrap_or(&name);
            if !required.contains(&name) && !required.contains(stem) {
                continue;
            }

            let dep = Package::from_path(path).map_err(|e| FinderError::io(path, e))?;
            if dep.is_empty() {
                zero.push(name);
            } else {
                set.push(dep);
            }
        }

        if !zero.is_empty() {
            return Err(FinderError::ZeroSizeDependencies {
                top: top_path,
                names: zero,
            });
        }

        info!(
            project,
            platform,
            packages = set.len(),
            "resolved packages to install"
        );
        Ok(set)
    }

    fn src_dir(&self) -> &Path {
        &self.src_dir
    }
}
