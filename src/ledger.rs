//! Tags file ledger
//!
//! The tags file is a shared text file listing installed nightlies, one entry
//! per line:
//!
//! ```text
//! VO-atlas-nightly;21.2;2024-01-01T0200;AnalysisBase-21.2.100;x86_64-centos7-gcc8-opt
//! ```
//!
//! It is copied to a private working file on first use and written back by
//! renaming the working file over the source. The save is refused when the
//! source changed after it was loaded.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Label of entries written for nightly installs
pub const NIGHTLY_LABEL: &str = "VO-atlas-nightly";

const FIELDS: usize = 5;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("tags file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("badly formatted line {line:?}, expected {expected}")]
    BadFormat { expected: String, line: String },

    #[error("cannot record {field} {value:?} in the tags file: {reason}")]
    InvalidEntry {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("tags file {} was modified by someone else since it was loaded, not overwriting", .0.display())]
    ConcurrentModification(PathBuf),

    #[error("tags file I/O on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> LedgerError + '_ {
    move |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One line of the tags file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    pub label: String,
    pub branch: String,
    pub datetime: String,
    pub project: String,
    pub next_release: String,
    pub platform: String,
}

impl TagEntry {
    /// Entry for an installed nightly, rejected when its line would not parse back.
    pub fn nightly(
        branch: &str,
        datetime: &str,
        project: &str,
        next_release: &str,
        platform: &str,
        separator: char,
    ) -> Result<Self, LedgerError> {
        let entry = Self {
            label: NIGHTLY_LABEL.to_string(),
            branch: branch.to_string(),
            datetime: datetime.to_string(),
            project: project.to_string(),
            next_release: next_release.to_string(),
            platform: platform.to_string(),
        };
        entry.check(separator)?;
        Ok(entry)
    }

    /// Fails unless `render(separator)` yields a line `parse` reads back as `self`.
    pub fn check(&self, separator: char) -> Result<(), LedgerError> {
        let fields = [
            ("label", &self.label),
            ("branch", &self.branch),
            ("datetime", &self.datetime),
            ("project", &self.project),
            ("release", &self.next_release),
            ("platform", &self.platform),
        ];
        for (field, value) in fields {
            let reason = if value.is_empty() {
                Some("empty")
            } else if value.contains(separator) {
                Some("contains the field separator")
            } else if value.contains(['\n', '\r']) {
                Some("contains a line break")
            } else if (field == "project" || field == "release") && value.contains('-') {
                // field 4 is split on the first and only '-'
                Some("contains '-'")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(LedgerError::InvalidEntry {
                    field,
                    value: value.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }

    pub fn parse(line: &str, separator: char) -> Result<Self, LedgerError> {
        let expected = |what: String| LedgerError::BadFormat {
            expected: what,
            line: line.to_string(),
        };

        let fields: Vec<&str> = line.split(separator).collect();
        let [label, branch, datetime, release, platform] = fields.as_slice() else {
            return Err(expected(format!(
                "{} fields separated by {:?} (label, branch, datetime, project-release, platform)",
                FIELDS, separator
            )));
        };

        let parts: Vec<&str> = release.split('-').collect();
        let [project, next_release] = parts.as_slice() else {
            return Err(expected(format!("<project>-<release> in field 4, got {:?}", release)));
        };

        Ok(Self {
            label: label.to_string(),
            branch: branch.to_string(),
            datetime: datetime.to_string(),
            project: project.to_string(),
            next_release: next_release.to_string(),
            platform: platform.to_string(),
        })
    }

    pub fn render(&self, separator: char) -> String {
        let release = format!("{}-{}", self.project, self.next_release);
        [
            self.label.as_str(),
            self.branch.as_str(),
            self.datetime.as_str(),
            release.as_str(),
            self.platform.as_str(),
        ]
        .join(&separator.to_string())
    }

    /// Whether the rendered line contains any of `needles`
    pub fn contains<S: AsRef<str>>(&self, separator: char, needles: &[S]) -> bool {
        let line = self.render(separator);
        needles.iter().any(|n| line.contains(n.as_ref()))
    }
}

impl fmt::Display for TagEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(crate::config::DEFAULT_TAGS_SEPARATOR))
    }
}

/// What the installer needs from the tags file.
pub trait Ledger: Send {
    fn src(&self) -> &Path;

    /// Add entries, loading the file first if needed.
    fn append(&mut self, entries: Vec<TagEntry>) -> Result<(), LedgerError>;

    /// Drop every entry whose line contains any of `needles`.
    fn remove(&mut self, needles: &[&str]) -> Result<(), LedgerError>;

    fn save(&mut self) -> Result<(), LedgerError>;
}

#[derive(Debug)]
struct Loaded {
    entries: Vec<TagEntry>,
    stamp: Stamp,
}

/// What identifies a given version of the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    mtime: SystemTime,
    len: u64,
}

impl Stamp {
    fn of(path: &Path) -> Result<Self, LedgerError> {
        let meta = fs::metadata(path).map_err(io_err(path))?;
        Ok(Self {
            mtime: meta.modified().map_err(io_err(path))?,
            len: meta.len(),
        })
    }
}

/// Sibling of `src` used to stage a write across filesystems
fn staging_path(src: &Path) -> PathBuf {
    let mut name = src
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "tags".into());
    name.push(".new");
    src.with_file_name(name)
}

#[derive(Debug)]
pub struct TagLedger {
    src: PathBuf,
    work_file: PathBuf,
    separator: char,
    loaded: Option<Loaded>,
}

impl TagLedger {
    /// `work_dir` holds the private working copy; it should not be shared.
    pub fn new(src: impl Into<PathBuf>, work_dir: &Path, separator: char) -> Self {
        let src = src.into();
        let name = src
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tags".into());
        Self {
            work_file: work_dir.join(name),
            src,
            separator,
            loaded: None,
        }
    }

    pub fn work_file(&self) -> &Path {
        &self.work_file
    }

    /// Entries currently held, loading the file first if needed
    pub fn entries(&mut self) -> Result<&[TagEntry], LedgerError> {
        Ok(&self.load()?.entries)
    }

    fn load(&mut self) -> Result<&mut Loaded, LedgerError> {
        let loaded = match self.loaded.take() {
            Some(loaded) => loaded,
            None => self.read_source()?,
        };
        Ok(self.loaded.insert(loaded))
    }

    fn read_source(&self) -> Result<Loaded, LedgerError> {
        if !self.src.is_file() {
            return Err(LedgerError::NotFound(self.src.clone()));
        }

        let stamp = Stamp::of(&self.src)?;
        fs::copy(&self.src, &self.work_file).map_err(io_err(&self.work_file))?;
        let text = fs::read_to_string(&self.work_file).map_err(io_err(&self.work_file))?;

        let entries = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| TagEntry::parse(line, self.separator))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(src = %self.src.display(), entries = entries.len(), "loaded tags file");
        Ok(Loaded { entries, stamp })
    }

    fn write_back(&self, text: &str) -> Result<(), LedgerError> {
        fs::write(&self.work_file, text).map_err(io_err(&self.work_file))?;

        match fs::rename(&self.work_file, &self.src) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32) => {
                // different filesystems: stage next to the source, then rename
                let staged = staging_path(&self.src);
                fs::copy(&self.work_file, &staged).map_err(io_err(&staged))?;
                fs::rename(&staged, &self.src).map_err(io_err(&self.src))?;
                let _ = fs::remove_file(&self.work_file);
                Ok(())
            }
            Err(e) => Err(io_err(&self.src)(e)),
        }
    }
}

impl Ledger for TagLedger {
    fn src(&self) -> &Path {
        &self.src
    }

    fn append(&mut self, entries: Vec<TagEntry>) -> Result<(), LedgerError> {
        if entries.is_empty() {
            return Ok(());
        }
        for entry in &entries {
            entry.check(self.separator)?;
        }
        let loaded = self.load()?;
        for entry in entries {
            if loaded.entries.contains(&entry) {
                debug!(entry = %entry, "already in tags file");
            } else {
                loaded.entries.push(entry);
            }
        }
        Ok(())
    }

    fn remove(&mut self, needles: &[&str]) -> Result<(), LedgerError> {
        if needles.is_empty() {
            return Ok(());
        }
        let separator = self.separator;
        let loaded = self.load()?;
        let before = loaded.entries.len();
        loaded.entries.retain(|e| !e.contains(separator, needles));

        let removed = before - loaded.entries.len();
        if removed > 0 {
            debug!(removed, "removed tags file entries");
        }
        Ok(())
    }

    fn save(&mut self) -> Result<(), LedgerError> {
        let Some(loaded) = self.loaded.as_ref() else {
            debug!("tags file never loaded, nothing to save");
            return Ok(());
        };

        if Stamp::of(&self.src)? != loaded.stamp {
            warn!(src = %self.src.display(), "tags file changed since it was loaded");
            return Err(LedgerError::ConcurrentModification(self.src.clone()));
        }

        let text: String = loaded
            .entries
            .iter()
            .map(|e| format!("{}\n", e.render(self.separator)))
            .collect();
        self.write_back(&text)?;

        info!(src = %self.src.display(), entries = loaded.entries.len(), "tags file saved");
        // the next use reloads, picking up our own write
        self.loaded = None;
        Ok(())
    }
}
