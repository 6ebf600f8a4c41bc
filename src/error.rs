//! Error handling for the installer
//!
//! Each component has its own error enum; the orchestrator wraps them in
//! `InstallError` and collects every failure of a run in an `ErrorList`.

use crate::ayum::AyumError;
use crate::context::ContextError;
use crate::ledger::LedgerError;
use crate::resolver::FinderError;
use crate::transaction::TransactionError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A failure recorded by the orchestrator
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("unable to open transaction: {0}")]
    TransactionOpen(#[source] TransactionError),

    #[error("unable to close transaction: {0}")]
    TransactionClose(#[source] TransactionError),

    #[error("unable to abort transaction: {0}")]
    TransactionAbort(#[source] TransactionError),

    #[error("dependency resolution failed: {0}")]
    Resolve(#[from] FinderError),

    #[error(transparent)]
    PackageManager(#[from] AyumError),

    #[error("tags file update failed: {0}")]
    Ledger(#[from] LedgerError),

    /// Layout of the installed nightly directory is not as expected
    #[error("install dir: {0}")]
    InstallDir(String),

    #[error("unable to remove {}: {source}", .path.display())]
    CleanDirs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to copy ayum log: {0}")]
    CopyLog(String),

    #[error("install interrupted ({0})")]
    Cancelled(#[from] ContextError),

    #[error("installer panicked: {0}")]
    Panic(String),
}

impl InstallError {
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::TransactionOpen(e) => e.cancellation().is_some(),
            Self::PackageManager(e) => e.is_cancellation(),
            Self::Resolve(FinderError::Cancelled(_)) => true,
            _ => false,
        }
    }
}

/// Ordered collection of every failure of a run
#[derive(Debug, Default)]
pub struct ErrorList(Vec<InstallError>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: impl Into<InstallError>) {
        self.0.push(err.into());
    }

    pub fn extend(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstallError> {
        self.0.iter()
    }

    /// True when the one recorded error is a failure to copy the ayum log.
    /// Such a run still publishes its results.
    pub fn is_only_log_copy_failure(&self) -> bool {
        matches!(self.0.as_slice(), [InstallError::CopyLog(_)])
    }

    pub fn into_result(self) -> Result<(), ErrorList> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

impl From<InstallError> for ErrorList {
    fn from(err: InstallError) -> Self {
        Self(vec![err])
    }
}

impl IntoIterator for ErrorList {
    type Item = InstallError;
    type IntoIter = std::vec::IntoIter<InstallError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
