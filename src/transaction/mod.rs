//! Exclusive mutation window on the install target
//!
//! A `Transaction` owns the begin/publish/discard protocol and its retry
//! policy; the storage-specific commands live in a `StorageBackend`.
//!
//! # State
//!
//! ```text
//! Idle --open--> Open --close--> Closed
//!                     --abort--> Aborted
//! ```
//!
//! Closed and Aborted are terminal: a transaction is never reopened.

mod cvmfs;
mod local;

pub use cvmfs::CvmfsBackend;
pub use local::LocalBackend;

use crate::context::{ContextError, RunContext};
use crate::shell::{CommandRunner, ShellOutput};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use thiserror::Error;
use tracing::{info, warn};

/// Install bases below this prefix are published through CVMFS.
pub const CVMFS_PREFIX: &str = "/cvmfs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransactionState {
    Idle,
    Open,
    Closed,
    Aborted,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Aborted)
    }
}

/// Failure of a single storage back-end operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{0}")]
    Cancelled(ContextError),

    #[error("{0}")]
    Failed(String),
}

impl BackendError {
    /// Map a finished storage command onto a back-end result.
    pub fn check(label: &str, result: std::io::Result<ShellOutput>) -> Result<(), BackendError> {
        let out = result.map_err(|e| BackendError::Failed(format!("{}: {}", label, e)))?;

        if let Some(err) = out.cancelled() {
            return Err(BackendError::Cancelled(err));
        }
        if out.success() {
            return Ok(());
        }

        let tail = out.stderr_tail(3);
        Err(BackendError::Failed(if tail.is_empty() {
            format!("{}: {}", label, out.describe_failure())
        } else {
            format!("{}: {} ({})", label, out.describe_failure(), tail)
        }))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("context done, aborting transaction open ({0})")]
    OpenCancelled(ContextError),

    #[error("gave up opening transaction after {attempts} attempts (last error: {last})")]
    TooManyAttempts { attempts: u32, last: String },

    #[error("transaction already open")]
    AlreadyOpen,

    #[error("transaction already {0}, it cannot be reused")]
    Finished(TransactionState),

    #[error("publish interrupted ({0})")]
    PublishCancelled(ContextError),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("discard interrupted ({0})")]
    DiscardCancelled(ContextError),

    #[error("discard failed: {0}")]
    Discard(String),
}

impl TransactionError {
    /// The context error behind this failure, if it was an interruption
    pub fn cancellation(&self) -> Option<ContextError> {
        match self {
            Self::OpenCancelled(e) | Self::PublishCancelled(e) | Self::DiscardCancelled(e) => {
                Some(*e)
            }
            _ => None,
        }
    }
}

/// Storage-specific transaction commands
pub trait StorageBackend: Send {
    fn name(&self) -> &'static str;
    fn begin(&mut self, ctx: &RunContext) -> Result<(), BackendError>;
    fn publish(&mut self, ctx: &RunContext) -> Result<(), BackendError>;
    fn discard(&mut self, ctx: &RunContext) -> Result<(), BackendError>;
}

/// Open/close/abort capability used by the installer.
pub trait Transactioner: Send {
    fn open(&mut self, ctx: &RunContext) -> Result<(), TransactionError>;
    fn close(&mut self, ctx: &RunContext) -> Result<(), TransactionError>;
    fn abort(&mut self, ctx: &RunContext) -> Result<(), TransactionError>;
    fn state(&self) -> TransactionState;
}

#[derive(Debug)]
pub struct Transaction<B> {
    backend: B,
    max_attempts: u32,
    retry_delay: Duration,
    attempts_made: u32,
    state: TransactionState,
}

impl<B: StorageBackend> Transaction<B> {
    pub fn new(backend: B, max_attempts: u32) -> Self {
        Self {
            backend,
            max_attempts: max_attempts.max(1),
            retry_delay: Duration::ZERO,
            attempts_made: 0,
            state: TransactionState::Idle,
        }
    }

    /// Pause between failed open attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Number of begin operations issued so far
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: StorageBackend> Transactioner for Transaction<B> {
    fn open(&mut self, ctx: &RunContext) -> Result<(), TransactionError> {
        match self.state {
            TransactionState::Idle => {}
            TransactionState::Open => return Err(TransactionError::AlreadyOpen),
            terminal => return Err(TransactionError::Finished(terminal)),
        }

        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            if let Some(err) = ctx.err() {
                return Err(TransactionError::OpenCancelled(err));
            }

            self.attempts_made += 1;
            match self.backend.begin(ctx) {
                Ok(()) => {
                    info!(backend = self.backend.name(), attempt, "transaction opened");
                    self.state = TransactionState::Open;
                    return Ok(());
                }
                Err(BackendError::Cancelled(err)) => {
                    info!(backend = self.backend.name(), attempt, "context done, stopping transaction open");
                    return Err(TransactionError::OpenCancelled(err));
                }
                Err(BackendError::Failed(msg)) => {
                    warn!(
                        backend = self.backend.name(),
                        attempt,
                        max = self.max_attempts,
                        error = %msg,
                        "transaction open failed"
                    );
                    last = msg;
                }
            }

            if attempt < self.max_attempts && !self.retry_delay.is_zero() {
                ctx.sleep(self.retry_delay)
                    .map_err(TransactionError::OpenCancelled)?;
            }
        }

        Err(TransactionError::TooManyAttempts {
            attempts: self.max_attempts,
            last,
        })
    }

    fn close(&mut self, ctx: &RunContext) -> Result<(), TransactionError> {
        if self.state != TransactionState::Open {
            return Ok(());
        }

        let result = self.backend.publish(ctx);
        self.state = TransactionState::Closed;

        match result {
            Ok(()) => {
                info!(backend = self.backend.name(), "transaction published");
                Ok(())
            }
            Err(BackendError::Cancelled(e)) => Err(TransactionError::PublishCancelled(e)),
            Err(BackendError::Failed(msg)) => Err(TransactionError::Publish(msg)),
        }
    }

    fn abort(&mut self, ctx: &RunContext) -> Result<(), TransactionError> {
        if self.state != TransactionState::Open {
            return Ok(());
        }

        let result = self.backend.discard(ctx);
        self.state = TransactionState::Aborted;

        match result {
            Ok(()) => {
                info!(backend = self.backend.name(), "transaction aborted");
                Ok(())
            }
            Err(BackendError::Cancelled(e)) => Err(TransactionError::DiscardCancelled(e)),
            Err(BackendError::Failed(msg)) => Err(TransactionError::Discard(msg)),
        }
    }

    fn state(&self) -> TransactionState {
        self.state
    }
}

/// Settings for building the transaction for an install base
#[derive(Debug, Clone)]
pub struct TransactionSettings {
    pub cvmfs_exe: String,
    pub cvmfs_repo: String,
    pub gateway: Option<String>,
    pub sudo_user: Option<String>,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

/// CVMFS transaction for `/cvmfs/...` install bases, a local one otherwise.
pub fn for_install_base(
    install_base: &Path,
    settings: &TransactionSettings,
    runner: Arc<dyn CommandRunner>,
) -> Box<dyn Transactioner> {
    if install_base.starts_with(CVMFS_PREFIX) {
        let backend = CvmfsBackend::new(runner, &settings.cvmfs_exe, &settings.cvmfs_repo)
            .with_gateway(settings.gateway.clone())
            .with_sudo_user(settings.sudo_user.clone());
        Box::new(
            Transaction::new(backend, settings.max_attempts)
                .with_retry_delay(settings.retry_delay),
        )
    } else {
        Box::new(Transaction::new(
            LocalBackend::new(install_base),
            settings.max_attempts,
        ))
    }
}
