//! Nightly release installer
//!
//! Installs a nightly snapshot of a software release, packaged as RPMs, into
//! a transactionally published area (CVMFS or a plain directory) by driving
//! the ayum package manager.

pub mod ayum;
pub mod cli;
pub mod completion;
pub mod config;
pub mod config_file;
pub mod context;
pub mod error;
pub mod install_state;
pub mod installer;
pub mod ledger;
pub mod logging;
pub mod notify;
pub mod package;
pub mod process_guard;
pub mod repos;
pub mod resolver;
pub mod shell;
pub mod transaction;
pub mod types;

pub use ayum::{Ayum, AyumError, AyumSettings, PackageManager};
pub use completion::Completion;
pub use config::{Config, ConfigError, InstallRequest};
pub use context::{ContextError, RunContext};
pub use error::{ErrorList, InstallError};
pub use install_state::{InstallStage, InstallTracker, InstallTransitionError};
pub use installer::{InstallReport, Installer};
pub use ledger::{Ledger, LedgerError, TagEntry, TagLedger};
pub use notify::{MailNotifier, Notifier, NotifyError, Report};
pub use package::{Package, PackageSet};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use resolver::{FinderError, LocalFinder, PackageFinder, RequirementsReader, RpmQuery};
pub use shell::{BashRunner, CommandRunner, ShellCommand, ShellOutput};
pub use transaction::{Transaction, TransactionError, TransactionState, Transactioner};
pub use types::{LogFormat, Platform};
