//! ayum package-manager wrapper
//!
//! Drives a git checkout of ayum (a relocatable yum) to install nightly RPMs.
//!
//! # Layout
//!
//! ```text
//! <work dir>/ayum/            checkout
//!     ayum/ayum               binary
//!     ayum/setup.sh           environment
//!     ayum/etc/yum.repos.d/   remote source descriptors
//!     configure.ayum          self-configuration script
//!     yum.conf                runtime configuration (generated)
//! ```
//!
//! Every command runs as one composed `bash -c` line that first enters the
//! checkout and sources `setup.sh`, and every command is appended to the
//! ayum log together with its output.

mod command;
mod configure;
mod list;

pub use list::{InstalledPackage, classify, parse_installed, strip_extension};

use crate::context::{ContextError, RunContext};
use crate::repos::RemoteRepo;
use crate::shell::{self, CommandRunner, ShellCommand};
use command::AyumLog;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Error, Debug)]
pub enum AyumError {
    #[error("ayum repo git clone took too long and was killed (limit {}s)", .0.as_secs())]
    DownloadTimedOut(Duration),

    #[error("ayum repo git clone is cancelled ({0})")]
    DownloadCancelled(ContextError),

    #[error("ayum repo git clone download failed ({0})")]
    Download(String),

    #[error("{}: stable release dir does not exist", .0.display())]
    StableReleaseMissing(PathBuf),

    #[error("unable to copy package database {} to {}: {reason}", .src.display(), .dst.display())]
    CopyDatabase {
        src: PathBuf,
        dst: PathBuf,
        reason: String,
    },

    #[error("could not configure remote repo {file}: {source}")]
    RepoConfig {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ayum configure failed: {0}")]
    Configure(String),

    #[error("ayum list installed failed: {0}")]
    ListInstalled(String),

    #[error("ayum {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("ayum {command} interrupted ({source})")]
    Cancelled {
        command: String,
        #[source]
        source: ContextError,
    },
}

impl AyumError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::DownloadCancelled(_) | Self::Cancelled { .. })
    }
}

/// Capabilities the installer needs from the package manager.
pub trait PackageManager: Send + Sync {
    /// Fetch a fresh checkout of the tool.
    fn download(&self, ctx: &RunContext) -> Result<(), AyumError>;

    /// Seed the package database of cache nightlies from the stable release.
    fn pre_configure(&self, stable_releases_dir: &Path) -> Result<(), AyumError>;

    fn add_remote_repos(&self, repos: &[RemoteRepo]) -> Result<(), AyumError>;

    /// Generate the runtime configuration for the install target.
    fn configure(&self, ctx: &RunContext) -> Result<(), AyumError>;

    fn clean_all(&self, ctx: &RunContext, repo: &str) -> Result<(), AyumError>;

    /// Install or reinstall the named package files.
    fn install(&self, ctx: &RunContext, packages: &[String]) -> Result<(), AyumError>;

    /// File holding the output of every command run so far
    fn log_path(&self) -> &Path;
}

#[derive(Debug, Clone)]
pub struct AyumSettings {
    /// Git URL of the ayum sources
    pub src_repo: String,
    /// Checkout location
    pub dir: PathBuf,
    /// Root that packages are installed below
    pub install_dir: PathBuf,
    pub branch: String,
    pub download_timeout: Duration,
    pub command_timeout: Duration,
    pub install_timeout: Duration,
    pub log_path: PathBuf,
}

pub struct Ayum {
    settings: AyumSettings,
    runner: Arc<dyn CommandRunner>,
    log: AyumLog,
}

impl Ayum {
    pub fn new(settings: AyumSettings, runner: Arc<dyn CommandRunner>) -> Self {
        let log = AyumLog::new(&settings.log_path);
        Self {
            settings,
            runner,
            log,
        }
    }

    pub fn binary(&self) -> PathBuf {
        self.settings.dir.join("ayum/ayum")
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.settings.dir.join("ayum/etc/yum.repos.d")
    }

    pub fn yum_conf(&self) -> PathBuf {
        self.settings.dir.join("yum.conf")
    }

    /// Environment set-up run ahead of every ayum command
    fn env_prefix(&self) -> Vec<String> {
        vec![
            format!("cd {}", shell::quote(&self.settings.dir.to_string_lossy())),
            "shopt -s expand_aliases".to_string(),
            "source ayum/setup.sh".to_string(),
        ]
    }

    /// `<env>;<binary> <args...>`
    fn ayum_command(&self, args: &[&str], timeout: Duration) -> ShellCommand {
        let binary = self.binary();
        let mut words = vec![binary.to_str().unwrap_or("ayum/ayum")];
        words.extend_from_slice(args);

        let mut parts = self.env_prefix();
        parts.push(shell::join(words));
        ShellCommand::sequence(parts).timeout(timeout)
    }

    /// Run a command, log it, and fail on timeout, cancellation or non-zero exit.
    fn run_checked(
        &self,
        ctx: &RunContext,
        label: &str,
        cmd: &ShellCommand,
    ) -> Result<shell::ShellOutput, AyumError> {
        let out = self.run_logged(ctx, label, cmd)?;

        if let Some(err) = out.cancelled() {
            return Err(AyumError::Cancelled {
                command: label.to_string(),
                source: err,
            });
        }
        if !out.success() {
            let tail = out.stderr_tail(5);
            return Err(AyumError::Command {
                command: label.to_string(),
                reason: if tail.is_empty() {
                    out.describe_failure()
                } else {
                    format!("{}\n{}", out.describe_failure(), tail)
                },
            });
        }
        Ok(out)
    }

    fn run_logged(
        &self,
        ctx: &RunContext,
        label: &str,
        cmd: &ShellCommand,
    ) -> Result<shell::ShellOutput, AyumError> {
        let result = self.runner.run(ctx, cmd);
        self.log.record(label, cmd, &result);

        result.map_err(|e| AyumError::Command {
            command: label.to_string(),
            reason: e.to_string(),
        })
    }
}

impl PackageManager for Ayum {
    fn download(&self, ctx: &RunContext) -> Result<(), AyumError> {
        let dir = &self.settings.dir;
        if dir.exists() {
            std::fs::remove_dir_all(dir).map_err(|e| {
                AyumError::Download(format!("cannot remove old checkout {}: {}", dir.display(), e))
            })?;
        }

        let dir_str = dir.to_string_lossy();
        let line = format!(
            "git clone --quiet {}",
            shell::join([self.settings.src_repo.as_str(), dir_str.as_ref()])
        );
        let cmd = ShellCommand::new(line).timeout(self.settings.download_timeout);

        info!(repo = %self.settings.src_repo, dir = %dir.display(), "downloading ayum");
        let out = self.run_logged(ctx, "download", &cmd).map_err(|e| AyumError::Download(e.to_string()))?;

        if let Some(err) = out.cancelled() {
            return Err(AyumError::DownloadCancelled(err));
        }
        if out.timed_out() {
            return Err(AyumError::DownloadTimedOut(self.settings.download_timeout));
        }
        if !out.success() {
            return Err(AyumError::Download(format!(
                "{}: {}",
                out.describe_failure(),
                out.stderr_tail(3)
            )));
        }
        Ok(())
    }

    fn pre_configure(&self, stable_releases_dir: &Path) -> Result<(), AyumError> {
        configure::seed_package_database(
            &self.settings.branch,
            stable_releases_dir,
            &self.settings.install_dir,
        )
    }

    fn add_remote_repos(&self, repos: &[RemoteRepo]) -> Result<(), AyumError> {
        configure::write_repo_files(&self.repos_dir(), repos)
    }

    fn configure(&self, ctx: &RunContext) -> Result<(), AyumError> {
        let script = self.settings.dir.join("configure.ayum");
        let script = script.to_string_lossy();
        let install_dir = self.settings.install_dir.to_string_lossy();

        let mut parts = self.env_prefix();
        parts.push(shell::join([script.as_ref(), "-i", install_dir.as_ref(), "-D"]));
        let cmd = ShellCommand::sequence(parts).timeout(self.settings.command_timeout);

        let out = match self.run_checked(ctx, "configure", &cmd) {
            Ok(out) => out,
            Err(err @ AyumError::Cancelled { .. }) => return Err(err),
            Err(err) => return Err(AyumError::Configure(err.to_string())),
        };

        let conf = configure::filter_noise(&out.stdout);
        std::fs::write(self.yum_conf(), conf).map_err(|e| {
            AyumError::Configure(format!("cannot write {}: {}", self.yum_conf().display(), e))
        })?;

        info!(conf = %self.yum_conf().display(), "ayum configured");
        Ok(())
    }

    fn clean_all(&self, ctx: &RunContext, repo: &str) -> Result<(), AyumError> {
        let enable = format!("--enablerepo={}", repo);
        let cmd = self.ayum_command(&[enable.as_str(), "clean", "all"], self.settings.command_timeout);
        self.run_checked(ctx, "clean all", &cmd)?;
        Ok(())
    }

    fn install(&self, ctx: &RunContext, packages: &[String]) -> Result<(), AyumError> {
        if packages.is_empty() {
            return Ok(());
        }

        let installed = self.list_installed(ctx)?;
        let (reinstall, install) = classify(&installed, packages);
        info!(
            reinstall = reinstall.len(),
            install = install.len(),
            "installing packages"
        );

        for (verb, names) in [("reinstall", &reinstall), ("install", &install)] {
            if names.is_empty() {
                continue;
            }
            let mut args = vec!["-y", verb];
            args.extend(names.iter().map(String::as_str));
            let cmd = self.ayum_command(&args, self.settings.install_timeout);
            self.run_checked(ctx, verb, &cmd)?;
        }
        Ok(())
    }

    fn log_path(&self) -> &Path {
        &self.settings.log_path
    }
}

impl Ayum {
    /// Packages already installed below the install dir
    pub fn list_installed(&self, ctx: &RunContext) -> Result<Vec<InstalledPackage>, AyumError> {
        let cmd = self.ayum_command(&["-q", "list", "installed"], self.settings.command_timeout);
        let out = self
            .run_logged(ctx, "list installed", &cmd)
            .map_err(|e| AyumError::ListInstalled(e.to_string()))?;

        if let Some(err) = out.cancelled() {
            return Err(AyumError::Cancelled {
                command: "list installed".to_string(),
                source: err,
            });
        }
        if out.timed_out() {
            return Err(AyumError::ListInstalled(format!(
                "command timed out ({}s)",
                self.settings.command_timeout.as_secs()
            )));
        }
        if out.success() {
            return Ok(parse_installed(&out.stdout));
        }

        // ayum exits non-zero with identical output on both streams when
        // nothing is installed yet
        if out.stdout == out.stderr {
            info!("no local packages installed");
            return Ok(Vec::new());
        }

        warn!(exit_code = ?out.exit_code, stderr = %out.stderr_tail(5), "unable to list installed packages");
        Err(AyumError::ListInstalled(out.describe_failure()))
    }
}
