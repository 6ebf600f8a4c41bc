//! Resolved, validated run configuration
//!
//! Command-line options are layered over the optional JSON file, defaults are
//! derived, and the result is validated once into an immutable `Config` that
//! is passed explicitly to every component.

use crate::ayum::{
    AyumSettings, DEFAULT_COMMAND_TIMEOUT, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_INSTALL_TIMEOUT,
};
use crate::cli::Cli;
use crate::config_file::FileConfig;
use crate::transaction::TransactionSettings;
use crate::types::{LogFormat, Platform, PlatformError};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CVMFS_REPO: &str = "atlas-nightlies.cern.ch";
pub const DEFAULT_CVMFS_EXE: &str = "/usr/bin/cvmfs_server";
pub const DEFAULT_CVMFS_GATEWAY: &str = "lxcvmfs78.cern.ch";
pub const DEFAULT_SUDO_USER: &str = "cvatlasnightlies";
pub const DEFAULT_TAGS_FILE: &str = "/cvmfs/atlas-nightlies.cern.ch/repo/sw/tags";
pub const DEFAULT_STABLE_RELEASES_DIR: &str = "/cvmfs/atlas.cern.ch/repo/sw/software";
pub const DEFAULT_EOS_NIGHTLY_DIR: &str = "/eos/project/a/atlas-software-dist/www/RPMs/nightlies";
pub const DEFAULT_AYUM_SRC_REPO: &str = "https://gitlab.cern.ch/atlas-sit/ayum.git";
pub const DEFAULT_EMAIL_FROM: &str = "nightly-installer@cern.ch";
pub const DEFAULT_TAGS_SEPARATOR: char = ';';
pub const DEFAULT_MAX_TRANSACTION_ATTEMPTS: u32 = 10;
pub const MAX_TRANSACTION_ATTEMPTS: std::ops::RangeInclusive<u32> = 1..=30;

/// Timestamps older than this are refused
pub const MAX_NIGHTLY_AGE_DAYS: i64 = 30;
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H%M";

const MIN_PROJECT_LEN: usize = 5;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required option --{0}")]
    Missing(&'static str),

    #[error("--release {0:?} must have the form <branch>/<platform>/<timestamp>")]
    Release(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("badly formed timestamp {value:?} (expected YYYY-MM-DDThhmm): {reason}")]
    Timestamp { value: String, reason: String },

    #[error("date/timestamp {0} is in the future")]
    TimestampInFuture(String),

    #[error("date/timestamp {0} is more than {MAX_NIGHTLY_AGE_DAYS} days in the past")]
    TimestampTooOld(String),

    #[error("illegal --project {0:?} (at least {MIN_PROJECT_LEN} characters)")]
    Project(String),

    #[error("max attempts to open a transaction must be in range 1-30, got {0}")]
    TransactionAttempts(u32),

    #[error("invalid email address {0:?}")]
    Email(String),

    #[error("tags separator {0:?} cannot be whitespace or '-'")]
    Separator(char),

    #[error("no work directory given and $HOME is not set")]
    NoWorkDir,

    #[error("cannot make {} absolute: {source}", .path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A branch with more than two dots (e.g. `21.2.100.1`) is a cache nightly.
pub fn is_cache_branch(branch: &str) -> bool {
    branch.matches('.').count() > 2
}

/// `21.2.100.1` -> `21.2`
pub fn base_release(branch: &str) -> String {
    branch.split('.').take(2).collect::<Vec<_>>().join(".")
}

/// What to install and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub branch: String,
    pub platform: Platform,
    pub timestamp: String,
    pub project: String,
    pub install_base: PathBuf,
    pub work_base: PathBuf,
    pub rpm_src_dir: PathBuf,
    pub stable_releases_dir: PathBuf,
    pub tags_file: PathBuf,
}

impl InstallRequest {
    /// `<branch>_<project>_<platform>`
    pub fn nightly_id(&self) -> String {
        format!("{}_{}_{}", self.branch, self.project, self.platform)
    }

    /// `<install base>/<nightly id>`, shared by every timestamp of a nightly
    pub fn nightly_base(&self) -> PathBuf {
        self.install_base.join(self.nightly_id())
    }

    /// `<install base>/<nightly id>/<timestamp>`
    pub fn nightly_install_dir(&self) -> PathBuf {
        self.nightly_base().join(&self.timestamp)
    }

    pub fn is_cache_nightly(&self) -> bool {
        is_cache_branch(&self.branch)
    }

    pub fn ayum_dir(&self) -> PathBuf {
        self.work_base.join("ayum")
    }

    /// `<branch>/<platform>/<timestamp>`
    pub fn release(&self) -> String {
        format!("{}/{}/{}", self.branch, self.platform, self.timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AyumConfig {
    pub src_repo: String,
    pub download_timeout: Duration,
    pub command_timeout: Duration,
    pub install_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvmfsConfig {
    pub exe: String,
    pub repo: String,
    pub gateway: Option<String>,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminConfig {
    pub emails: Vec<String>,
    pub email_from: String,
    pub send_email: bool,
    pub sudo_user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// File name template without extension; `None` logs to stderr
    pub file: Option<String>,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub request: InstallRequest,
    pub tags_separator: char,
    pub ayum: AyumConfig,
    pub cvmfs: CvmfsConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
    /// Overall run limit; `None` when unbounded
    pub timeout: Option<Duration>,
}

/// Split and validate `<branch>/<platform>/<timestamp>`.
pub fn parse_release(
    release: &str,
    now: DateTime<Local>,
) -> Result<(String, Platform, String), ConfigError> {
    let parts: Vec<&str> = release.trim().split('/').collect();
    let [branch, platform, timestamp] = parts.as_slice() else {
        return Err(ConfigError::Release(release.to_string()));
    };
    if branch.is_empty() {
        return Err(ConfigError::Release(release.to_string()));
    }

    let platform: Platform = platform.parse()?;
    validate_timestamp(timestamp, now)?;

    Ok((branch.to_string(), platform, timestamp.to_string()))
}

/// Local-time timestamp, not in the future and at most 30 days old.
pub fn validate_timestamp(value: &str, now: DateTime<Local>) -> Result<DateTime<Local>, ConfigError> {
    let naive = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|e| {
        ConfigError::Timestamp {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;

    let stamp = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ConfigError::Timestamp {
            value: value.to_string(),
            reason: "not a valid local time".to_string(),
        })?;

    if stamp > now {
        return Err(ConfigError::TimestampInFuture(value.to_string()));
    }
    if now - stamp > chrono::Duration::days(MAX_NIGHTLY_AGE_DAYS) {
        return Err(ConfigError::TimestampTooOld(value.to_string()));
    }
    Ok(stamp)
}

fn absolute(path: PathBuf) -> Result<PathBuf, ConfigError> {
    std::path::absolute(&path).map_err(|source| ConfigError::Path { path, source })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

impl Config {
    /// Layer `cli` over `file`, derive defaults and validate.
    ///
    /// `home` is the fallback work directory and `now` anchors the timestamp
    /// age check.
    pub fn resolve(
        cli: &Cli,
        file: &FileConfig,
        home: Option<&Path>,
        now: DateTime<Local>,
    ) -> Result<Self, ConfigError> {
        let cli = cli.clone();
        let file = file.clone();

        let release = non_empty(cli.release.or(file.install.release))
            .ok_or(ConfigError::Missing("release"))?;
        let (branch, platform, timestamp) = parse_release(&release, now)?;

        let project = non_empty(cli.project.or(file.install.project))
            .ok_or(ConfigError::Missing("project"))?;
        if project.len() < MIN_PROJECT_LEN {
            return Err(ConfigError::Project(project));
        }

        let tags_separator = cli
            .tags_separator
            .or(file.install.tags_separator)
            .unwrap_or(DEFAULT_TAGS_SEPARATOR);
        if tags_separator.is_whitespace() || tags_separator == '-' {
            return Err(ConfigError::Separator(tags_separator));
        }

        let cvmfs_repo = non_empty(cli.cvmfs_repo.or(file.cvmfs.repo))
            .unwrap_or_else(|| DEFAULT_CVMFS_REPO.to_string());
        let max_attempts = cli
            .max_transaction_attempts
            .or(file.cvmfs.max_transaction_attempts)
            .unwrap_or(DEFAULT_MAX_TRANSACTION_ATTEMPTS);
        if !MAX_TRANSACTION_ATTEMPTS.contains(&max_attempts) {
            return Err(ConfigError::TransactionAttempts(max_attempts));
        }

        let work_base = match cli.work_dir.or(file.dirs.work) {
            Some(dir) => dir,
            None => home.map(Path::to_path_buf).ok_or(ConfigError::NoWorkDir)?,
        };
        let work_base = absolute(work_base)?;

        let install_base = cli
            .install_dir
            .or(file.dirs.install)
            .unwrap_or_else(|| PathBuf::from(format!("/cvmfs/{}/repo/sw", cvmfs_repo)));
        let eos_nightly = cli
            .eos_nightly_dir
            .or(file.dirs.eos_nightly)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EOS_NIGHTLY_DIR));
        let rpm_src_dir = cli
            .rpm_src_dir
            .or(file.dirs.rpm_src)
            .unwrap_or_else(|| eos_nightly.join(&release));
        let logs_dir = cli
            .logs_dir
            .or(file.dirs.logs)
            .unwrap_or_else(|| work_base.join("logs"));

        let request = InstallRequest {
            branch,
            platform,
            timestamp,
            project,
            install_base: absolute(install_base)?,
            work_base,
            rpm_src_dir: absolute(rpm_src_dir)?,
            stable_releases_dir: absolute(
                cli.stable_releases_dir
                    .or(file.dirs.stable_releases)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STABLE_RELEASES_DIR)),
            )?,
            tags_file: absolute(
                cli.tagsfile
                    .or(file.install.tagsfile)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TAGS_FILE)),
            )?,
        };

        let emails: Vec<String> = non_empty(cli.email.or(file.admin.email))
            .map(|list| {
                list.split(',')
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if let Some(bad) = emails.iter().find(|e| !e.contains('@')) {
            return Err(ConfigError::Email(bad.clone()));
        }

        let ayum = AyumConfig {
            src_repo: non_empty(cli.ayum_src_repo.or(file.ayum.src_repo))
                .unwrap_or_else(|| DEFAULT_AYUM_SRC_REPO.to_string()),
            download_timeout: cli
                .ayum_download_timeout
                .or(file.ayum.download_timeout)
                .map(secs)
                .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT),
            command_timeout: cli
                .ayum_cmd_timeout
                .or(file.ayum.cmd_timeout)
                .map(secs)
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            install_timeout: cli
                .ayum_install_timeout
                .or(file.ayum.install_timeout)
                .map(secs)
                .unwrap_or(DEFAULT_INSTALL_TIMEOUT),
        };

        let cvmfs = CvmfsConfig {
            exe: non_empty(cli.cvmfs_exe.or(file.cvmfs.exe))
                .unwrap_or_else(|| DEFAULT_CVMFS_EXE.to_string()),
            repo: cvmfs_repo,
            gateway: non_empty(cli.cvmfs_gateway.or(file.cvmfs.gateway))
                .or_else(|| Some(DEFAULT_CVMFS_GATEWAY.to_string())),
            max_attempts,
            retry_delay: secs(
                cli.transaction_retry_delay
                    .or(file.cvmfs.transaction_retry_delay)
                    .unwrap_or(0),
            ),
        };

        let admin = AdminConfig {
            emails,
            email_from: non_empty(cli.email_from.or(file.admin.email_from))
                .unwrap_or_else(|| DEFAULT_EMAIL_FROM.to_string()),
            send_email: !(cli.no_email || file.admin.no_email.unwrap_or(false)),
            sudo_user: match cli.sudo_user.or(file.admin.sudo_user) {
                Some(user) => non_empty(Some(user)),
                None => Some(DEFAULT_SUDO_USER.to_string()),
            },
        };

        let logging = LoggingConfig {
            level: non_empty(cli.log_level.or(file.logging.level))
                .unwrap_or_else(|| "info".to_string()),
            format: cli.log_format.or(file.logging.format).unwrap_or_default(),
            file: non_empty(cli.log_file.or(file.logging.file)),
            dir: absolute(logs_dir)?,
        };

        let timeout = cli
            .timeout
            .or(file.timeout)
            .filter(|t| *t > 0)
            .map(secs);

        Ok(Self {
            request,
            tags_separator,
            ayum,
            cvmfs,
            admin,
            logging,
            timeout,
        })
    }

    pub fn transaction_settings(&self) -> TransactionSettings {
        TransactionSettings {
            cvmfs_exe: self.cvmfs.exe.clone(),
            cvmfs_repo: self.cvmfs.repo.clone(),
            gateway: self.cvmfs.gateway.clone(),
            sudo_user: self.admin.sudo_user.clone(),
            max_attempts: self.cvmfs.max_attempts,
            retry_delay: self.cvmfs.retry_delay,
        }
    }

    /// ayum installs below the per-nightly base so its cache and package
    /// database are shared by every timestamp of the nightly.
    pub fn ayum_settings(&self, log_path: PathBuf) -> AyumSettings {
        AyumSettings {
            src_repo: self.ayum.src_repo.clone(),
            dir: self.request.ayum_dir(),
            install_dir: self.request.nightly_base(),
            branch: self.request.branch.clone(),
            download_timeout: self.ayum.download_timeout,
            command_timeout: self.ayum.command_timeout,
            install_timeout: self.ayum.install_timeout,
            log_path,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.request;
        writeln!(f, "- Install:")?;
        writeln!(f, "   - Release: {}", r.release())?;
        writeln!(f, "   - Project: {}", r.project)?;
        writeln!(f, "   - Tags file: {} (separator {:?})", r.tags_file.display(), self.tags_separator)?;
        writeln!(f, "- Directories:")?;
        writeln!(f, "   - Install base: {}", r.install_base.display())?;
        writeln!(f, "   - Work base: {}", r.work_base.display())?;
        writeln!(f, "   - Logs dir: {}", self.logging.dir.display())?;
        writeln!(f, "   - RPM src dir: {}", r.rpm_src_dir.display())?;
        writeln!(f, "   - Stable releases dir: {}", r.stable_releases_dir.display())?;
        writeln!(f, "- Ayum:")?;
        writeln!(f, "   - Src repo: {}", self.ayum.src_repo)?;
        writeln!(
            f,
            "   - Timeouts: download {}s, command {}s, install {}s",
            self.ayum.download_timeout.as_secs(),
            self.ayum.command_timeout.as_secs(),
            self.ayum.install_timeout.as_secs()
        )?;
        writeln!(f, "- CVMFS:")?;
        writeln!(f, "   - Binary: {}", self.cvmfs.exe)?;
        writeln!(f, "   - Repo: {}", self.cvmfs.repo)?;
        writeln!(f, "   - Gateway: {}", self.cvmfs.gateway.as_deref().unwrap_or("(none)"))?;
        writeln!(f, "   - Max open attempts: {}", self.cvmfs.max_attempts)?;
        writeln!(f, "- Admin:")?;
        writeln!(f, "   - Sudo user: {}", self.admin.sudo_user.as_deref().unwrap_or("(none)"))?;
        writeln!(f, "   - Email recipients: {}", self.admin.emails.join(","))?;
        writeln!(f, "   - Send email on failure: {}", self.admin.send_email)?;
        write!(
            f,
            "- Timeout: {}",
            self.timeout
                .map(|t| format!("{}s", t.as_secs()))
                .unwrap_or_else(|| "none".to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    fn cli(release: &str, project: &str) -> Cli {
        Cli {
            release: Some(release.to_string()),
            project: Some(project.to_string()),
            work_dir: Some(PathBuf::from("/work")),
            ..Cli::default()
        }
    }

    #[test]
    fn test_cache_branch_detection() {
        assert!(!is_cache_branch("master"));
        assert!(!is_cache_branch("21.2"));
        assert!(!is_cache_branch("21.2.100"));
        assert!(is_cache_branch("21.2.100.1"));
        assert_eq!(base_release("21.2.100.1"), "21.2");
    }

    #[test]
    fn test_resolve_defaults() {
        let cfg = Config::resolve(
            &cli("21.2/x86_64-centos7-gcc8-opt/2024-01-01T0200", "AnalysisBase"),
            &FileConfig::default(),
            None,
            now(),
        )
        .unwrap();

        let r = &cfg.request;
        assert_eq!(r.branch, "21.2");
        assert_eq!(r.nightly_id(), "21.2_AnalysisBase_x86_64-centos7-gcc8-opt");
        assert_eq!(r.install_base, PathBuf::from("/cvmfs/atlas-nightlies.cern.ch/repo/sw"));
        assert_eq!(
            r.nightly_install_dir(),
            PathBuf::from("/cvmfs/atlas-nightlies.cern.ch/repo/sw/21.2_AnalysisBase_x86_64-centos7-gcc8-opt/2024-01-01T0200")
        );
        assert_eq!(
            r.rpm_src_dir,
            PathBuf::from(DEFAULT_EOS_NIGHTLY_DIR).join("21.2/x86_64-centos7-gcc8-opt/2024-01-01T0200")
        );
        assert_eq!(cfg.logging.dir, PathBuf::from("/work/logs"));
        assert_eq!(cfg.cvmfs.max_attempts, DEFAULT_MAX_TRANSACTION_ATTEMPTS);
        assert_eq!(cfg.tags_separator, ';');
        assert!(cfg.timeout.is_none());
        assert!(cfg.admin.send_email);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = FileConfig::default();
        file.install.project = Some("Athena".into());
        file.cvmfs.max_transaction_attempts = Some(20);
        file.timeout = Some(100);

        let mut c = cli("master/x86_64-centos7-gcc8-opt/2024-01-09T2100", "AthSimulation");
        c.max_transaction_attempts = Some(2);

        let cfg = Config::resolve(&c, &file, None, now()).unwrap();
        assert_eq!(cfg.request.project, "AthSimulation");
        assert_eq!(cfg.cvmfs.max_attempts, 2);
        assert_eq!(cfg.timeout, Some(Duration::from_secs(100)));
    }

    #[test]
    fn test_release_shape() {
        let err = Config::resolve(&cli("21.2/x86_64-centos7-gcc8-opt", "Athena"), &FileConfig::default(), None, now())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Release(_)));
    }

    #[test]
    fn test_illegal_platform() {
        let err = Config::resolve(
            &cli("21.2/x86_64-centos8-gcc8-opt/2024-01-01T0200", "Athena"),
            &FileConfig::default(),
            None,
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Platform(_)));
    }

    #[test]
    fn test_timestamp_rules() {
        assert!(validate_timestamp("2024-01-10T1159", now()).is_ok());
        assert!(matches!(
            validate_timestamp("2024-01-10T1201", now()),
            Err(ConfigError::TimestampInFuture(_))
        ));
        assert!(matches!(
            validate_timestamp("2023-12-01T0000", now()),
            Err(ConfigError::TimestampTooOld(_))
        ));
        assert!(matches!(
            validate_timestamp("2024-01-10 1159", now()),
            Err(ConfigError::Timestamp { .. })
        ));
    }

    #[test]
    fn test_short_project_rejected() {
        let err = Config::resolve(
            &cli("21.2/x86_64-centos7-gcc8-opt/2024-01-01T0200", "Ath"),
            &FileConfig::default(),
            None,
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Project(_)));
    }

    #[test]
    fn test_attempts_range_and_emails() {
        let mut c = cli("21.2/x86_64-centos7-gcc8-opt/2024-01-01T0200", "Athena");
        c.max_transaction_attempts = Some(31);
        assert!(matches!(
            Config::resolve(&c, &FileConfig::default(), None, now()),
            Err(ConfigError::TransactionAttempts(31))
        ));

        let mut c = cli("21.2/x86_64-centos7-gcc8-opt/2024-01-01T0200", "Athena");
        c.email = Some("a@cern.ch, nobody".into());
        assert!(matches!(
            Config::resolve(&c, &FileConfig::default(), None, now()),
            Err(ConfigError::Email(e)) if e == "nobody"
        ));
    }

    #[test]
    fn test_work_dir_falls_back_to_home() {
        let mut c = cli("21.2/x86_64-centos7-gcc8-opt/2024-01-01T0200", "Athena");
        c.work_dir = None;

        let cfg = Config::resolve(&c, &FileConfig::default(), Some(Path::new("/home/atnight")), now()).unwrap();
        assert_eq!(cfg.request.work_base, PathBuf::from("/home/atnight"));
        assert_eq!(cfg.request.ayum_dir(), PathBuf::from("/home/atnight/ayum"));

        assert!(matches!(
            Config::resolve(&c, &FileConfig::default(), None, now()),
            Err(ConfigError::NoWorkDir)
        ));
    }
}
