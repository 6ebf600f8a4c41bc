use crate::types::LogFormat;
use clap::Parser;
use std::path::PathBuf;

/// Install a nightly release snapshot into CVMFS (or a local area) via ayum
///
/// Every option may also be given in a JSON file passed with --config;
/// options on the command line take precedence over the file.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "nightly-installer")]
#[command(version)]
pub struct Cli {
    /// Release to install, as <branch>/<platform>/<timestamp>
    #[arg(long, help_heading = "Install")]
    pub release: Option<String>,

    /// Project to install, e.g. Athena or AnalysisBase
    #[arg(long, help_heading = "Install")]
    pub project: Option<String>,

    /// Tags file recording installed nightlies
    #[arg(long, help_heading = "Install")]
    pub tagsfile: Option<PathBuf>,

    /// Field separator used in the tags file
    #[arg(long, help_heading = "Install")]
    pub tags_separator: Option<char>,

    /// Base directory below which to install [default: /cvmfs/<cvmfs-repo>/repo/sw]
    #[arg(long, help_heading = "Directories")]
    pub install_dir: Option<PathBuf>,

    /// Directory in which to do work [default: $HOME]
    #[arg(long, help_heading = "Directories")]
    pub work_dir: Option<PathBuf>,

    /// Directory for install logs [default: <work-dir>/logs]
    #[arg(long, help_heading = "Directories")]
    pub logs_dir: Option<PathBuf>,

    /// Directory holding the nightly RPMs [default: <eos-nightly-dir>/<release>]
    #[arg(long, help_heading = "Directories")]
    pub rpm_src_dir: Option<PathBuf>,

    /// Stable releases area used to seed cache nightlies
    #[arg(long, help_heading = "Directories")]
    pub stable_releases_dir: Option<PathBuf>,

    /// Base directory of nightly RPMs in EOS
    #[arg(long, help_heading = "Directories")]
    pub eos_nightly_dir: Option<PathBuf>,

    /// Git repository of the ayum sources
    #[arg(long, help_heading = "Ayum")]
    pub ayum_src_repo: Option<String>,

    /// Seconds allowed for cloning ayum
    #[arg(long, help_heading = "Ayum")]
    pub ayum_download_timeout: Option<u64>,

    /// Seconds allowed for ayum commands such as configure or clean
    #[arg(long, help_heading = "Ayum")]
    pub ayum_cmd_timeout: Option<u64>,

    /// Seconds allowed for one ayum install or reinstall
    #[arg(long, help_heading = "Ayum")]
    pub ayum_install_timeout: Option<u64>,

    /// Path to the cvmfs_server executable
    #[arg(long, help_heading = "CVMFS")]
    pub cvmfs_exe: Option<String>,

    /// CVMFS repository receiving nightlies
    #[arg(long, help_heading = "CVMFS")]
    pub cvmfs_repo: Option<String>,

    /// Gateway node for CVMFS operations
    #[arg(long, help_heading = "CVMFS")]
    pub cvmfs_gateway: Option<String>,

    /// Attempts at opening a transaction before giving up (1-30)
    #[arg(long, help_heading = "CVMFS")]
    pub max_transaction_attempts: Option<u32>,

    /// Seconds to wait between transaction open attempts
    #[arg(long, help_heading = "CVMFS")]
    pub transaction_retry_delay: Option<u64>,

    /// Comma-separated addresses to notify on failure
    #[arg(long, help_heading = "Admin")]
    pub email: Option<String>,

    /// Sender address of notifications
    #[arg(long, help_heading = "Admin")]
    pub email_from: Option<String>,

    /// Do not send an e-mail on failure
    #[arg(long, help_heading = "Admin")]
    pub no_email: bool,

    /// User that owns the CVMFS repository
    #[arg(long, help_heading = "Admin")]
    pub sudo_user: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, help_heading = "Logging")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, help_heading = "Logging")]
    pub log_format: Option<LogFormat>,

    /// Log file name below the logs dir, without extension.
    /// Supports %branch, %platform, %project, %timestamp and %start.
    #[arg(long, help_heading = "Logging")]
    pub log_file: Option<String>,

    /// Seconds after which the whole install aborts (0 = no limit)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// JSON file supplying option values
    #[arg(long)]
    pub config: Option<PathBuf>,
}
