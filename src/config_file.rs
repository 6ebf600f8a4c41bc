//! JSON configuration file
//!
//! Mirrors the command-line options, grouped into the same sections. Every
//! field is optional; values given on the command line take precedence.
//!
//! ```json
//! {
//!   "install": { "release": "21.2/x86_64-centos7-gcc8-opt/2024-01-01T0200", "project": "Athena" },
//!   "dirs": { "work": "/build/work" },
//!   "cvmfs": { "max_transaction_attempts": 5 },
//!   "admin": { "no_email": true }
//! }
//! ```

use crate::types::LogFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallSection {
    pub release: Option<String>,
    pub project: Option<String>,
    pub tagsfile: Option<PathBuf>,
    pub tags_separator: Option<char>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirsSection {
    pub install: Option<PathBuf>,
    pub work: Option<PathBuf>,
    pub logs: Option<PathBuf>,
    pub rpm_src: Option<PathBuf>,
    pub stable_releases: Option<PathBuf>,
    pub eos_nightly: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AyumSection {
    pub src_repo: Option<String>,
    pub download_timeout: Option<u64>,
    pub cmd_timeout: Option<u64>,
    pub install_timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CvmfsSection {
    pub exe: Option<String>,
    pub repo: Option<String>,
    pub gateway: Option<String>,
    pub max_transaction_attempts: Option<u32>,
    pub transaction_retry_delay: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdminSection {
    /// Comma-separated list, as on the command line
    pub email: Option<String>,
    pub email_from: Option<String>,
    pub no_email: Option<bool>,
    pub sudo_user: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
    pub file: Option<String>,
}

/// Option values loaded from `--config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub install: InstallSection,
    pub dirs: DirsSection,
    pub ayum: AyumSection,
    pub cvmfs: CvmfsSection,
    pub admin: AdminSection,
    pub logging: LoggingSection,
    /// Overall timeout in seconds
    pub timeout: Option<u64>,
}

impl FileConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse configuration JSON {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("installer.json");
        fs::write(
            &path,
            r#"{"install": {"project": "Athena"}, "cvmfs": {"max_transaction_attempts": 5}, "timeout": 600}"#,
        )
        .unwrap();

        let cfg = FileConfig::load_from_file(&path).unwrap();
        assert_eq!(cfg.install.project.as_deref(), Some("Athena"));
        assert_eq!(cfg.cvmfs.max_transaction_attempts, Some(5));
        assert_eq!(cfg.timeout, Some(600));
        assert!(cfg.dirs.work.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("installer.json");
        fs::write(&path, r#"{"install": {"projct": "Athena"}}"#).unwrap();

        let err = FileConfig::load_from_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("projct"));
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("installer.json");
        let mut cfg = FileConfig::default();
        cfg.logging.format = Some(LogFormat::Json);
        cfg.admin.no_email = Some(true);

        cfg.save_to_file(&path).unwrap();
        assert_eq!(FileConfig::load_from_file(&path).unwrap(), cfg);
    }
}
