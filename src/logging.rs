//! Log set-up
//!
//! The main log goes to `<logs dir>/<name>.log` when a file name template is
//! configured, otherwise to stderr. ayum output always goes to its own file.

use crate::config::{Config, InstallRequest, LoggingConfig};
use crate::types::LogFormat;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Where the main and the ayum logs are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    /// `None` logs to stderr
    pub main: Option<PathBuf>,
    pub ayum: PathBuf,
}

/// Replace `%branch`, `%platform`, `%project`, `%timestamp` and `%start` in `template`.
pub fn expand_log_name(template: &str, request: &InstallRequest, start_epoch: i64) -> String {
    let platform = request.platform.to_string();
    let start = start_epoch.to_string();
    [
        ("%branch", request.branch.as_str()),
        ("%platform", platform.as_str()),
        ("%project", request.project.as_str()),
        ("%timestamp", request.timestamp.as_str()),
        ("%start", start.as_str()),
    ]
    .into_iter()
    .fold(template.to_string(), |name, (marker, value)| name.replace(marker, value))
    .trim()
    .to_string()
}

pub fn log_paths(config: &Config, start_epoch: i64) -> LogPaths {
    let name = config
        .logging
        .file
        .as_deref()
        .map(|tpl| expand_log_name(tpl, &config.request, start_epoch))
        .filter(|name| !name.is_empty());

    match name {
        Some(name) => LogPaths {
            main: Some(config.logging.dir.join(format!("{}.log", name))),
            ayum: config.logging.dir.join(format!("{}.ayum.log", name)),
        },
        None => LogPaths {
            main: None,
            ayum: config.request.work_base.join("ayum.log"),
        },
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(logging: &LoggingConfig, main: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("invalid log level {:?}", logging.level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let result = match (main, logging.format) {
        (Some(path), format) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            match format {
                LogFormat::Json => builder.json().try_init(),
                LogFormat::Text => builder.try_init(),
            }
        }
        (None, LogFormat::Json) => builder.json().with_writer(std::io::stderr).try_init(),
        (None, LogFormat::Text) => builder.with_writer(std::io::stderr).try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("failed to initialise logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::config_file::FileConfig;
    use chrono::{Local, TimeZone};

    fn config(log_file: Option<&str>) -> Config {
        let cli = Cli {
            release: Some("master/x86_64-centos7-gcc8-opt/2024-01-01T0200".into()),
            project: Some("Athena".into()),
            work_dir: Some("/work".into()),
            log_file: log_file.map(String::from),
            ..Cli::default()
        };
        let now = Local.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        Config::resolve(&cli, &FileConfig::default(), None, now).unwrap()
    }

    #[test]
    fn test_expand_log_name() {
        let cfg = config(None);
        let name = expand_log_name(" %branch__%project__%platform__%timestamp__%start ", &cfg.request, 1700);
        assert_eq!(name, "master__Athena__x86_64-centos7-gcc8-opt__2024-01-01T0200__1700");
    }

    #[test]
    fn test_log_paths_with_template() {
        let cfg = config(Some("%project-%start"));
        let paths = log_paths(&cfg, 5);
        assert_eq!(paths.main, Some(PathBuf::from("/work/logs/Athena-5.log")));
        assert_eq!(paths.ayum, PathBuf::from("/work/logs/Athena-5.ayum.log"));
    }

    #[test]
    fn test_log_paths_without_template() {
        let cfg = config(None);
        let paths = log_paths(&cfg, 5);
        assert!(paths.main.is_none());
        assert_eq!(paths.ayum, PathBuf::from("/work/ayum.log"));
    }
}
