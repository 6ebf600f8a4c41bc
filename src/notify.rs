//! Failure notifications
//!
//! Reports are mailed with `mailx`; the body is passed on stdin.

use crate::context::RunContext;
use crate::error::ErrorList;
use crate::shell::{self, CommandRunner, ShellCommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

pub const MAILX: &str = "/bin/mailx";
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("no recipients configured")]
    NoRecipients,

    #[error("mail command failed: {0}")]
    Send(String),

    #[error("unable to run mail command: {0}")]
    Io(#[from] std::io::Error),
}

/// Subject and body of a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub subject: String,
    pub body: String,
}

impl Report {
    pub fn failure(nightly_id: &str, errors: &ErrorList) -> Self {
        Self {
            subject: format!("FAILED: nightly install {}", nightly_id),
            body: format!(
                "The installation for nightly:\n\t{}\nfailed. {} error(s) reported:\n\n{}\n",
                nightly_id,
                errors.len(),
                errors
            ),
        }
    }

    pub fn aborted(nightly_id: &str, pid: u32, signal: &str, log_file: Option<&Path>) -> Self {
        let log = log_file
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(stderr)".to_string());
        Self {
            subject: format!("ABORTED: nightly install {}", nightly_id),
            body: format!(
                "The install process with PID {} was terminated (signal {} was trapped)\n\
                 The nightly:\n\t{}\nwas thus not installed.\n\n\
                 Full output available in the log file:\n{}\n",
                pid, signal, nightly_id, log
            ),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, ctx: &RunContext, report: &Report) -> Result<(), NotifyError>;
}

pub struct MailNotifier {
    exe: String,
    from: String,
    to: Vec<String>,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl MailNotifier {
    pub fn new(from: &str, to: &[String], runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            exe: MAILX.to_string(),
            from: from.trim().to_string(),
            to: to.iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect(),
            timeout: SEND_TIMEOUT,
            runner,
        }
    }

    pub fn with_exe(mut self, exe: impl Into<String>) -> Self {
        self.exe = exe.into();
        self
    }

    fn command(&self, report: &Report) -> ShellCommand {
        let mut words = vec![
            self.exe.as_str(),
            "-r",
            self.from.as_str(),
            "-s",
            report.subject.as_str(),
        ];
        words.extend(self.to.iter().map(String::as_str));
        ShellCommand::new(shell::join(words))
            .timeout(self.timeout)
            .stdin(report.body.clone())
    }
}

impl Notifier for MailNotifier {
    fn notify(&self, ctx: &RunContext, report: &Report) -> Result<(), NotifyError> {
        if self.to.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let out = self.runner.run(ctx, &self.command(report))?;
        if !out.success() {
            return Err(NotifyError::Send(out.describe_failure()));
        }
        info!(subject = %report.subject, recipients = self.to.len(), "notification sent");
        Ok(())
    }
}

/// Send a report, logging rather than returning any failure.
pub fn send_report(notifier: &dyn Notifier, ctx: &RunContext, report: &Report) {
    if let Err(e) = notifier.notify(ctx, report) {
        error!(error = %e, subject = %report.subject, "failed to send notification");
    }
}
