use super::{BackendError, StorageBackend};
use crate::context::RunContext;
use crate::shell::{self, CommandRunner, ShellCommand};
use std::sync::Arc;
use tracing::debug;

/// `cvmfs_server` transactions on a single repository
pub struct CvmfsBackend {
    runner: Arc<dyn CommandRunner>,
    exe: String,
    repo: String,
    gateway: Option<String>,
    sudo_user: Option<String>,
}

impl CvmfsBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, exe: &str, repo: &str) -> Self {
        Self {
            runner,
            exe: exe.to_string(),
            repo: repo.to_string(),
            gateway: None,
            sudo_user: None,
        }
    }

    pub fn with_gateway(mut self, gateway: Option<String>) -> Self {
        self.gateway = gateway;
        self
    }

    /// Run `cvmfs_server` as this user through `sudo -u`.
    pub fn with_sudo_user(mut self, user: Option<String>) -> Self {
        self.sudo_user = user;
        self
    }

    pub(crate) fn command_line(&self, args: &[&str]) -> String {
        let mut words: Vec<&str> = Vec::new();
        if let Some(user) = &self.sudo_user {
            words.extend(["sudo", "-u", user.as_str()]);
        }
        words.push(&self.exe);
        words.extend_from_slice(args);
        words.push(&self.repo);
        shell::join(words)
    }

    fn run(&self, ctx: &RunContext, args: &[&str]) -> Result<(), BackendError> {
        let line = self.command_line(args);
        debug!(command = %line, gateway = ?self.gateway, "cvmfs_server");
        let result = self.runner.run(ctx, &ShellCommand::new(line));
        BackendError::check(&format!("{} {}", self.exe, args.join(" ")), result)
    }
}

impl StorageBackend for CvmfsBackend {
    fn name(&self) -> &'static str {
        "cvmfs"
    }

    fn begin(&mut self, ctx: &RunContext) -> Result<(), BackendError> {
        self.run(ctx, &["transaction"])
    }

    fn publish(&mut self, ctx: &RunContext) -> Result<(), BackendError> {
        self.run(ctx, &["publish"])
    }

    fn discard(&mut self, ctx: &RunContext) -> Result<(), BackendError> {
        self.run(ctx, &["abort", "-f"])
    }
}
