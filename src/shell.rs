//! Shell command execution under a run context
//!
//! All external tools are driven through `run_shell`, which is the only place
//! that spawns processes. Commands run as `bash -c <line>` so that the ayum
//! environment set-up (`cd`, `source setup.sh`) and the tool invocation are one
//! composed command line.
//!
//! # Guarantees
//!
//! - The child runs in its own process group and is registered with the
//!   global `ChildRegistry` while alive.
//! - stdout and stderr are drained on helper threads so a chatty command can
//!   never block on a full pipe.
//! - If the context is done or the per-command timeout elapses, the whole
//!   process group is killed and the outcome says which of the two happened.

use crate::context::{ContextError, RunContext};
use crate::process_guard::{ChildRegistry, CommandProcessGroup, kill_group};
use nix::sys::signal::Signal;
use std::borrow::Cow;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A composed shell command line with its execution limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub line: String,
    pub timeout: Option<Duration>,
    pub stdin: Option<String>,
}

impl ShellCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            timeout: None,
            stdin: None,
        }
    }

    /// Join several commands with `;` into one line.
    pub fn sequence<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let line = parts
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(";");
        Self::new(line)
    }

    /// A zero timeout means unbounded.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// How a command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Ran to completion (any exit status)
    Exited,
    /// Killed after exceeding its own timeout
    TimedOut,
    /// Killed because the run context finished first
    Cancelled(ContextError),
}

/// Captured result of a shell command.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    pub outcome: Outcome,
    pub duration: Duration,
}

impl ShellOutput {
    /// Completed with exit status 0
    pub fn success(&self) -> bool {
        self.outcome == Outcome::Exited && self.exit_code == Some(0)
    }

    pub fn timed_out(&self) -> bool {
        self.outcome == Outcome::TimedOut
    }

    pub fn cancelled(&self) -> Option<ContextError> {
        match self.outcome {
            Outcome::Cancelled(err) => Some(err),
            _ => None,
        }
    }

    /// Short human description of a failed run
    pub fn describe_failure(&self) -> String {
        match self.outcome {
            Outcome::TimedOut => "timed out".to_string(),
            Outcome::Cancelled(err) => format!("aborted ({})", err),
            Outcome::Exited => match self.exit_code {
                Some(code) => format!("exit code {}", code),
                None => "killed by signal".to_string(),
            },
        }
    }

    /// Last non-empty stderr lines, for error messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self
            .stderr
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Executes shell commands; the seam used to fake external tools in tests.
pub trait CommandRunner: Send + Sync {
    fn run(&self, ctx: &RunContext, cmd: &ShellCommand) -> std::io::Result<ShellOutput>;
}

/// Runs commands with `bash -c`
#[derive(Debug, Default, Clone, Copy)]
pub struct BashRunner;

impl CommandRunner for BashRunner {
    fn run(&self, ctx: &RunContext, cmd: &ShellCommand) -> std::io::Result<ShellOutput> {
        run_shell(ctx, cmd)
    }
}

/// Spawn `bash -c <line>` and wait for it under `ctx` and the command timeout.
pub fn run_shell(ctx: &RunContext, cmd: &ShellCommand) -> std::io::Result<ShellOutput> {
    let start = Instant::now();

    if let Some(err) = ctx.err() {
        return Ok(ShellOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            outcome: Outcome::Cancelled(err),
            duration: Duration::ZERO,
        });
    }

    debug!(command = %cmd.line, timeout = ?cmd.timeout, "running shell command");

    let mut child = Command::new("bash")
        .arg("-c")
        .arg(&cmd.line)
        .stdin(if cmd.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group()
        .spawn()?;
    let pid = child.id();
    let mut registration = Registration::new(pid, ChildRegistry::global());

    if let (Some(input), Some(mut pipe)) = (cmd.stdin.clone(), child.stdin.take()) {
        thread::spawn(move || {
            let _ = pipe.write_all(input.as_bytes());
        });
    }

    let stdout_reader = child.stdout.take().map(drain);
    let stderr_reader = child.stderr.take().map(drain);

    let deadline = cmd.timeout.map(|t| start + t);
    let mut outcome = Outcome::Exited;

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                warn!(pid, command = %cmd.line, error = %e, "lost track of shell command, killing it");
                let _ = kill_group(pid, Signal::SIGKILL);
                if child.wait().is_ok() {
                    registration.reaped();
                }
                return Err(e);
            }
        }

        if let Some(err) = ctx.err() {
            outcome = Outcome::Cancelled(err);
        } else if deadline.is_some_and(|d| Instant::now() >= d) {
            outcome = Outcome::TimedOut;
        }

        if outcome != Outcome::Exited {
            warn!(pid, command = %cmd.line, ?outcome, "killing shell command");
            let _ = kill_group(pid, Signal::SIGKILL);
            break child.wait()?;
        }

        thread::sleep(POLL_INTERVAL);
    };

    registration.reaped();
    drop(registration);

    let stdout = stdout_reader.map(collect).unwrap_or_default();
    let stderr = stderr_reader.map(collect).unwrap_or_default();

    Ok(ShellOutput {
        stdout,
        stderr,
        exit_code: status.code(),
        outcome,
        duration: start.elapsed(),
    })
}

/// Keeps a spawned process group in a registry until dropped.
///
/// Dropping a group that was never reaped kills it.
struct Registration {
    pid: u32,
    registry: Arc<Mutex<ChildRegistry>>,
    reaped: bool,
}

impl Registration {
    fn new(pid: u32, registry: Arc<Mutex<ChildRegistry>>) -> Self {
        registry
            .lock()
            .expect("ChildRegistry mutex poisoned")
            .register(pid);
        Self {
            pid,
            registry,
            reaped: false,
        }
    }

    fn reaped(&mut self) {
        self.reaped = true;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = kill_group(self.pid, Signal::SIGKILL);
        }
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .unregister(self.pid);
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Quote one word for inclusion in a bash command line.
pub fn quote(word: &str) -> Cow<'_, str> {
    shlex::try_quote(word).unwrap_or_else(|_| Cow::Owned(word.replace('\0', "")))
}

/// Quote and space-join words.
pub fn join<'a, I>(words: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    words
        .into_iter()
        .map(|w| quote(w).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
