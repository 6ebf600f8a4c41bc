//! Child process lifecycle and signal handling
//!
//! Every external command (ayum, cvmfs_server, git, rpm, mailx) is spawned in
//! its own process group with a parent-death signal, and its PID is tracked in
//! a global registry. An operator signal does not exit the process directly:
//! it is recorded and turned into cancellation of the run context, which makes
//! in-flight commands kill their process groups and lets the installer unwind
//! through its normal abort path.

use crate::context::RunContext;
use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Registry of running child process groups
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    cleanup_initiated: bool,
}

impl ChildRegistry {
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!(pid, "registered child process");
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!(pid, "unregistered child process");
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// SIGTERM every tracked group, then SIGKILL whatever survives `grace_period`.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            return;
        }

        info!(count = self.pids.len(), "terminating child processes");

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids {
            if let Err(e) = kill_group(pid, Signal::SIGTERM) {
                warn!(pid, error = %e, "failed to SIGTERM process group");
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids {
            if is_process_alive(pid) {
                warn!(pid, "process group ignored SIGTERM, sending SIGKILL");
                let _ = kill_group(pid, Signal::SIGKILL);
            }
        }
        self.pids.clear();
    }
}

/// Signal a whole process group (negative PID).
pub fn kill_group(pgid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

/// True if the process exists and is neither dead nor a zombie
pub fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// Last operator signal received (0 when none)
static TRAPPED_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// The signal that cancelled the run, if any.
pub fn trapped_signal() -> Option<i32> {
    match TRAPPED_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        sig => Some(sig),
    }
}

/// Human-readable name for the signals we trap
pub fn signal_name(sig: i32) -> &'static str {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    match sig {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        SIGHUP => "SIGHUP",
        _ => "UNKNOWN",
    }
}

/// Route SIGINT, SIGTERM and SIGHUP into cancellation of `ctx`.
///
/// Call once at start-up with the root run context.
pub fn trap_signals(ctx: RunContext) -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            info!(signal = signal_name(sig), "signal trapped, cancelling install");
            TRAPPED_SIGNAL.store(sig, Ordering::SeqCst);
            ctx.cancel();
        }
    });

    Ok(())
}

/// Put a `Command` into its own process group, tied to our lifetime
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                // Die with the installer rather than keep mutating the target.
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
