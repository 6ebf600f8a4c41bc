//! Install orchestrator
//!
//! Sequences one nightly install:
//!
//! 1. open the storage transaction
//! 2. resolve the packages to install and split them into groups
//! 3. download and configure ayum
//! 4. install each group, clean up and record it in the tags file
//! 5. copy the ayum log next to the install and close or abort the transaction
//!
//! Steps 2 to 4 run on a worker thread racing against the run context. When
//! the context finishes first the run is marked aborted, but the worker is
//! still waited for so the transaction is always ended.

use crate::ayum::PackageManager;
use crate::completion::Completion;
use crate::config::Config;
use crate::context::RunContext;
use crate::error::{ErrorList, InstallError};
use crate::install_state::{InstallStage, InstallTracker};
use crate::ledger::{Ledger, TagEntry};
use crate::package::PackageSet;
use crate::repos::{self, NIGHTLY_REPO_LABEL};
use crate::resolver::{FinderError, PackageFinder};
use crate::transaction::Transactioner;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

/// Budget for ending the transaction once the run context is already done
pub const FINALIZE_TIMEOUT: Duration = Duration::from_secs(300);

/// Branches whose subsystem directories are purged after installing
const MASTER_BRANCHES: [&str; 2] = ["master", "master-GAUDI"];
const MASTER_SUBSYSTEM_DIRS: [&str; 3] = ["tdaq", "tdaq-common", "dqm-common"];
const YUM_CACHE_DIR: &str = ".yumcache";

/// Tags file entries matching these are dropped before saving
const LEDGER_IGNORE: [&str; 2] = [".cvmfscatalog", ".ayum.log"];

const WAIT_POLL: Duration = Duration::from_millis(100);

/// Result of one run
#[derive(Debug)]
pub struct InstallReport {
    pub errors: ErrorList,
    /// The run context finished before the install did, or the
    /// transaction never opened
    pub aborted: bool,
    pub stage: InstallStage,
    pub failed_at: Option<InstallStage>,
    pub duration: Duration,
}

impl InstallReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Installer {
    config: Config,
    transaction: Box<dyn Transactioner>,
    ayum: Box<dyn PackageManager>,
    finder: Box<dyn PackageFinder>,
    ledger: Box<dyn Ledger>,
    tracker: Mutex<InstallTracker>,
    done: Arc<Completion>,
}

impl Installer {
    pub fn new(
        config: Config,
        transaction: Box<dyn Transactioner>,
        ayum: Box<dyn PackageManager>,
        finder: Box<dyn PackageFinder>,
        ledger: Box<dyn Ledger>,
    ) -> Self {
        Self {
            config,
            transaction,
            ayum,
            finder,
            ledger,
            tracker: Mutex::new(InstallTracker::new()),
            done: Arc::new(Completion::new()),
        }
    }

    pub fn nightly_id(&self) -> String {
        self.config.request.nightly_id()
    }

    pub fn nightly_install_dir(&self) -> PathBuf {
        self.config.request.nightly_install_dir()
    }

    /// Signalled once the run has ended the transaction
    pub fn completion(&self) -> Arc<Completion> {
        Arc::clone(&self.done)
    }

    pub fn stage(&self) -> InstallStage {
        lock(&self.tracker).current_stage()
    }

    /// Run the install under `ctx`.
    pub fn execute(&mut self, ctx: &RunContext) -> InstallReport {
        let started = Instant::now();
        let span = info_span!("install", nightly = %self.nightly_id());
        let _enter = span.enter();

        let mut errors = ErrorList::new();

        advance(&self.tracker, InstallStage::TransactionOpen);
        if let Err(e) = self.transaction.open(ctx) {
            match e.cancellation() {
                Some(c) => info!(reason = %c, "context done, transaction open abandoned"),
                None => error!(error = %e, "unable to open file system transaction"),
            }
            errors.push(InstallError::TransactionOpen(e));
            let _ = lock(&self.tracker).abort();
            self.done.signal();
            return self.report(errors, true, started);
        }
        info!("transaction open");

        let unit = Unit {
            config: &self.config,
            ayum: self.ayum.as_ref(),
            finder: self.finder.as_ref(),
            ledger: self.ledger.as_mut(),
            tracker: &self.tracker,
        };
        let (worker_errors, aborted) = run_unit(ctx, unit, &span);
        errors.extend(worker_errors);

        let fin_ctx = if ctx.is_done() {
            warn!(
                timeout_secs = FINALIZE_TIMEOUT.as_secs(),
                "run context done, ending transaction under a fresh deadline"
            );
            RunContext::background().with_timeout(FINALIZE_TIMEOUT)
        } else {
            ctx.clone()
        };

        {
            let mut tracker = lock(&self.tracker);
            if tracker.current_stage() != InstallStage::Finalizing {
                let _ = tracker.finalize_early();
            }
        }

        if let Err(e) = self.copy_ayum_log() {
            warn!(error = %e, "ayum log not copied");
            errors.push(e);
        }
        self.end_transaction(&fin_ctx, &mut errors);

        self.done.signal();
        self.report(errors, aborted, started)
    }

    fn report(&self, errors: ErrorList, aborted: bool, started: Instant) -> InstallReport {
        let tracker = lock(&self.tracker);
        let report = InstallReport {
            errors,
            aborted,
            stage: tracker.current_stage(),
            failed_at: tracker.failed_at(),
            duration: started.elapsed(),
        };
        info!(
            stage = %report.stage,
            errors = report.errors.len(),
            aborted = report.aborted,
            secs = report.duration.as_secs(),
            "install finished"
        );
        report
    }

    /// Abort when any error remains, unless the only one is the log copy.
    fn end_transaction(&mut self, ctx: &RunContext, errors: &mut ErrorList) {
        let should_abort = !errors.is_empty() && !errors.is_only_log_copy_failure();

        if should_abort {
            info!(errors = errors.len(), "aborting transaction");
            if let Err(e) = self.transaction.abort(ctx) {
                error!(error = %e, "transaction abort failed");
                errors.push(InstallError::TransactionAbort(e));
            }
            let _ = lock(&self.tracker).abort();
            return;
        }

        info!("closing transaction");
        match self.transaction.close(ctx) {
            Ok(()) => {
                let _ = lock(&self.tracker).complete();
            }
            Err(e) => {
                error!(error = %e, "transaction close failed");
                errors.push(InstallError::TransactionClose(e));
                let _ = lock(&self.tracker).abort();
            }
        }
    }

    fn copy_ayum_log(&self) -> Result<(), InstallError> {
        let src = self.ayum.log_path();
        let dir = self.nightly_install_dir();

        std::fs::create_dir_all(&dir).map_err(|e| {
            InstallError::CopyLog(format!("cannot create directory {} ({})", dir.display(), e))
        })?;

        let name = src.file_name().unwrap_or_else(|| "ayum.log".as_ref());
        std::fs::copy(src, dir.join(name)).map_err(|e| {
            InstallError::CopyLog(format!(
                "cannot copy ayum log ({}) to directory {} ({})",
                src.display(),
                dir.display(),
                e
            ))
        })?;
        debug!(dir = %dir.display(), "ayum log copied");
        Ok(())
    }
}

fn lock(tracker: &Mutex<InstallTracker>) -> MutexGuard<'_, InstallTracker> {
    tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn advance(tracker: &Mutex<InstallTracker>, stage: InstallStage) {
    if let Err(e) = lock(tracker).transition_to(stage) {
        warn!(error = %e, "unexpected stage transition");
    }
}

fn finalize_early(tracker: &Mutex<InstallTracker>) {
    if let Err(e) = lock(tracker).finalize_early() {
        warn!(error = %e, "unexpected stage transition");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `unit` on a scoped worker and wait for it or for `ctx`.
///
/// Returns the worker's errors and whether `ctx` finished first.
fn run_unit(ctx: &RunContext, unit: Unit<'_>, span: &tracing::Span) -> (ErrorList, bool) {
    let finished = Completion::new();
    let mut interrupted = false;

    let errors = thread::scope(|s| {
        let worker_ctx = ctx.clone();
        let finished = &finished;
        let handle = s.spawn(move || {
            let result = span.in_scope(|| {
                panic::catch_unwind(AssertUnwindSafe(move || unit.do_install(&worker_ctx)))
            });
            finished.signal();
            result
        });

        loop {
            if finished.wait_timeout(WAIT_POLL) {
                break;
            }
            if ctx.is_done() {
                warn!(reason = ?ctx.err(), "context done, waiting for install to unwind");
                interrupted = true;
                finished.wait();
                break;
            }
        }

        match handle.join() {
            Ok(Ok(errors)) => errors,
            Ok(Err(payload)) | Err(payload) => {
                let msg = panic_message(payload);
                error!(panic = %msg, "recovered from panic in install");
                ErrorList::from(InstallError::Panic(msg))
            }
        }
    });

    (errors, interrupted)
}

/// The part of a run between opening and ending the transaction
struct Unit<'a> {
    config: &'a Config,
    ayum: &'a dyn PackageManager,
    finder: &'a dyn PackageFinder,
    ledger: &'a mut dyn Ledger,
    tracker: &'a Mutex<InstallTracker>,
}

impl Unit<'_> {
    fn do_install(mut self, ctx: &RunContext) -> ErrorList {
        let mut errors = ErrorList::new();

        advance(self.tracker, InstallStage::Resolving);
        let groups = match self.resolve(ctx) {
            Ok(groups) => groups,
            Err(e) => {
                error!(error = %e, "package resolution failed");
                errors.push(e);
                finalize_early(self.tracker);
                return errors;
            }
        };

        advance(self.tracker, InstallStage::Preparing);
        if let Err(e) = self.prepare(ctx) {
            error!(error = %e, "ayum preparation failed");
            errors.push(e);
            finalize_early(self.tracker);
            return errors;
        }

        advance(self.tracker, InstallStage::Installing);
        let attempted = groups.len();
        let mut failures = ErrorList::new();
        let mut cancelled = None;

        for (i, group) in groups.iter().enumerate() {
            info!(group = i + 1, of = attempted, packages = group.len(), "installing group");
            if let Err(e) = self.install_group(ctx, group) {
                error!(group = i + 1, error = %e, "group install failed");
                failures.push(e);
            }

            if let Some(err) = ctx.err() {
                cancelled = Some(err);
                break;
            }
        }

        let failed = failures.len();
        errors.extend(failures);

        if let Some(err) = cancelled {
            errors.push(err);
            finalize_early(self.tracker);
            return errors;
        }

        if failed > 0 && failed == attempted {
            warn!("no group installed, cleaning up");
            if let Err(e) = self.clean_dirs(ctx) {
                errors.push(e);
            }
        }

        if failed > 0 {
            finalize_early(self.tracker);
        } else {
            advance(self.tracker, InstallStage::Finalizing);
        }
        errors
    }

    fn resolve(&self, ctx: &RunContext) -> Result<Vec<PackageSet>, InstallError> {
        if let Some(err) = ctx.err() {
            return Err(FinderError::Cancelled(err).into());
        }

        let request = &self.config.request;
        let packages = self
            .finder
            .find(ctx, &request.project, &request.platform.to_string())?;

        let groups = packages.into_groups(request.is_cache_nightly());
        info!(
            groups = groups.len(),
            packages = groups.iter().map(PackageSet::len).sum::<usize>(),
            "packages resolved"
        );
        Ok(groups)
    }

    /// Download, seed, register sources, configure and clean, stopping at the first failure.
    fn prepare(&self, ctx: &RunContext) -> Result<(), InstallError> {
        let request = &self.config.request;

        self.ayum.download(ctx)?;
        self.ayum.pre_configure(&request.stable_releases_dir)?;
        self.ayum.add_remote_repos(&repos::default_repos(
            &request.install_base,
            self.finder.src_dir(),
            &request.nightly_install_dir(),
        ))?;
        self.ayum.configure(ctx)?;
        self.ayum.clean_all(ctx, NIGHTLY_REPO_LABEL)?;
        Ok(())
    }

    fn install_group(&mut self, ctx: &RunContext, group: &PackageSet) -> Result<(), InstallError> {
        self.ayum.install(ctx, &group.names())?;
        self.clean_dirs(ctx)?;
        self.ayum.clean_all(ctx, NIGHTLY_REPO_LABEL)?;
        self.update_ledger()
    }

    /// Remove the yum cache, plus the subsystem dirs on master branches.
    fn clean_dirs(&self, ctx: &RunContext) -> Result<(), InstallError> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let request = &self.config.request;
        let base = request.nightly_base();

        let mut dirs = vec![base.join(YUM_CACHE_DIR)];
        if MASTER_BRANCHES.contains(&request.branch.as_str()) {
            dirs.extend(MASTER_SUBSYSTEM_DIRS.iter().map(|d| base.join(d)));
        }

        let mut first_err = None;
        for dir in dirs {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!(dir = %dir.display(), "removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    warn!(dir = %dir.display(), error = %source, "unable to remove");
                    first_err.get_or_insert(InstallError::CleanDirs { path: dir, source });
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn update_ledger(&mut self) -> Result<(), InstallError> {
        let request = &self.config.request;
        let nightly_dir = request.nightly_install_dir();
        info!(tags_file = %self.ledger.src().display(), "writing tags file");

        let projects = sub_dirs(&nightly_dir)?;
        let project_dir = nightly_dir.join(&request.project);
        let releases = sub_dirs(&project_dir)?;
        let [next_release] = releases.as_slice() else {
            return Err(InstallError::InstallDir(format!(
                "expected project dir {} to contain a single subdir, found {}",
                project_dir.display(),
                releases.len()
            )));
        };

        let platform = request.platform.to_string();
        let entries = projects
            .iter()
            .map(|project| {
                TagEntry::nightly(
                    &request.branch,
                    &request.timestamp,
                    project,
                    next_release,
                    &platform,
                    self.config.tags_separator,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.ledger.append(entries)?;
        self.ledger.remove(&LEDGER_IGNORE)?;
        self.ledger.save()?;
        Ok(())
    }
}

/// Sorted names of the non-hidden directories below `dir`
fn sub_dirs(dir: &Path) -> Result<Vec<String>, InstallError> {
    let listing_err =
        |e: std::io::Error| InstallError::InstallDir(format!("failed to list sub-dirs of {} ({})", dir.display(), e));

    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(listing_err)? {
        let entry = entry.map_err(listing_err)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}
