//! nightly-installer - main entry point

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use nightly_installer::cli::Cli;
use nightly_installer::config_file::FileConfig;
use nightly_installer::logging::{self, LogPaths};
use nightly_installer::notify::{self, MailNotifier, Report};
use nightly_installer::process_guard::{self, ChildRegistry};
use nightly_installer::shell::{BashRunner, CommandRunner};
use nightly_installer::{
    Ayum, Config, Installer, LocalFinder, RpmQuery, RunContext, TagLedger, transaction,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
enum ExitCode {
    Ok = 0,
    ParserError = 1,
    PreInstallError = 2,
    InstallerError = 3,
    SignalEvent = 4,
}

/// Grace period for child process groups still alive at exit
const CHILD_GRACE: Duration = Duration::from_secs(2);

fn main() {
    std::process::exit(run() as i32);
}

fn run() -> ExitCode {
    let started = Instant::now();
    let start_epoch = Local::now().timestamp();
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => match FileConfig::load_from_file(path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("[ERROR] {:#}", e);
                return ExitCode::ParserError;
            }
        },
        None => FileConfig::default(),
    };

    let home = std::env::var_os("HOME").map(PathBuf::from);
    let config = match Config::resolve(&cli, &file, home.as_deref(), Local::now()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] error parsing configuration: {}", e);
            return ExitCode::ParserError;
        }
    };

    let paths = logging::log_paths(&config, start_epoch);
    if let Err(e) = logging::init_logging(&config.logging, paths.main.as_deref()) {
        eprintln!("[ERROR] unable to configure logging: {:#}", e);
        return ExitCode::ParserError;
    }
    debug!("\n--- Configuration Dump ---\n\n{}\n", config);

    let root = RunContext::background();
    let ctx = match config.timeout {
        Some(limit) => root.with_timeout(limit),
        None => root.with_cancel(),
    };
    if let Err(e) = process_guard::trap_signals(root.clone()) {
        warn!(error = %e, "unable to trap signals");
    }

    let code = match install(&config, &paths, &ctx) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "pre-install set-up failed");
            ExitCode::PreInstallError
        }
    };

    match ChildRegistry::global().lock() {
        Ok(mut registry) => registry.terminate_all(CHILD_GRACE),
        Err(poisoned) => poisoned.into_inner().terminate_all(CHILD_GRACE),
    }

    debug!(secs = started.elapsed().as_secs_f64(), "execution time");
    code
}

fn install(config: &Config, paths: &LogPaths, ctx: &RunContext) -> Result<ExitCode> {
    // editable copy of the tags file, removed on exit
    let tags_dir = tempfile::Builder::new()
        .prefix("AMITags")
        .tempdir()
        .context("failed to create temporary directory for the tags file")?;

    if let Some(dir) = paths.ayum.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create ayum log directory {}", dir.display()))?;
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(BashRunner);
    let request = &config.request;

    let transaction = transaction::for_install_base(
        &request.install_base,
        &config.transaction_settings(),
        Arc::clone(&runner),
    );
    let ayum = Ayum::new(config.ayum_settings(paths.ayum.clone()), Arc::clone(&runner));
    let finder = LocalFinder::new(
        request.rpm_src_dir.clone(),
        Box::new(RpmQuery::new(Arc::clone(&runner))),
    );
    let ledger = TagLedger::new(&request.tags_file, tags_dir.path(), config.tags_separator);

    let mut installer = Installer::new(
        config.clone(),
        transaction,
        Box::new(ayum),
        Box::new(finder),
        Box::new(ledger),
    );

    info!(release = %request.release(), project = %request.project, "starting install");
    let report = installer.execute(ctx);

    let notifier = MailNotifier::new(&config.admin.email_from, &config.admin.emails, runner);
    // the run context may be cancelled by now
    let notify_ctx = RunContext::background();
    let email = config.admin.send_email && !config.admin.emails.is_empty();

    if let Some(sig) = process_guard::trapped_signal() {
        let name = process_guard::signal_name(sig);
        error!(signal = name, "install aborted by signal");
        if email {
            info!("email requested on failure, sending");
            let report = Report::aborted(
                &installer.nightly_id(),
                std::process::id(),
                name,
                paths.main.as_deref(),
            );
            notify::send_report(&notifier, &notify_ctx, &report);
        }
        return Ok(ExitCode::SignalEvent);
    }

    if report.is_ok() {
        info!("Install OK");
        return Ok(ExitCode::Ok);
    }

    error!(aborted = report.aborted, failed_at = ?report.failed_at, "Install FAIL");
    for err in report.errors.iter() {
        error!("{}", err);
    }

    if email {
        info!("email requested on failure, sending");
        let failure = Report::failure(&installer.nightly_id(), &report.errors);
        notify::send_report(&notifier, &notify_ctx, &failure);
    } else if config.admin.send_email {
        info!("no email recipients configured, not sending");
    }

    Ok(ExitCode::InstallerError)
}
