//! ayum wrapper tests
//!
//! Commands are answered by a fake runner keyed on the command line, so these
//! check the composed lines and how results are interpreted.

use nightly_installer::ayum::{Ayum, AyumError, AyumSettings, PackageManager};
use nightly_installer::shell::{CommandRunner, Outcome, ShellCommand, ShellOutput};
use nightly_installer::{ContextError, RunContext};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// Fake runner
// =============================================================================

fn output(stdout: &str, stderr: &str, exit_code: i32, outcome: Outcome) -> ShellOutput {
    ShellOutput {
        stdout: stdout.into(),
        stderr: stderr.into(),
        exit_code: Some(exit_code),
        outcome,
        duration: Duration::from_millis(1),
    }
}

/// Answers lines containing a key of `answers` with its output, `list installed`
/// with `listing`, clones with `clone` and anything else with success.
struct FakeShell {
    answers: Vec<(&'static str, ShellOutput)>,
    listing: ShellOutput,
    clone: ShellOutput,
    commands: Mutex<Vec<ShellCommand>>,
}

impl FakeShell {
    fn new(listing: ShellOutput) -> Arc<Self> {
        Self::with_clone(listing, output("", "", 0, Outcome::Exited))
    }

    fn with_clone(listing: ShellOutput, clone: ShellOutput) -> Arc<Self> {
        Arc::new(Self {
            answers: Vec::new(),
            listing,
            clone,
            commands: Mutex::new(Vec::new()),
        })
    }

    fn answering(listing: ShellOutput, answers: Vec<(&'static str, ShellOutput)>) -> Arc<Self> {
        Arc::new(Self {
            answers,
            listing,
            clone: output("", "", 0, Outcome::Exited),
            commands: Mutex::new(Vec::new()),
        })
    }

    fn lines(&self) -> Vec<String> {
        self.commands.lock().unwrap().iter().map(|c| c.line.clone()).collect()
    }

    /// The ayum invocation at the end of each composed line
    fn ayum_calls(&self) -> Vec<String> {
        self.lines()
            .iter()
            .filter_map(|l| l.rsplit(';').next())
            .filter(|l| l.contains("ayum/ayum"))
            .map(|l| l.split_once("ayum/ayum ").map(|(_, args)| args.to_string()).unwrap_or_default())
            .collect()
    }
}

impl CommandRunner for FakeShell {
    fn run(&self, _ctx: &RunContext, cmd: &ShellCommand) -> std::io::Result<ShellOutput> {
        self.commands.lock().unwrap().push(cmd.clone());
        if let Some((_, out)) = self.answers.iter().find(|(key, _)| cmd.line.contains(key)) {
            Ok(out.clone())
        } else if cmd.line.contains("list installed") {
            Ok(self.listing.clone())
        } else if cmd.line.starts_with("git clone") {
            Ok(self.clone.clone())
        } else {
            Ok(output("", "", 0, Outcome::Exited))
        }
    }
}

fn settings(tmp: &TempDir) -> AyumSettings {
    AyumSettings {
        src_repo: "https://gitlab.cern.ch/atlas-sit/ayum.git".into(),
        dir: tmp.path().join("ayum"),
        install_dir: tmp.path().join("sw/21.2_AnalysisBase_x86_64-centos7-gcc8-opt"),
        branch: "21.2".into(),
        download_timeout: Duration::from_secs(60),
        command_timeout: Duration::from_secs(60),
        install_timeout: Duration::from_secs(3600),
        log_path: tmp.path().join("logs/ayum.log"),
    }
}

fn requested(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// install
// =============================================================================

#[test]
fn test_install_splits_reinstall_and_install() {
    let tmp = tempfile::tempdir().unwrap();
    let listing = output(
        "AnalysisBase_1.0_x86_64-centos7-gcc8-opt.noarch 1-1 installed\n",
        "",
        0,
        Outcome::Exited,
    );
    let shell = FakeShell::new(listing);
    let ayum = Ayum::new(settings(&tmp), shell.clone());

    ayum.install(
        &RunContext::background(),
        &requested(&["AnalysisBase_1.0_x86_64-centos7-gcc8-opt.rpm", "dep1.rpm"]),
    )
    .unwrap();

    assert_eq!(
        shell.ayum_calls(),
        vec![
            "-q list installed",
            "-y reinstall AnalysisBase_1.0_x86_64-centos7-gcc8-opt",
            "-y install dep1",
        ]
    );

    let commands = shell.commands.lock().unwrap();
    assert_eq!(commands[1].timeout, Some(Duration::from_secs(3600)));
    assert_eq!(commands[0].timeout, Some(Duration::from_secs(60)));
    assert!(commands[1].line.contains("source ayum/setup.sh"));
}

#[test]
fn test_install_nothing_runs_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = FakeShell::new(output("", "", 0, Outcome::Exited));
    let ayum = Ayum::new(settings(&tmp), shell.clone());

    ayum.install(&RunContext::background(), &[]).unwrap();
    assert!(shell.lines().is_empty());
}

#[test]
fn test_failed_listing_with_identical_streams_means_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let same = "Error: No matching Packages to list\n";
    let shell = FakeShell::new(output(same, same, 1, Outcome::Exited));
    let ayum = Ayum::new(settings(&tmp), shell.clone());

    ayum.install(&RunContext::background(), &requested(&["dep1.rpm"]))
        .unwrap();
    assert_eq!(shell.ayum_calls(), vec!["-q list installed", "-y install dep1"]);
}

#[test]
fn test_failed_listing_with_different_streams_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = FakeShell::new(output("", "rpmdb open failed\n", 1, Outcome::Exited));
    let ayum = Ayum::new(settings(&tmp), shell.clone());

    let err = ayum
        .install(&RunContext::background(), &requested(&["dep1.rpm"]))
        .unwrap_err();
    assert!(matches!(err, AyumError::ListInstalled(_)), "{:?}", err);
    assert_eq!(shell.ayum_calls(), vec!["-q list installed"]);
}

#[test]
fn test_failed_reinstall_skips_install() {
    let tmp = tempfile::tempdir().unwrap();
    let listing = output("AnalysisBase.noarch 1-1 installed\n", "", 0, Outcome::Exited);
    let shell = FakeShell::answering(
        listing,
        vec![("-y reinstall", output("", "Error: boom\n", 1, Outcome::Exited))],
    );
    let ayum = Ayum::new(settings(&tmp), shell.clone());

    let err = ayum
        .install(&RunContext::background(), &requested(&["AnalysisBase.rpm", "dep1.rpm"]))
        .unwrap_err();

    match err {
        AyumError::Command { command, reason } => {
            assert_eq!(command, "reinstall");
            assert!(reason.contains("exit code 1"), "{}", reason);
            assert!(reason.contains("boom"), "{}", reason);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        shell.ayum_calls(),
        vec!["-q list installed", "-y reinstall AnalysisBase"]
    );
}

#[test]
fn test_install_timeout_is_a_command_error() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = FakeShell::answering(
        output("", "", 0, Outcome::Exited),
        vec![("-y install", output("", "", -1, Outcome::TimedOut))],
    );
    let ayum = Ayum::new(settings(&tmp), shell.clone());

    let err = ayum
        .install(&RunContext::background(), &requested(&["dep1.rpm"]))
        .unwrap_err();

    assert!(
        matches!(&err, AyumError::Command { command, reason } if command == "install" && reason.contains("timed out")),
        "{:?}",
        err
    );
    assert!(!err.is_cancellation());
    assert_eq!(shell.ayum_calls(), vec!["-q list installed", "-y install dep1"]);
}

#[test]
fn test_commands_are_logged() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = FakeShell::new(output("", "", 0, Outcome::Exited));
    let ayum = Ayum::new(settings(&tmp), shell);

    ayum.clean_all(&RunContext::background(), "atlas-offline-nightly")
        .unwrap();

    let log = std::fs::read_to_string(ayum.log_path()).unwrap();
    assert!(log.contains("clean all"));
    assert!(log.contains("atlas-offline-nightly"));
}

// =============================================================================
// download
// =============================================================================

#[test]
fn test_download_replaces_checkout() {
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(&tmp);
    std::fs::create_dir_all(s.dir.join("stale")).unwrap();
    let shell = FakeShell::new(output("", "", 0, Outcome::Exited));
    let ayum = Ayum::new(s.clone(), shell.clone());

    ayum.download(&RunContext::background()).unwrap();

    assert!(!s.dir.exists());
    let lines = shell.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("git clone --quiet "));
    assert!(lines[0].contains("gitlab.cern.ch/atlas-sit/ayum.git"));
}

#[test]
fn test_download_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = FakeShell::with_clone(
        output("", "", 0, Outcome::Exited),
        output("", "", -1, Outcome::TimedOut),
    );
    let ayum = Ayum::new(settings(&tmp), shell);

    match ayum.download(&RunContext::background()) {
        Err(AyumError::DownloadTimedOut(limit)) => assert_eq!(limit, Duration::from_secs(60)),
        other => panic!("unexpected {:?}", other),
    }
}

// =============================================================================
// configure
// =============================================================================

#[test]
fn test_add_remote_repos_writes_descriptors() {
    let tmp = tempfile::tempdir().unwrap();
    let ayum = Ayum::new(settings(&tmp), FakeShell::new(output("", "", 0, Outcome::Exited)));

    let repos = nightly_installer::repos::default_repos(
        Path::new("/cvmfs/atlas-nightlies.cern.ch/repo/sw"),
        Path::new("/eos/rpms"),
        Path::new("/cvmfs/atlas-nightlies.cern.ch/repo/sw/21.2/2024-01-01T0200"),
    );
    ayum.add_remote_repos(&repos).unwrap();

    let files: Vec<_> = std::fs::read_dir(ayum.repos_dir()).unwrap().collect();
    assert_eq!(files.len(), repos.len());
}

#[test]
fn test_configure_writes_yum_conf_without_noise() {
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(&tmp);
    std::fs::create_dir_all(&s.dir).unwrap();
    let stdout = "[main]\nAYUM package location: /sw\ncachedir=/sw/.yumcache\n";
    let shell = FakeShell::answering(
        output("", "", 0, Outcome::Exited),
        vec![("configure.ayum", output(stdout, "", 0, Outcome::Exited))],
    );
    let ayum = Ayum::new(s.clone(), shell.clone());

    ayum.configure(&RunContext::background()).unwrap();

    let conf = std::fs::read_to_string(ayum.yum_conf()).unwrap();
    assert_eq!(conf, "[main]\ncachedir=/sw/.yumcache\n");
    let lines = shell.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("configure.ayum"));
    assert!(lines[0].contains("sw/21.2_AnalysisBase_x86_64-centos7-gcc8-opt"));
    assert!(lines[0].contains("-D"), "{}", lines[0]);
}

#[test]
fn test_configure_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(&tmp);
    std::fs::create_dir_all(&s.dir).unwrap();
    let shell = FakeShell::answering(
        output("", "", 0, Outcome::Exited),
        vec![("configure.ayum", output("", "no such repo\n", 1, Outcome::Exited))],
    );
    let ayum = Ayum::new(s, shell);

    match ayum.configure(&RunContext::background()) {
        Err(AyumError::Configure(reason)) => assert!(reason.contains("no such repo"), "{}", reason),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!ayum.yum_conf().exists());
}

#[test]
fn test_configure_cancelled_is_not_a_configure_error() {
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(&tmp);
    std::fs::create_dir_all(&s.dir).unwrap();
    let shell = FakeShell::answering(
        output("", "", 0, Outcome::Exited),
        vec![(
            "configure.ayum",
            output("", "", -1, Outcome::Cancelled(ContextError::Cancelled)),
        )],
    );
    let ayum = Ayum::new(s, shell);

    let err = ayum.configure(&RunContext::background()).unwrap_err();
    assert!(
        matches!(&err, AyumError::Cancelled { command, source: ContextError::Cancelled } if command == "configure"),
        "{:?}",
        err
    );
    assert!(err.is_cancellation());
    assert!(!ayum.yum_conf().exists());
}
