use crate::shell::{ShellCommand, ShellOutput};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Append-only record of every ayum command and its output
pub(crate) struct AyumLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl AyumLog {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: Mutex::new(None),
        }
    }

    pub(crate) fn record(&self, label: &str, cmd: &ShellCommand, result: &std::io::Result<ShellOutput>) {
        let entry = render(label, cmd, result);
        debug!(label, "ayum command finished");

        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if file.is_none() {
            match self.open() {
                Ok(f) => *file = Some(f),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "cannot open ayum log");
                    return;
                }
            }
        }

        if let Some(f) = file.as_mut() {
            if let Err(e) = f.write_all(entry.as_bytes()).and_then(|_| f.flush()) {
                warn!(path = %self.path.display(), error = %e, "cannot write ayum log");
            }
        }
    }

    fn open(&self) -> std::io::Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}

fn render(label: &str, cmd: &ShellCommand, result: &std::io::Result<ShellOutput>) -> String {
    let mut entry = format!(
        "==> [{}] {} {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        label,
        cmd.line
    );

    match result {
        Ok(out) => {
            entry.push_str(&format!(
                "status: {} ({:.1}s)\n",
                if out.success() {
                    "ok".to_string()
                } else {
                    out.describe_failure()
                },
                out.duration.as_secs_f64()
            ));
            for (name, text) in [("stdout", &out.stdout), ("stderr", &out.stderr)] {
                if text.trim().is_empty() {
                    continue;
                }
                entry.push_str(&format!("--- {} ---\n", name));
                entry.push_str(text);
                if !text.ends_with('\n') {
                    entry.push('\n');
                }
            }
        }
        Err(e) => entry.push_str(&format!("status: not started ({})\n", e)),
    }

    entry
}
