use super::AyumError;
use crate::config::{base_release, is_cache_branch};
use crate::repos::RemoteRepo;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Line printed by `configure.ayum` that must not end up in `yum.conf`
const NOISE: &str = "AYUM package location";

const PACKAGE_DB: &str = ".rpmdb";

pub(crate) fn filter_noise(text: &str) -> String {
    text.lines()
        .filter(|line| !line.contains(NOISE))
        .map(|line| format!("{}\n", line))
        .collect()
}

/// Copy `<stable>/<major.minor>/.rpmdb` to `<install dir>/.rpmdb` for cache branches.
pub(crate) fn seed_package_database(
    branch: &str,
    stable_releases_dir: &Path,
    install_dir: &Path,
) -> Result<(), AyumError> {
    if !is_cache_branch(branch) {
        return Ok(());
    }

    let stable = stable_releases_dir.join(base_release(branch));
    if !stable.is_dir() {
        return Err(AyumError::StableReleaseMissing(stable));
    }

    let src = stable.join(PACKAGE_DB);
    let dst = install_dir.join(PACKAGE_DB);
    let copy_err = |reason: String| AyumError::CopyDatabase {
        src: src.clone(),
        dst: dst.clone(),
        reason,
    };

    if dst.exists() {
        std::fs::remove_dir_all(&dst).map_err(|e| copy_err(format!("cannot remove old copy: {}", e)))?;
    }

    let mut files = 0usize;
    for entry in WalkDir::new(&src) {
        let entry = entry.map_err(|e| copy_err(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(&src)
            .map_err(|e| copy_err(e.to_string()))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| copy_err(e.to_string()))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| copy_err(e.to_string()))?;
            files += 1;
        }
    }

    info!(src = %src.display(), dst = %dst.display(), files, "seeded package database");
    Ok(())
}

pub(crate) fn write_repo_files(dir: &Path, repos: &[RemoteRepo]) -> Result<(), AyumError> {
    std::fs::create_dir_all(dir).map_err(|source| AyumError::RepoConfig {
        file: dir.display().to_string(),
        source,
    })?;

    for repo in repos {
        let file = repo.file_name();
        std::fs::write(dir.join(&file), repo.to_string())
            .map_err(|source| AyumError::RepoConfig { file: file.clone(), source })?;
        debug!(file = %file, "wrote remote repo");
    }
    Ok(())
}
