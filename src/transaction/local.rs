use super::{BackendError, StorageBackend};
use crate::context::RunContext;
use std::path::{Path, PathBuf};
use tracing::info;

/// Plain directory target with no publish step
#[derive(Debug, Clone)]
pub struct LocalBackend {
    install_base: PathBuf,
}

impl LocalBackend {
    pub fn new(install_base: &Path) -> Self {
        Self {
            install_base: install_base.to_path_buf(),
        }
    }
}

impl StorageBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn begin(&mut self, ctx: &RunContext) -> Result<(), BackendError> {
        if let Some(err) = ctx.err() {
            return Err(BackendError::Cancelled(err));
        }
        std::fs::create_dir_all(&self.install_base).map_err(|e| {
            BackendError::Failed(format!(
                "cannot create install base {}: {}",
                self.install_base.display(),
                e
            ))
        })?;
        info!(path = %self.install_base.display(), "using local install base");
        Ok(())
    }

    fn publish(&mut self, _ctx: &RunContext) -> Result<(), BackendError> {
        Ok(())
    }

    fn discard(&mut self, _ctx: &RunContext) -> Result<(), BackendError> {
        Ok(())
    }
}
