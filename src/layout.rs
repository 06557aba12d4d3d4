//! Installation layout.
//!
//! The launcher binary sits at the root of an installation:
//!
//! ```text
//! <root>/
//!   appstart          (this binary)
//!   .env              (optional overrides)
//!   apps/             (backend working directory)
//!     frontend/       (frontend package)
//!   scripts/upgrade   (template upgrade hook)
//! ```

use std::path::{Path, PathBuf};

use crate::envfile::ENV_FILE_NAME;
use crate::errors::LaunchError;

/// Paths of one installation.
#[derive(Debug, Clone)]
pub struct Layout {
    pub root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at the directory holding the running executable.
    pub fn from_current_exe() -> Result<Self, LaunchError> {
        let exe = std::env::current_exe().map_err(LaunchError::Executable)?;
        let root = exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::new(root))
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.root.join("apps")
    }

    pub fn frontend_dir(&self) -> PathBuf {
        self.apps_dir().join("frontend")
    }

    pub fn env_file(&self) -> PathBuf {
        self.root.join(ENV_FILE_NAME)
    }

    pub fn upgrade_script(&self) -> PathBuf {
        let name = if cfg!(windows) { "upgrade.cmd" } else { "upgrade" };
        self.root.join("scripts").join(name)
    }

    /// Fails when `apps/` is missing.
    pub fn validate(&self) -> Result<(), LaunchError> {
        require_dir("apps", self.apps_dir())
    }

    /// Fails when `apps/frontend/` is missing.
    pub fn require_frontend(&self) -> Result<PathBuf, LaunchError> {
        let dir = self.frontend_dir();
        require_dir("frontend", dir.clone())?;
        Ok(dir)
    }
}

fn require_dir(what: &'static str, path: PathBuf) -> Result<(), LaunchError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(LaunchError::MissingDirectory { what, path })
    }
}
