//! Local directories used by the engine.
//!
//! ```text
//! <work root>/deployments/<deployment id>/
//! ├── tmp/
//! ├── state/
//! ├── config/
//! └── logs/
//! <target base>/<deployment id>/
//! ```

use std::path::{Path, PathBuf};

use crate::consts::{APP_NAME, LOCAL_TARGET_DIR_ENV, LOCAL_TARGET_DIR_PROPERTY, WORK_DIR_ENV};
use crate::properties::PropertySource;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var_os("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".cache")))
    .unwrap_or_else(std::env::temp_dir);
  cache_home.join(APP_NAME)
}

/// The work root: `DCC_WORK_DIR`, else the cache directory.
pub fn work_dir() -> PathBuf {
  std::env::var_os(WORK_DIR_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(cache_dir)
}

/// The local target base: the deployment property, else `DCC_LOCAL_TARGET_DIR`.
pub fn local_target_base(deployment: &PropertySource) -> Option<PathBuf> {
  deployment
    .get(LOCAL_TARGET_DIR_PROPERTY)
    .filter(|v| !v.trim().is_empty())
    .map(PathBuf::from)
    .or_else(|| std::env::var_os(LOCAL_TARGET_DIR_ENV).map(PathBuf::from))
}

/// Directories of one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentLayout {
  deployment_id: String,
  root: PathBuf,
  target: Option<PathBuf>,
}

impl DeploymentLayout {
  pub fn new(work_root: &Path, deployment_id: &str, target_base: Option<&Path>) -> Self {
    Self {
      deployment_id: deployment_id.to_string(),
      root: work_root.join("deployments").join(deployment_id),
      target: target_base.map(|base| base.join(deployment_id)),
    }
  }

  pub fn deployment_id(&self) -> &str {
    &self.deployment_id
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn tmp_dir(&self) -> PathBuf {
    self.root.join("tmp")
  }

  pub fn state_dir(&self) -> PathBuf {
    self.root.join("state")
  }

  /// One properties file per (unit, command).
  pub fn config_dir(&self) -> PathBuf {
    self.root.join("config")
  }

  pub fn logs_dir(&self) -> PathBuf {
    self.root.join("logs")
  }

  /// `<target base>/<deployment id>`, when a target base is configured.
  pub fn target_dir(&self) -> Option<&Path> {
    self.target.as_deref()
  }
}
