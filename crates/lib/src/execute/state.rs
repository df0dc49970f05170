//! Consolidated local state.
//!
//! Every successful command leaves a marker for its (host, unit) pair. Agent
//! state streams are stored next to the markers, untouched.
//!
//! # Storage Layout
//!
//! ```text
//! state/<host>/
//! ├── <unit>.json
//! └── <deployment id>.remote
//! ```
//!
//! # Example Marker File
//!
//! ```json
//! {
//!   "unit": "app",
//!   "commands": {
//!     "install": "2026-03-01T10:15:00Z",
//!     "start": "2026-03-01T10:16:12Z"
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::LifecycleCommand;

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to read state {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write state {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse state {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),
}

/// Last execution time of every command run for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
  pub unit: String,
  #[serde(default)]
  pub commands: BTreeMap<LifecycleCommand, DateTime<Utc>>,
}

impl UnitState {
  pub fn new(unit: impl Into<String>) -> Self {
    Self {
      unit: unit.into(),
      commands: BTreeMap::new(),
    }
  }

  pub fn executed_at(&self, command: LifecycleCommand) -> Option<DateTime<Utc>> {
    self.commands.get(&command).copied()
  }

  /// The most recently executed command.
  pub fn last(&self) -> Option<(LifecycleCommand, DateTime<Utc>)> {
    self
      .commands
      .iter()
      .max_by_key(|(_, at)| **at)
      .map(|(command, at)| (*command, *at))
  }
}

/// State markers of one deployment, one directory per host.
#[derive(Debug, Clone)]
pub struct StateStore {
  dir: PathBuf,
}

impl StateStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn unit_path(&self, host: &str, unit: &str) -> PathBuf {
    self.dir.join(host).join(format!("{unit}.json"))
  }

  /// Stored state of a unit, `None` when nothing was recorded yet.
  pub fn load(&self, host: &str, unit: &str) -> Result<Option<UnitState>, StateError> {
    let path = self.unit_path(host, unit);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(StateError::Read { path, source: e }),
    };

    let state = serde_json::from_str(&content).map_err(|e| StateError::Parse { path, source: e })?;
    Ok(Some(state))
  }

  /// Record a successful command.
  pub fn record(
    &self,
    host: &str,
    unit: &str,
    command: LifecycleCommand,
    at: DateTime<Utc>,
  ) -> Result<UnitState, StateError> {
    let mut state = self.load(host, unit)?.unwrap_or_else(|| UnitState::new(unit));
    state.commands.insert(command, at);

    let content = serde_json::to_string_pretty(&state).map_err(StateError::Serialize)?;
    write_atomic(&self.unit_path(host, unit), content.as_bytes())?;

    debug!(host, unit, command = %command, "state marker written");
    Ok(state)
  }

  /// Store an agent's state stream for a deployment.
  pub fn merge_remote(&self, host: &str, deployment_id: &str, bytes: &[u8]) -> Result<PathBuf, StateError> {
    let path = self.dir.join(host).join(format!("{deployment_id}.remote"));
    write_atomic(&path, bytes)?;
    info!(host, deployment = deployment_id, size = bytes.len(), "agent state stored");
    Ok(path)
  }
}

/// Write to a temp file next to `path`, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
  let write_err = |e| StateError::Write {
    path: path.to_path_buf(),
    source: e,
  };

  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(write_err)?;
  }
  let mut temp = path.as_os_str().to_owned();
  temp.push(".tmp");
  let temp = PathBuf::from(temp);

  fs::write(&temp, bytes).map_err(write_err)?;
  fs::rename(&temp, path).map_err(write_err)?;
  Ok(())
}
