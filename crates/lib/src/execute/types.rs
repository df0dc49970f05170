//! Types for command execution.
//!
//! This module defines the error types, the run report, and the
//! configuration for dispatching lifecycle commands to hosts.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ConfigError;
use crate::model::LifecycleCommand;
use crate::platform::paths::work_dir;

use super::state::StateError;

/// Errors that can occur while talking to hosts.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  /// The agent could not be reached or the request failed in transport.
  #[error("request to {host} failed: {message}")]
  Transport { host: String, message: String },

  /// The agent answered with a non-200 status.
  #[error("{host} answered {status} for {url}: {body}")]
  Status {
    host: String,
    url: String,
    status: u16,
    body: String,
  },

  #[error("agent on {host} reports version {version}, at least {minimum} is required")]
  AgentTooOld {
    host: String,
    version: String,
    minimum: String,
  },

  #[error("agent on {host} reports an unreadable version '{version}'")]
  InvalidAgentVersion { host: String, version: String },

  #[error("failed to build HTTP client: {0}")]
  Client(String),

  #[error("invalid TLS material {path}: {message}")]
  Tls { path: PathBuf, message: String },

  /// A lifecycle script exited with a non-zero status.
  #[error("{command} of unit '{unit}' failed with exit code {code:?}: {script}")]
  ScriptFailed {
    unit: String,
    command: LifecycleCommand,
    script: PathBuf,
    code: Option<i32>,
  },

  #[error("lifecycle script not found: {0}")]
  MissingScript(PathBuf),

  #[error("no local target directory: set dcc.local.target.dir or DCC_LOCAL_TARGET_DIR")]
  NoLocalTarget,

  #[error("no solution directory configured")]
  NoSolution,

  #[error("unit '{0}' is not mapped to a host")]
  Unhosted(String),

  #[error("command task for unit '{0}' did not complete")]
  TaskAborted(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("archive error: {0}")]
  Archive(#[from] zip::result::ZipError),

  #[error(transparent)]
  State(#[from] StateError),
}

/// Where commands are carried out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
  /// Every host is a remote agent.
  #[default]
  Remote,
  /// Every host is this machine.
  Local,
  /// Hosts named `localhost` are this machine, the rest are agents.
  Mixed,
}

impl fmt::Display for ExecutionMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      ExecutionMode::Remote => "remote",
      ExecutionMode::Local => "local",
      ExecutionMode::Mixed => "mixed",
    })
  }
}

impl FromStr for ExecutionMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "remote" => Ok(ExecutionMode::Remote),
      "local" => Ok(ExecutionMode::Local),
      "mixed" => Ok(ExecutionMode::Mixed),
      other => Err(format!("unknown execution mode '{other}'")),
    }
  }
}

/// Client certificate material for agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
  /// PEM file holding the client certificate chain and private key.
  pub identity: PathBuf,
  /// PEM bundle of trusted agent certificates.
  pub truststore: PathBuf,
}

/// Configuration for command execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  pub mode: ExecutionMode,

  /// Dispatch the units of a wave concurrently.
  pub parallel: bool,

  /// Maximum number of commands in flight when `parallel` is set.
  pub parallelism: usize,

  pub connect_timeout: Duration,
  pub request_timeout: Duration,

  /// Agents are reached over HTTPS when set, plain HTTP otherwise.
  pub tls: Option<TlsConfig>,

  /// Root of the per-deployment working directories.
  pub work_root: PathBuf,

  /// Overrides the target base taken from deployment properties or the environment.
  pub local_target_base: Option<PathBuf>,

  /// Solution whose folders are shipped on initialize.
  pub solution_dir: Option<PathBuf>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      mode: ExecutionMode::default(),
      parallel: false,
      parallelism: num_cpus(),
      connect_timeout: Duration::from_secs(10),
      request_timeout: Duration::from_secs(600),
      tls: None,
      work_root: work_dir(),
      local_target_base: None,
      solution_dir: None,
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Result of dispatching one command across a profile.
#[derive(Debug)]
pub struct RunReport {
  pub command: LifecycleCommand,

  /// Units whose command succeeded, in completion order.
  pub executed: Vec<String>,

  /// Units whose command failed.
  pub failed: BTreeMap<String, ExecuteError>,

  /// Units skipped because a unit they depend on failed or was skipped.
  /// Maps skipped unit -> the failed dependency.
  pub skipped: BTreeMap<String, String>,

  /// Units defining the command but mapped to no host.
  pub unhosted: Vec<String>,
}

impl RunReport {
  pub fn new(command: LifecycleCommand) -> Self {
    Self {
      command,
      executed: Vec::new(),
      failed: BTreeMap::new(),
      skipped: BTreeMap::new(),
      unhosted: Vec::new(),
    }
  }

  /// Returns true if no unit failed or was skipped.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  /// Returns the number of units dispatched or skipped.
  pub fn total(&self) -> usize {
    self.executed.len() + self.failed.len() + self.skipped.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn report_success_when_empty() {
    let report = RunReport::new(LifecycleCommand::Install);
    assert!(report.is_success());
    assert_eq!(report.total(), 0);
  }

  #[test]
  fn report_failure_with_skipped_unit() {
    let mut report = RunReport::new(LifecycleCommand::Start);
    report.executed.push("db".to_string());
    report.failed.insert("app".to_string(), ExecuteError::Unhosted("app".to_string()));
    report.skipped.insert("lb".to_string(), "app".to_string());
    report.unhosted.push("config".to_string());

    assert!(!report.is_success());
    assert_eq!(report.total(), 3);
  }

  #[test]
  fn execution_mode_parses_case_insensitively() {
    assert_eq!("Mixed".parse::<ExecutionMode>().unwrap(), ExecutionMode::Mixed);
    assert!("cloud".parse::<ExecutionMode>().is_err());
    assert_eq!(ExecutionMode::Local.to_string(), "local");
  }

  #[test]
  fn execute_config_defaults() {
    let config = ExecuteConfig::default();
    assert!(config.parallelism >= 1);
    assert!(!config.parallel);
    assert_eq!(config.mode, ExecutionMode::Remote);
    assert!(config.tls.is_none());
  }
}
