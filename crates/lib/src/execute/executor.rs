//! The executor interface and the factory choosing an implementation per host.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::consts::FALLBACK_LOG_NAME;
use crate::model::LifecycleCommand;
use crate::platform::paths::DeploymentLayout;
use crate::properties::{Properties, to_properties_bytes};

use super::local::LocalExecutor;
use super::remote::RemoteExecutor;
use super::state::StateStore;
use super::types::{ExecuteConfig, ExecuteError, ExecutionMode};

/// A host, as announced by a host unit's agent endpoint capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostInfo {
  /// The host unit.
  pub unit: String,
  pub name: String,
  pub port: u16,
}

impl HostInfo {
  pub fn new(unit: impl Into<String>, name: impl Into<String>, port: u16) -> Self {
    Self {
      unit: unit.into(),
      name: name.into(),
      port,
    }
  }

  /// Whether the host is this machine.
  pub fn is_local(&self) -> bool {
    matches!(self.name.as_str(), "localhost" | "127.0.0.1" | "::1")
  }
}

impl fmt::Display for HostInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.name, self.port)
  }
}

/// One lifecycle command for one unit, with its payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
  pub deployment_id: String,
  pub unit: String,
  pub command: LifecycleCommand,
  pub package: String,
  /// Execution properties.
  pub properties: Properties,
  /// Properties of the units this command builds on.
  pub prerequisites: Properties,
}

impl CommandRequest {
  pub fn properties_bytes(&self) -> Vec<u8> {
    to_properties_bytes(&self.properties)
  }

  pub fn prerequisites_bytes(&self) -> Vec<u8> {
    to_properties_bytes(&self.prerequisites)
  }
}

/// Carries out commands on one host.
///
/// Ordering between units is the caller's concern: `purge` assumes every unit
/// was uninstalled and `clean` assumes every unit was stopped.
#[async_trait]
pub trait Executor: Send + Sync + fmt::Debug {
  fn host(&self) -> &HostInfo;

  /// Check that the host can take commands.
  async fn host_available(&self) -> Result<(), ExecuteError>;

  /// Ship the solution's allow-listed folders to the host.
  async fn initialize(&self, solution_dir: &Path) -> Result<(), ExecuteError>;

  async fn execute(&self, request: &CommandRequest) -> Result<(), ExecuteError>;

  /// Bring the host's state into the local store.
  async fn retrieve_state(&self, store: &StateStore) -> Result<(), ExecuteError>;

  /// Fetch log files into `<dir>/<host>/`. Missing logs are skipped.
  async fn retrieve_logs(&self, names: &[String], dir: &Path) -> Result<Vec<PathBuf>, ExecuteError>;

  async fn clean(&self) -> Result<(), ExecuteError>;

  async fn purge(&self) -> Result<(), ExecuteError>;
}

/// Log names to try for `name`, the agent's own log last.
pub(crate) fn log_candidates(name: &str) -> Vec<&str> {
  if name == FALLBACK_LOG_NAME {
    vec![name]
  } else {
    vec![name, FALLBACK_LOG_NAME]
  }
}

/// Creates the executor for a host.
pub trait ExecutorFactory: Send + Sync {
  fn create(&self, host: &HostInfo, layout: &DeploymentLayout) -> Result<Arc<dyn Executor>, ExecuteError>;
}

/// Chooses local or remote executors according to [`ExecutionMode`].
#[derive(Debug)]
pub struct DefaultExecutorFactory {
  mode: ExecutionMode,
  client: reqwest::Client,
  secure: bool,
  local_lock: Arc<Mutex<()>>,
}

impl DefaultExecutorFactory {
  pub fn new(config: &ExecuteConfig) -> Result<Self, ExecuteError> {
    Ok(Self {
      mode: config.mode,
      client: super::remote::build_client(config)?,
      secure: config.tls.is_some(),
      local_lock: Arc::new(Mutex::new(())),
    })
  }

  fn local(&self, host: &HostInfo, layout: &DeploymentLayout, mixed: bool) -> Result<Arc<dyn Executor>, ExecuteError> {
    let executor = LocalExecutor::new(host.clone(), layout.clone(), mixed, self.local_lock.clone())?;
    Ok(Arc::new(executor))
  }

  fn remote(&self, host: &HostInfo, layout: &DeploymentLayout) -> Arc<dyn Executor> {
    let scheme = if self.secure { "https" } else { "http" };
    let base_url = format!("{scheme}://{}:{}", host.name, host.port);
    Arc::new(RemoteExecutor::new(
      host.clone(),
      base_url,
      layout.deployment_id(),
      self.client.clone(),
    ))
  }
}

impl ExecutorFactory for DefaultExecutorFactory {
  fn create(&self, host: &HostInfo, layout: &DeploymentLayout) -> Result<Arc<dyn Executor>, ExecuteError> {
    match self.mode {
      ExecutionMode::Local => self.local(host, layout, false),
      ExecutionMode::Mixed if host.is_local() => self.local(host, layout, true),
      ExecutionMode::Mixed | ExecutionMode::Remote => Ok(self.remote(host, layout)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn agent_log_is_tried_once() {
    assert_eq!(log_candidates("install.log"), vec!["install.log", FALLBACK_LOG_NAME]);
    assert_eq!(log_candidates(FALLBACK_LOG_NAME), vec![FALLBACK_LOG_NAME]);
  }
}
