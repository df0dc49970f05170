use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dcc_lib::document::ProfileDocument;
use dcc_lib::execute::{CommandRequest, ExecuteError, Executor, ExecutorFactory, HostInfo, StateStore};
use dcc_lib::platform::paths::DeploymentLayout;
use dcc_lib::profile::{LoadOptions, Profile};
use dcc_lib::properties::PropertySource;

/// Link a YAML profile document, optionally with deployment properties.
pub fn profile(yaml: &str, deployment: &[(&str, &str)]) -> Profile {
  let mut builder = ProfileDocument::from_yaml_str(yaml, Path::new("test.yaml"))
    .unwrap()
    .into_builder()
    .unwrap();
  if !deployment.is_empty() {
    builder = builder.deployment(PropertySource::from_pairs("deployment", deployment.iter().copied()));
  }
  builder.build(LoadOptions::default()).unwrap()
}

/// Records the hosts it creates executors for; the executors do nothing.
#[derive(Debug, Default)]
pub struct NullFactory {
  pub created: Mutex<Vec<String>>,
}

impl ExecutorFactory for NullFactory {
  fn create(&self, host: &HostInfo, _layout: &DeploymentLayout) -> Result<Arc<dyn Executor>, ExecuteError> {
    self.created.lock().unwrap().push(host.unit.clone());
    Ok(Arc::new(NullExecutor(host.clone())))
  }
}

#[derive(Debug)]
pub struct NullExecutor(HostInfo);

#[async_trait]
impl Executor for NullExecutor {
  fn host(&self) -> &HostInfo {
    &self.0
  }

  async fn host_available(&self) -> Result<(), ExecuteError> {
    Ok(())
  }

  async fn initialize(&self, _solution_dir: &Path) -> Result<(), ExecuteError> {
    Ok(())
  }

  async fn execute(&self, _request: &CommandRequest) -> Result<(), ExecuteError> {
    Ok(())
  }

  async fn retrieve_state(&self, _store: &StateStore) -> Result<(), ExecuteError> {
    Ok(())
  }

  async fn retrieve_logs(&self, _names: &[String], _dir: &Path) -> Result<Vec<PathBuf>, ExecuteError> {
    Ok(Vec::new())
  }

  async fn clean(&self) -> Result<(), ExecuteError> {
    Ok(())
  }

  async fn purge(&self) -> Result<(), ExecuteError> {
    Ok(())
  }
}
