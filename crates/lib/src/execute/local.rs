//! Local executor.
//!
//! Runs lifecycle scripts of the solution's packages on this machine, inside
//! the deployment's target directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::platform::paths::DeploymentLayout;

use super::archive::copy_solution;
use super::executor::{CommandRequest, Executor, HostInfo, log_candidates};
use super::state::StateStore;
use super::types::ExecuteError;

#[derive(Debug)]
pub struct LocalExecutor {
  host: HostInfo,
  layout: DeploymentLayout,
  target: PathBuf,
  lock: Arc<Mutex<()>>,
}

impl LocalExecutor {
  /// Create an executor for `host`.
  ///
  /// Without a configured target base only mixed mode is allowed; it then
  /// works under the deployment's own directory.
  pub fn new(
    host: HostInfo,
    layout: DeploymentLayout,
    mixed: bool,
    lock: Arc<Mutex<()>>,
  ) -> Result<Self, ExecuteError> {
    let target = match layout.target_dir() {
      Some(target) => target.to_path_buf(),
      None if mixed => layout.root().join("target"),
      None => return Err(ExecuteError::NoLocalTarget),
    };

    Ok(Self {
      host,
      layout,
      target,
      lock,
    })
  }

  pub fn target(&self) -> &Path {
    &self.target
  }

  fn script(&self, request: &CommandRequest) -> PathBuf {
    self
      .target
      .join("packages")
      .join(&request.package)
      .join(format!("{}.sh", request.command))
  }
}

async fn remove_dir(path: &Path) -> Result<(), ExecuteError> {
  match fs::remove_dir_all(path).await {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e.into()),
  }
}

#[async_trait]
impl Executor for LocalExecutor {
  fn host(&self) -> &HostInfo {
    &self.host
  }

  async fn host_available(&self) -> Result<(), ExecuteError> {
    fs::create_dir_all(&self.target).await?;
    debug!(host = %self.host, target = %self.target.display(), "local host ready");
    Ok(())
  }

  async fn initialize(&self, solution_dir: &Path) -> Result<(), ExecuteError> {
    let _guard = self.lock.lock().await;
    fs::create_dir_all(&self.target).await?;

    let solution = solution_dir.to_path_buf();
    let target = self.target.clone();
    let files = tokio::task::spawn_blocking(move || copy_solution(&solution, &target))
      .await
      .map_err(|e| ExecuteError::Io(io::Error::other(e)))??;

    info!(host = %self.host, files, "solution initialized locally");
    Ok(())
  }

  async fn execute(&self, request: &CommandRequest) -> Result<(), ExecuteError> {
    let config_dir = self.layout.config_dir();
    fs::create_dir_all(&config_dir).await?;
    let properties = config_dir.join(format!("{}-{}.properties", request.unit, request.command));
    let prerequisites = config_dir.join(format!("{}-{}-prerequisites.properties", request.unit, request.command));
    fs::write(&properties, request.properties_bytes()).await?;
    fs::write(&prerequisites, request.prerequisites_bytes()).await?;

    let script = self.script(request);
    if !fs::try_exists(&script).await? {
      return Err(ExecuteError::MissingScript(script));
    }

    info!(unit = %request.unit, command = %request.command, script = %script.display(), "running lifecycle script");

    let output = Command::new("/bin/sh")
      .arg(&script)
      .current_dir(&self.target)
      .env("DCC_PROPERTIES", &properties)
      .env("DCC_PREREQUISITES", &prerequisites)
      .env("DCC_UNIT_ID", &request.unit)
      .env("DCC_DEPLOYMENT_ID", &request.deployment_id)
      .env("DCC_TARGET_DIR", &self.target)
      .output()
      .await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
      debug!(unit = %request.unit, stdout = %stdout.trim(), "script output");
    }
    if !stderr.trim().is_empty() {
      debug!(unit = %request.unit, stderr = %stderr.trim(), "script stderr");
    }

    if !output.status.success() {
      return Err(ExecuteError::ScriptFailed {
        unit: request.unit.clone(),
        command: request.command,
        script,
        code: output.status.code(),
      });
    }

    Ok(())
  }

  async fn retrieve_state(&self, store: &StateStore) -> Result<(), ExecuteError> {
    debug!(host = %self.host, state = %store.dir().display(), "local state is already consolidated");
    Ok(())
  }

  async fn retrieve_logs(&self, names: &[String], dir: &Path) -> Result<Vec<PathBuf>, ExecuteError> {
    let dest_dir = dir.join(&self.host.name);
    fs::create_dir_all(&dest_dir).await?;
    let logs = self.target.join("logs");

    let mut fetched = Vec::new();
    for name in names {
      let source = log_candidates(name)
        .into_iter()
        .map(|n| (n, logs.join(n)))
        .find(|(_, path)| path.is_file());

      match source {
        Some((found, path)) => {
          let dest = dest_dir.join(found);
          fs::copy(&path, &dest).await?;
          fetched.push(dest);
        }
        None => warn!(host = %self.host, log = %name, "log not available"),
      }
    }

    Ok(fetched)
  }

  async fn clean(&self) -> Result<(), ExecuteError> {
    let _guard = self.lock.lock().await;
    let tmp = self.layout.tmp_dir();
    remove_dir(&tmp).await?;
    fs::create_dir_all(&tmp).await?;
    info!(host = %self.host, "local temp directory cleaned");
    Ok(())
  }

  async fn purge(&self) -> Result<(), ExecuteError> {
    let _guard = self.lock.lock().await;
    remove_dir(&self.target).await?;
    remove_dir(&self.layout.tmp_dir()).await?;
    remove_dir(&self.layout.config_dir()).await?;
    info!(host = %self.host, target = %self.target.display(), "local deployment purged");
    Ok(())
  }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use crate::consts::FALLBACK_LOG_NAME;
  use crate::model::LifecycleCommand;
  use crate::properties::Properties;
  use tempfile::TempDir;

  struct Fixture {
    _work: TempDir,
    _targets: TempDir,
    solution: TempDir,
    executor: LocalExecutor,
  }

  fn fixture(script: &str) -> Fixture {
    let work = TempDir::new().unwrap();
    let targets = TempDir::new().unwrap();
    let solution = TempDir::new().unwrap();
    std::fs::create_dir_all(solution.path().join("packages/app-pkg")).unwrap();
    std::fs::write(solution.path().join("packages/app-pkg/install.sh"), script).unwrap();

    let layout = DeploymentLayout::new(work.path(), "shop", Some(targets.path()));
    let executor = LocalExecutor::new(
      HostInfo::new("web", "localhost", 8443),
      layout,
      false,
      Arc::new(Mutex::new(())),
    )
    .unwrap();

    Fixture {
      _work: work,
      _targets: targets,
      solution,
      executor,
    }
  }

  fn request(command: LifecycleCommand) -> CommandRequest {
    CommandRequest {
      deployment_id: "shop".to_string(),
      unit: "app".to_string(),
      command,
      package: "app-pkg".to_string(),
      properties: Properties::from([("port".to_string(), "8080".to_string())]),
      prerequisites: Properties::new(),
    }
  }

  #[test]
  fn target_is_required_outside_mixed_mode() {
    let work = TempDir::new().unwrap();
    let layout = DeploymentLayout::new(work.path(), "shop", None);
    let host = HostInfo::new("web", "localhost", 8443);

    assert!(matches!(
      LocalExecutor::new(host.clone(), layout.clone(), false, Arc::new(Mutex::new(()))),
      Err(ExecuteError::NoLocalTarget)
    ));
    let executor = LocalExecutor::new(host, layout.clone(), true, Arc::new(Mutex::new(()))).unwrap();
    assert_eq!(executor.target(), layout.root().join("target"));
  }

  #[tokio::test]
  async fn runs_package_script_with_properties() {
    let f = fixture("grep -q port=8080 \"$DCC_PROPERTIES\" && echo \"$DCC_UNIT_ID\" > installed.txt\n");
    f.executor.initialize(f.solution.path()).await.unwrap();
    f.executor.execute(&request(LifecycleCommand::Install)).await.unwrap();

    let marker = std::fs::read_to_string(f.executor.target().join("installed.txt")).unwrap();
    assert_eq!(marker.trim(), "app");
  }

  #[tokio::test]
  async fn failing_script_reports_exit_code() {
    let f = fixture("exit 3\n");
    f.executor.initialize(f.solution.path()).await.unwrap();

    let err = f.executor.execute(&request(LifecycleCommand::Install)).await.unwrap_err();
    assert!(matches!(err, ExecuteError::ScriptFailed { code: Some(3), .. }));
  }

  #[tokio::test]
  async fn missing_script_is_an_error() {
    let f = fixture("true\n");
    f.executor.initialize(f.solution.path()).await.unwrap();

    let err = f.executor.execute(&request(LifecycleCommand::Start)).await.unwrap_err();
    assert!(matches!(err, ExecuteError::MissingScript(_)));
  }

  #[tokio::test]
  async fn purge_removes_target_and_config() {
    let f = fixture("true\n");
    f.executor.initialize(f.solution.path()).await.unwrap();
    f.executor.execute(&request(LifecycleCommand::Install)).await.unwrap();

    f.executor.purge().await.unwrap();
    assert!(!f.executor.target().exists());
    assert!(!f.executor.layout.config_dir().exists());
  }

  #[tokio::test]
  async fn logs_fall_back_to_default_name() {
    let f = fixture("true\n");
    let logs = f.executor.target().join("logs");
    std::fs::create_dir_all(&logs).unwrap();
    std::fs::write(logs.join(FALLBACK_LOG_NAME), "agent log").unwrap();
    let dest = TempDir::new().unwrap();

    let fetched = f
      .executor
      .retrieve_logs(&["install.log".to_string()], dest.path())
      .await
      .unwrap();
    assert_eq!(fetched, vec![dest.path().join("localhost").join(FALLBACK_LOG_NAME)]);
  }
}
