//! Test fixtures shared by the unit tests of this crate.
//!
//! Provides a small hosted profile and an executor factory that records what
//! it was asked to do instead of talking to hosts.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::capability::{AttributeKey, CapabilityDefinition};
use crate::consts::AGENT_ENDPOINT_CAPABILITY;
use crate::execute::{CommandRequest, ExecuteError, Executor, ExecutorFactory, HostInfo, StateStore};
use crate::model::{Binding, CapabilityRef, CommandDefinition, ConfigurationUnit, LifecycleCommand, RequiredCapability};
use crate::platform::paths::DeploymentLayout;
use crate::profile::{LoadOptions, Profile, ProfileBuilder};

fn host_requirement(identifies_host: bool) -> RequiredCapability {
  RequiredCapability {
    id: "host".to_string(),
    definition: AGENT_ENDPOINT_CAPABILITY.to_string(),
    optional: false,
    multiple_bindings_allowed: false,
    identifies_host,
  }
}

/// Two hosts, a database on `db01`, an app on `web01` that also depends on
/// the database, and a host-less `settings` unit.
pub fn hosted_shop() -> Profile {
  hosted_shop_with(true)
}

/// [`hosted_shop`], with `app` naming its host through its `host` binding or not.
pub fn hosted_shop_with(app_identifies_host: bool) -> Profile {
  let install = |package: &str| CommandDefinition::new(LifecycleCommand::Install, package);
  let stop = |package: &str| CommandDefinition::new(LifecycleCommand::Stop, package);

  let mut app_install = install("app-pkg");
  app_install.requisitions.push("db".to_string());

  ProfileBuilder::new("shop")
    .definition(
      CapabilityDefinition::new(AGENT_ENDPOINT_CAPABILITY)
        .with_key(AttributeKey::new("host"))
        .with_key(AttributeKey::new("port").with_default("8443")),
    )
    .definition(CapabilityDefinition::new("db.endpoint").with_key(AttributeKey::new("port")))
    .unit(
      ConfigurationUnit::new("web01")
        .provides("agent", AGENT_ENDPOINT_CAPABILITY)
        .attribute("host", "web01.example.com")
        .attribute("port", "9443")
        .with_command(install("host-pkg")),
    )
    .unit(
      ConfigurationUnit::new("db01")
        .provides("agent", AGENT_ENDPOINT_CAPABILITY)
        .attribute("host", "db01.example.com")
        .with_command(install("host-pkg")),
    )
    .unit(
      ConfigurationUnit::new("db")
        .with_required(host_requirement(false))
        .provides("db", "db.endpoint")
        .attribute("port", "5432")
        .with_command(install("db-pkg"))
        .with_command(stop("db-pkg")),
    )
    .unit(
      ConfigurationUnit::new("app")
        .with_required(host_requirement(app_identifies_host))
        .requires("db", "db.endpoint")
        .with_command(app_install)
        .with_command(stop("app-pkg")),
    )
    .unit(ConfigurationUnit::new("settings").with_command(install("settings-pkg")))
    .binding(Binding::new(CapabilityRef::new("web01", "agent"), CapabilityRef::new("app", "host")))
    .binding(Binding::new(CapabilityRef::new("db01", "agent"), CapabilityRef::new("db", "host")))
    .binding(Binding::new(CapabilityRef::new("db", "db"), CapabilityRef::new("app", "db")))
    .build(LoadOptions::default())
    .expect("fixture profile links")
}

#[derive(Debug, Default)]
struct Calls {
  probes: AtomicUsize,
  executed: Mutex<Vec<String>>,
}

/// Hands out [`RecordingExecutor`]s and remembers which hosts it created.
#[derive(Debug)]
pub struct RecordingFactory {
  work: TempDir,
  failing: BTreeSet<String>,
  created: Mutex<Vec<String>>,
  calls: Arc<Calls>,
}

impl RecordingFactory {
  pub fn new() -> Self {
    Self::failing(std::iter::empty::<&str>())
  }

  /// Executors fail the command of every unit in `units`.
  pub fn failing<'a>(units: impl IntoIterator<Item = &'a str>) -> Self {
    Self {
      work: TempDir::new().expect("temp dir"),
      failing: units.into_iter().map(str::to_string).collect(),
      created: Mutex::new(Vec::new()),
      calls: Arc::default(),
    }
  }

  /// Scratch directory to use as the work root.
  pub fn work_root(&self) -> &Path {
    self.work.path()
  }

  /// Host units executors were created for, in creation order.
  pub fn created(&self) -> Vec<String> {
    self.created.lock().expect("lock").clone()
  }

  pub fn probes(&self) -> usize {
    self.calls.probes.load(Ordering::SeqCst)
  }

  /// Units whose command was executed, in completion order.
  pub fn executed(&self) -> Vec<String> {
    self.calls.executed.lock().expect("lock").clone()
  }
}

impl ExecutorFactory for RecordingFactory {
  fn create(&self, host: &HostInfo, _layout: &DeploymentLayout) -> Result<Arc<dyn Executor>, ExecuteError> {
    self.created.lock().expect("lock").push(host.unit.clone());
    Ok(Arc::new(RecordingExecutor {
      host: host.clone(),
      failing: self.failing.clone(),
      calls: self.calls.clone(),
    }))
  }
}

#[derive(Debug)]
pub struct RecordingExecutor {
  host: HostInfo,
  failing: BTreeSet<String>,
  calls: Arc<Calls>,
}

#[async_trait]
impl Executor for RecordingExecutor {
  fn host(&self) -> &HostInfo {
    &self.host
  }

  async fn host_available(&self) -> Result<(), ExecuteError> {
    self.calls.probes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn initialize(&self, _solution_dir: &Path) -> Result<(), ExecuteError> {
    Ok(())
  }

  async fn execute(&self, request: &CommandRequest) -> Result<(), ExecuteError> {
    if self.failing.contains(&request.unit) {
      return Err(ExecuteError::Transport {
        host: self.host.name.clone(),
        message: "connection reset".to_string(),
      });
    }
    self.calls.executed.lock().expect("lock").push(request.unit.clone());
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
