//! Execution context: maps units to hosts and dispatches lifecycle commands.
//!
//! A host is announced by a *host unit*, a unit providing the agent endpoint
//! capability. Every other unit runs on the host unit it depends on. When it
//! depends on several, a required capability flagged `identifies_host` picks
//! the one reached through its binding.
//!
//! Commands run wave by wave in dependency order (reversed for stop and
//! uninstall). When a unit fails, every unit depending on it in that order is
//! skipped.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::consts::{
  AGENT_ENDPOINT_CAPABILITY, AGENT_HOST_KEY, AGENT_PORT_KEY, DEFAULT_AGENT_PORT, DEPLOYMENT_ID_PROPERTY,
};
use crate::error::ConfigError;
use crate::model::{CommandDefinition, ConfigurationUnit, LifecycleCommand};
use crate::placeholder;
use crate::platform::paths::{DeploymentLayout, local_target_base};
use crate::profile::Profile;
use crate::properties::{EvaluateOptions, Properties, PropertiesHolder, evaluate};

use super::executor::{CommandRequest, DefaultExecutorFactory, Executor, ExecutorFactory, HostInfo};
use super::state::StateStore;
use super::types::{ExecuteConfig, ExecuteError, RunReport};

/// Units to dispatch one command to, in waves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSchedule {
  pub waves: Vec<Vec<String>>,
  /// Units defining the command but mapped to no host.
  pub unhosted: Vec<String>,
}

pub struct ExecutionContext<'p> {
  profile: &'p Profile,
  properties: PropertiesHolder,
  config: ExecuteConfig,
  layout: DeploymentLayout,
  state: StateStore,
  factory: Arc<dyn ExecutorFactory>,
  hosts: BTreeMap<String, HostInfo>,
  unit_hosts: BTreeMap<String, String>,
  executors: BTreeMap<String, Arc<dyn Executor>>,
  /// Host units whose executor passed `host_available`.
  probed: BTreeSet<String>,
  mapped: bool,
}

impl<'p> ExecutionContext<'p> {
  /// Evaluate `profile` and set up a context with the default executors.
  pub fn prepare(profile: &'p Profile, config: ExecuteConfig) -> Result<Self, ExecuteError> {
    let properties = evaluate(profile, EvaluateOptions::default())?;
    let factory = Arc::new(DefaultExecutorFactory::new(&config)?);
    Ok(Self::new(profile, properties, config, factory))
  }

  pub fn new(
    profile: &'p Profile,
    properties: PropertiesHolder,
    config: ExecuteConfig,
    factory: Arc<dyn ExecutorFactory>,
  ) -> Self {
    let target_base = config
      .local_target_base
      .clone()
      .or_else(|| local_target_base(profile.deployment()));
    let layout = DeploymentLayout::new(&config.work_root, profile.deployment_id(), target_base.as_deref());
    let state = StateStore::new(layout.state_dir());

    Self {
      profile,
      properties,
      config,
      layout,
      state,
      factory,
      hosts: BTreeMap::new(),
      unit_hosts: BTreeMap::new(),
      executors: BTreeMap::new(),
      probed: BTreeSet::new(),
      mapped: false,
    }
  }

  pub fn profile(&self) -> &'p Profile {
    self.profile
  }

  pub fn properties(&self) -> &PropertiesHolder {
    &self.properties
  }

  pub fn layout(&self) -> &DeploymentLayout {
    &self.layout
  }

  pub fn state(&self) -> &StateStore {
    &self.state
  }

  pub fn deployment_id(&self) -> &str {
    self.layout.deployment_id()
  }

  /// Hosts by host unit id.
  pub fn hosts(&self) -> &BTreeMap<String, HostInfo> {
    &self.hosts
  }

  /// Host unit id by unit id, for every hosted unit.
  pub fn unit_hosts(&self) -> &BTreeMap<String, String> {
    &self.unit_hosts
  }

  pub fn host_for_unit(&self, unit: &str) -> Option<&HostInfo> {
    self.unit_hosts.get(unit).and_then(|h| self.hosts.get(h))
  }

  pub fn executor_for_unit(&self, unit: &str) -> Option<Arc<dyn Executor>> {
    self.unit_hosts.get(unit).and_then(|h| self.executors.get(h)).cloned()
  }

  /// Compute the unit to host mapping. `force` recomputes it from scratch.
  ///
  /// # Errors
  ///
  /// - `MissingHostName` when a host unit resolves no host name.
  /// - `AmbiguousHost` when a unit depends on several host units and no
  ///   host-identifying binding decides between them.
  /// - `CyclicHostMapping` when host identification goes round in circles.
  pub fn map_hosts(&mut self, force: bool) -> Result<(), ConfigError> {
    if self.mapped && !force {
      return Ok(());
    }
    self.hosts.clear();
    self.unit_hosts.clear();
    self.executors.clear();
    self.probed.clear();
    self.mapped = false;

    for unit in self.profile.concrete_units() {
      let Some(endpoint) = unit
        .provided
        .iter()
        .find(|c| c.definition == AGENT_ENDPOINT_CAPABILITY)
      else {
        continue;
      };
      let unique_id = unit.capability_ref(&endpoint.id).unique_id();
      let name = self
        .properties
        .get(&unique_id, AGENT_HOST_KEY)
        .map(str::trim)
        .filter(|n| !n.is_empty() && placeholder::unresolved(n).is_empty())
        .ok_or_else(|| ConfigError::MissingHostName(unit.id.clone()))?;
      let port = self
        .properties
        .get(&unique_id, AGENT_PORT_KEY)
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(DEFAULT_AGENT_PORT);

      self.hosts.insert(unit.id.clone(), HostInfo::new(&unit.id, name, port));
    }

    for unit in self.profile.concrete_units() {
      let mut path = Vec::new();
      match self.host_unit_for(unit, &mut path)? {
        Some(host) => {
          debug!(unit = %unit.id, host = %host, "unit mapped to host");
          self.unit_hosts.insert(unit.id.clone(), host);
        }
        None => debug!(unit = %unit.id, "unit has no host"),
      }
    }

    info!(hosts = self.hosts.len(), units = self.unit_hosts.len(), "hosts mapped");
    self.mapped = true;
    Ok(())
  }

  fn host_unit_for(&self, unit: &ConfigurationUnit, path: &mut Vec<String>) -> Result<Option<String>, ConfigError> {
    if path.contains(&unit.id) {
      let mut chain = path.clone();
      chain.push(unit.id.clone());
      return Err(ConfigError::CyclicHostMapping {
        unit: path.first().cloned().unwrap_or_default(),
        chain: chain.join(" -> "),
      });
    }
    if self.hosts.contains_key(&unit.id) {
      return Ok(Some(unit.id.clone()));
    }

    let candidates: BTreeSet<&str> = self
      .profile
      .dependencies()
      .upstream(&unit.id)
      .iter()
      .map(String::as_str)
      .filter(|u| self.hosts.contains_key(*u))
      .collect();

    match candidates.len() {
      0 => return Ok(None),
      1 => return Ok(candidates.into_iter().next().map(str::to_string)),
      _ => {}
    }

    path.push(unit.id.clone());
    for required in unit.required.iter().filter(|r| r.identifies_host) {
      for binding in self.profile.bindings().targeting(&unit.capability_ref(&required.id)) {
        let Some(provider) = self.profile.unit(&binding.source.unit) else {
          continue;
        };
        if let Some(host) = self.host_unit_for(provider, path)? {
          path.pop();
          return Ok(Some(host));
        }
      }
    }
    path.pop();

    Err(ConfigError::AmbiguousHost {
      unit: unit.id.clone(),
      candidates: candidates.into_iter().map(str::to_string).collect(),
    })
  }

  /// Map hosts and create one executor per host. `force` rebuilds both.
  pub fn initialize_executors(&mut self, force: bool) -> Result<(), ExecuteError> {
    if self.mapped && !force && self.executors.len() == self.hosts.len() {
      return Ok(());
    }
    self.map_hosts(force)?;

    for (host_unit, host) in &self.hosts {
      if !self.executors.contains_key(host_unit) {
        let executor = self.factory.create(host, &self.layout)?;
        self.executors.insert(host_unit.clone(), executor);
      }
    }
    Ok(())
  }

  /// The waves a command runs in.
  ///
  /// Only concrete, hosted units defining the command are scheduled;
  /// `units` narrows the set further when not empty.
  pub fn schedule(&mut self, command: LifecycleCommand, units: &[String]) -> Result<CommandSchedule, ConfigError> {
    self.map_hosts(false)?;

    let mut schedule = CommandSchedule::default();
    let mut targets = Vec::new();
    for unit in self.profile.concrete_units() {
      if (!units.is_empty() && !units.contains(&unit.id)) || unit.command(command).is_none() {
        continue;
      }
      if self.unit_hosts.contains_key(&unit.id) {
        targets.push(unit.id.as_str());
      } else {
        schedule.unhosted.push(unit.id.clone());
      }
    }

    schedule.waves = self.profile.dependencies().waves(&targets)?;
    if command.is_reverse() {
      schedule.waves.reverse();
    }
    Ok(schedule)
  }

  /// Build the request for one unit.
  pub fn command_request(&self, unit: &ConfigurationUnit, definition: &CommandDefinition) -> CommandRequest {
    let command = definition.command;
    let mut properties = self.properties.bag(&unit.id).cloned().unwrap_or_default();

    let capabilities: Vec<&str> = if definition.capabilities.is_empty() {
      unit
        .required
        .iter()
        .map(|c| c.id.as_str())
        .chain(unit.provided.iter().map(|c| c.id.as_str()))
        .collect()
    } else {
      definition.capabilities.iter().map(String::as_str).collect()
    };
    for capability in capabilities {
      self.copy_prefixed(&unit.capability_ref(capability).unique_id(), capability, &mut properties);
    }
    for contribution in &definition.contributions {
      self.copy_prefixed(contribution, contribution, &mut properties);
    }

    properties.insert(DEPLOYMENT_ID_PROPERTY.to_string(), self.deployment_id().to_string());
    properties.insert("dcc.unit.id".to_string(), unit.id.clone());
    properties.insert("dcc.command".to_string(), command.to_string());
    properties.insert("dcc.package.id".to_string(), definition.package.clone());

    let mut prerequisites = Properties::new();
    for capability in &definition.requisitions {
      let bindings = self.profile.bindings().targeting(&unit.capability_ref(capability));
      let several = bindings.len() > 1;
      for (i, binding) in bindings.iter().enumerate() {
        let prefix = if several {
          format!("{capability}.{i}")
        } else {
          capability.clone()
        };

        if let Some(bag) = self.properties.bag(&binding.id()) {
          for (key, value) in bag.iter().filter(|(k, _)| k.starts_with('_')) {
            prerequisites.insert(format!("{prefix}.{key}"), value.clone());
          }
        }

        let provider = &binding.source.unit;
        let last = self
          .host_for_unit(provider)
          .and_then(|host| match self.state.load(&host.name, provider) {
            Ok(state) => state,
            Err(e) => {
              warn!(unit = %provider, error = %e, "unreadable state marker");
              None
            }
          })
          .and_then(|state| state.last());
        if let Some((last_command, at)) = last {
          prerequisites.insert(format!("{prefix}.state.{last_command}"), at.to_rfc3339());
        }
      }
    }
    for capability in &definition.provisions {
      self.copy_prefixed(&unit.capability_ref(capability).unique_id(), capability, &mut prerequisites);
    }

    CommandRequest {
      deployment_id: self.deployment_id().to_string(),
      unit: unit.id.clone(),
      command,
      package: definition.package.clone(),
      properties,
      prerequisites,
    }
  }

  fn copy_prefixed(&self, id: &str, prefix: &str, into: &mut Properties) {
    if let Some(bag) = self.properties.bag(id) {
      for (key, value) in bag {
        into.insert(format!("{prefix}.{key}"), value.clone());
      }
    }
  }

  /// Dispatch `command` to every hosted unit defining it (or to `units` only).
  ///
  /// Every involved host is probed once before the first command. A failed
  /// probe aborts the run; a failed command only skips the units after it.
  pub async fn run(&mut self, command: LifecycleCommand, units: &[String]) -> Result<RunReport, ExecuteError> {
    self.initialize_executors(false)?;
    let schedule = self.schedule(command, units)?;

    let mut report = RunReport::new(command);
    report.unhosted = schedule.unhosted;
    for unit in &report.unhosted {
      debug!(unit = %unit, command = %command, "unit has no host, not dispatched");
    }

    let involved: BTreeSet<String> = schedule
      .waves
      .iter()
      .flatten()
      .filter_map(|u| self.unit_hosts.get(u).cloned())
      .collect();
    self.probe(involved).await?;

    let permits = if self.config.parallel {
      self.config.parallelism.max(1)
    } else {
      1
    };
    let semaphore = Arc::new(Semaphore::new(permits));
    let mut failed: HashSet<String> = HashSet::new();

    info!(command = %command, waves = schedule.waves.len(), parallel = self.config.parallel, "dispatching command");

    for (wave_idx, wave) in schedule.waves.iter().enumerate() {
      debug!(wave = wave_idx, units = wave.len(), "executing wave");

      let mut ready = Vec::new();
      for unit in wave {
        match self.failed_dependency(command, unit, &failed) {
          Some(dependency) => {
            warn!(unit = %unit, failed_dep = %dependency, "skipping unit due to failed dependency");
            report.skipped.insert(unit.clone(), dependency);
            failed.insert(unit.clone());
          }
          None => ready.push(unit.clone()),
        }
      }

      for (unit, result) in self.execute_wave(command, &ready, semaphore.clone()).await {
        match result {
          Ok(()) => {
            info!(unit = %unit, command = %command, "command succeeded");
            if let Some(host) = self.host_for_unit(&unit)
              && let Err(e) = self.state.record(&host.name, &unit, command, Utc::now())
            {
              warn!(unit = %unit, error = %e, "failed to write state marker");
            }
            report.executed.push(unit);
          }
          Err(e) => {
            error!(unit = %unit, command = %command, error = %e, "command failed");
            failed.insert(unit.clone());
            report.failed.insert(unit, e);
          }
        }
      }
    }

    info!(
      command = %command,
      executed = report.executed.len(),
      failed = report.failed.len(),
      skipped = report.skipped.len(),
      "command dispatch complete"
    );
    Ok(report)
  }

  /// The first failed unit `unit` builds on, in the direction of `command`.
  fn failed_dependency(&self, command: LifecycleCommand, unit: &str, failed: &HashSet<String>) -> Option<String> {
    let dependencies = self.profile.dependencies();
    if command.is_reverse() {
      dependencies
        .downstream(unit)
        .into_iter()
        .find(|d| failed.contains(*d))
        .map(str::to_string)
    } else {
      dependencies.upstream(unit).iter().find(|d| failed.contains(*d)).cloned()
    }
  }

  async fn execute_wave(
    &self,
    command: LifecycleCommand,
    units: &[String],
    semaphore: Arc<Semaphore>,
  ) -> Vec<(String, Result<(), ExecuteError>)> {
    let mut results = Vec::new();
    let mut join_set = JoinSet::new();

    for unit_id in units {
      let (Some(unit), Some(executor)) = (self.profile.unit(unit_id), self.executor_for_unit(unit_id)) else {
        results.push((unit_id.clone(), Err(ExecuteError::Unhosted(unit_id.clone()))));
        continue;
      };
      let Some(definition) = unit.command(command) else {
        continue;
      };
      let request = self.command_request(unit, definition);
      let semaphore = semaphore.clone();

      join_set.spawn(async move {
        let result = match semaphore.acquire_owned().await {
          Ok(_permit) => executor.execute(&request).await,
          Err(_) => Err(ExecuteError::TaskAborted(request.unit.clone())),
        };
        (request.unit, result)
      });
    }

    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok(result) => results.push(result),
        Err(e) => error!(error = %e, "command task panicked"),
      }
    }

    for unit in units {
      if !results.iter().any(|(u, _)| u == unit) {
        results.push((unit.clone(), Err(ExecuteError::TaskAborted(unit.clone()))));
      }
    }
    results
  }

  /// Check the agent of every host unit in `host_units` not yet checked
  /// since its executor was created.
  async fn probe(&mut self, host_units: impl IntoIterator<Item = String>) -> Result<(), ExecuteError> {
    for host_unit in host_units {
      if self.probed.contains(&host_unit) {
        continue;
      }
      if let Some(executor) = self.executors.get(&host_unit) {
        executor.host_available().await?;
        self.probed.insert(host_unit);
      }
    }
    Ok(())
  }

  /// Set up executors for every host and check their agents.
  async fn prepare_all_hosts(&mut self) -> Result<(), ExecuteError> {
    self.initialize_executors(false)?;
    let all: Vec<String> = self.executors.keys().cloned().collect();
    self.probe(all).await
  }

  /// Probe every host, then ship the solution to it.
  pub async fn initialize_hosts(&mut self) -> Result<Vec<HostInfo>, ExecuteError> {
    let solution = self.config.solution_dir.clone().ok_or(ExecuteError::NoSolution)?;
    self.prepare_all_hosts().await?;

    let mut initialized = Vec::new();
    for executor in self.executors.values() {
      executor.initialize(&solution).await?;
      initialized.push(executor.host().clone());
    }
    Ok(initialized)
  }

  /// Pull every host's state into the local store.
  pub async fn retrieve_state(&mut self) -> Result<(), ExecuteError> {
    self.prepare_all_hosts().await?;
    for executor in self.executors.values() {
      executor.retrieve_state(&self.state).await?;
    }
    Ok(())
  }

  /// Fetch log files from every host. Failures are logged and skipped.
  pub async fn retrieve_logs(&mut self, names: &[String]) -> Result<Vec<std::path::PathBuf>, ExecuteError> {
    self.initialize_executors(false)?;
    let dir = self.layout.logs_dir();

    let mut fetched = Vec::new();
    let host_units: Vec<String> = self.executors.keys().cloned().collect();
    for host_unit in host_units {
      if let Err(e) = self.probe([host_unit.clone()]).await {
        warn!(host_unit = %host_unit, error = %e, "host unavailable, logs not retrieved");
        continue;
      }
      let Some(executor) = self.executors.get(&host_unit) else {
        continue;
      };
      match executor.retrieve_logs(names, &dir).await {
        Ok(paths) => fetched.extend(paths),
        Err(e) => warn!(host = %executor.host(), error = %e, "log retrieval failed"),
      }
    }
    Ok(fetched)
  }

  /// Clean every host. Every unit must have been stopped.
  pub async fn clean(&mut self) -> Result<(), ExecuteError> {
    self.prepare_all_hosts().await?;
    for executor in self.executors.values() {
      executor.clean().await?;
    }
    Ok(())
  }

  /// Purge every host. Every unit must have been uninstalled.
  pub async fn purge(&mut self) -> Result<(), ExecuteError> {
    self.prepare_all_hosts().await?;
    for executor in self.executors.values() {
      executor.purge().await?;
    }
    Ok(())
  }
}
