//! The linked profile: units, capability definitions, bindings and asserts.
//!
//! A [`Profile`] is built once per resolution run by a [`ProfileBuilder`] and
//! is read-only afterwards. Evaluation state lives in a separate
//! [`crate::properties::PropertiesHolder`].

mod autobind;
mod builder;
mod dependencies;

use std::collections::HashMap;

use crate::capability::CapabilityDefinitions;
use crate::consts::DEPLOYMENT_ID_PROPERTY;
use crate::model::{Assert, BindingIndex, ConfigurationUnit, ProfileType};
use crate::properties::{GlobalProperties, PropertySource};

pub use builder::ProfileBuilder;
pub use dependencies::UnitDependencies;

/// Options for linking a profile.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
  /// Check that every capability references a known definition.
  ///
  /// Disabled while upgrading old profiles whose definitions are incomplete.
  pub validate: bool,
}

impl Default for LoadOptions {
  fn default() -> Self {
    Self { validate: true }
  }
}

/// Index of a unit in its profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitHandle(usize);

#[derive(Debug)]
pub struct Profile {
  name: String,
  profile_type: ProfileType,
  auto_bind: bool,
  definitions: CapabilityDefinitions,
  units: Vec<ConfigurationUnit>,
  index: HashMap<String, UnitHandle>,
  bindings: BindingIndex,
  asserts: Vec<Assert>,
  dependencies: UnitDependencies,
  solution: PropertySource,
  deployment: PropertySource,
}

impl Profile {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn profile_type(&self) -> ProfileType {
    self.profile_type
  }

  pub fn auto_bind(&self) -> bool {
    self.auto_bind
  }

  pub fn definitions(&self) -> &CapabilityDefinitions {
    &self.definitions
  }

  pub fn handle(&self, id: &str) -> Option<UnitHandle> {
    self.index.get(id).copied()
  }

  pub fn get(&self, handle: UnitHandle) -> &ConfigurationUnit {
    &self.units[handle.0]
  }

  pub fn unit(&self, id: &str) -> Option<&ConfigurationUnit> {
    self.handle(id).map(|h| self.get(h))
  }

  /// Units in declaration order.
  pub fn units(&self) -> impl Iterator<Item = &ConfigurationUnit> {
    self.units.iter()
  }

  pub fn concrete_units(&self) -> impl Iterator<Item = &ConfigurationUnit> {
    self.units.iter().filter(|u| !u.is_abstract)
  }

  pub fn bindings(&self) -> &BindingIndex {
    &self.bindings
  }

  /// Profile-level asserts, evaluated in global scope.
  pub fn asserts(&self) -> &[Assert] {
    &self.asserts
  }

  pub fn dependencies(&self) -> &UnitDependencies {
    &self.dependencies
  }

  pub fn solution(&self) -> &PropertySource {
    &self.solution
  }

  pub fn deployment(&self) -> &PropertySource {
    &self.deployment
  }

  pub fn globals(&self, include_deployment: bool) -> GlobalProperties<'_> {
    GlobalProperties::new(&self.solution, include_deployment.then_some(&self.deployment))
  }

  /// `dcc.deployment.id` from the deployment properties, else the profile name.
  pub fn deployment_id(&self) -> &str {
    self.deployment.get(DEPLOYMENT_ID_PROPERTY).unwrap_or(self.name.as_str())
  }
}
