//! Two-phase profile construction: collect plain data, then link it.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::capability::{CapabilityDefinition, CapabilityDefinitions};
use crate::error::ConfigError;
use crate::model::{Assert, Binding, BindingIndex, CapabilityRef, ConfigurationUnit, ProfileType};
use crate::properties::PropertySource;

use super::autobind::auto_bind;
use super::dependencies::UnitDependencies;
use super::{LoadOptions, Profile, UnitHandle};

/// Collects the parts of a profile by id and links them in [`ProfileBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct ProfileBuilder {
  name: String,
  profile_type: ProfileType,
  auto_bind: bool,
  definitions: Vec<CapabilityDefinition>,
  units: Vec<ConfigurationUnit>,
  bindings: Vec<Binding>,
  asserts: Vec<Assert>,
  solution: Option<PropertySource>,
  deployment: Option<PropertySource>,
}

impl ProfileBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  pub fn profile_type(mut self, profile_type: ProfileType) -> Self {
    self.profile_type = profile_type;
    self
  }

  pub fn auto_bind(mut self, enabled: bool) -> Self {
    self.auto_bind = enabled;
    self
  }

  pub fn definition(mut self, definition: CapabilityDefinition) -> Self {
    self.definitions.push(definition);
    self
  }

  pub fn unit(mut self, unit: ConfigurationUnit) -> Self {
    self.units.push(unit);
    self
  }

  pub fn binding(mut self, binding: Binding) -> Self {
    self.bindings.push(binding);
    self
  }

  pub fn assert(mut self, assert: Assert) -> Self {
    self.asserts.push(assert);
    self
  }

  pub fn solution(mut self, source: PropertySource) -> Self {
    self.solution = Some(source);
    self
  }

  pub fn deployment(mut self, source: PropertySource) -> Self {
    self.deployment = Some(source);
    self
  }

  /// Link everything into a [`Profile`].
  ///
  /// Flattens definition and unit inheritance, checks binding endpoints,
  /// auto-binds (deployment profiles only) and computes unit dependencies.
  pub fn build(self, options: LoadOptions) -> Result<Profile, ConfigError> {
    let definitions = CapabilityDefinitions::build(self.definitions)?;

    let mut index = HashMap::new();
    for (i, unit) in self.units.iter().enumerate() {
      if index.insert(unit.id.clone(), UnitHandle(i)).is_some() {
        return Err(ConfigError::DuplicateUnit(unit.id.clone()));
      }
    }

    let units = link_units(self.units, &index)?;

    if options.validate {
      check_definitions(&units, &definitions)?;
    }

    let mut bindings = BindingIndex::default();
    for binding in self.bindings {
      check_binding(&binding, &units, &index)?;
      let id = binding.id();
      if !bindings.insert(binding) {
        debug!(binding = %id, "duplicate binding ignored");
      }
    }

    if self.profile_type == ProfileType::Deployment && self.auto_bind {
      let added = auto_bind(&units, &mut bindings)?;
      debug!(added, "auto-binding complete");
    }

    let dependencies = UnitDependencies::calculate(units.iter().map(|u| u.id.as_str()), &bindings)?;

    info!(
      profile = %self.name,
      units = units.len(),
      bindings = bindings.len(),
      "profile linked"
    );

    Ok(Profile {
      name: self.name,
      profile_type: self.profile_type,
      auto_bind: self.auto_bind,
      definitions,
      units,
      index,
      bindings,
      asserts: self.asserts,
      dependencies,
      solution: self.solution.unwrap_or_else(|| PropertySource::new("solution")),
      deployment: self.deployment.unwrap_or_else(|| PropertySource::new("deployment")),
    })
  }
}

/// Resolve parent inheritance for every unit.
fn link_units(
  raw: Vec<ConfigurationUnit>,
  index: &HashMap<String, UnitHandle>,
) -> Result<Vec<ConfigurationUnit>, ConfigError> {
  let mut linked: Vec<Option<ConfigurationUnit>> = vec![None; raw.len()];
  for i in 0..raw.len() {
    let mut stack = Vec::new();
    link_unit(i, &raw, index, &mut linked, &mut stack)?;
  }
  Ok(linked.into_iter().flatten().collect())
}

fn link_unit(
  i: usize,
  raw: &[ConfigurationUnit],
  index: &HashMap<String, UnitHandle>,
  linked: &mut Vec<Option<ConfigurationUnit>>,
  stack: &mut Vec<String>,
) -> Result<(), ConfigError> {
  if linked[i].is_some() {
    return Ok(());
  }

  let unit = &raw[i];
  if let Some(pos) = stack.iter().position(|id| *id == unit.id) {
    let mut chain = stack[pos..].to_vec();
    chain.push(unit.id.clone());
    return Err(ConfigError::CyclicUnitInheritance {
      chain: chain.join(" -> "),
    });
  }

  let mut result = unit.clone();
  result.dedup_capabilities();

  if let Some(parent_id) = &unit.parent {
    let UnitHandle(parent) = *index
      .get(parent_id)
      .ok_or_else(|| ConfigError::UnknownUnit(parent_id.clone()))?;

    stack.push(unit.id.clone());
    link_unit(parent, raw, index, linked, stack)?;
    stack.pop();

    if let Some(parent) = &linked[parent] {
      result.inherit_from(parent);
    }
  }

  linked[i] = Some(result);
  Ok(())
}

fn check_definitions(units: &[ConfigurationUnit], definitions: &CapabilityDefinitions) -> Result<(), ConfigError> {
  for unit in units {
    let capabilities = unit
      .provided
      .iter()
      .map(|c| (&c.id, &c.definition))
      .chain(unit.required.iter().map(|c| (&c.id, &c.definition)));
    for (id, definition) in capabilities {
      if !definitions.contains(definition) {
        return Err(ConfigError::UnknownCapabilityDefinition {
          id: definition.clone(),
          referenced_by: unit.capability_ref(id).unique_id(),
        });
      }
    }
  }
  Ok(())
}

fn check_binding(
  binding: &Binding,
  units: &[ConfigurationUnit],
  index: &HashMap<String, UnitHandle>,
) -> Result<(), ConfigError> {
  let find = |capability: &CapabilityRef| index.get(&capability.unit).map(|UnitHandle(i)| &units[*i]);

  let source_ok = find(&binding.source).is_some_and(|u| u.provided_capability(&binding.source.capability).is_some());
  if !source_ok {
    return Err(ConfigError::MissingBindingCapability {
      binding: binding.id(),
      capability: binding.source.unique_id(),
    });
  }

  let target_ok = find(&binding.target).is_some_and(|u| u.required_capability(&binding.target.capability).is_some());
  if !target_ok {
    return Err(ConfigError::MissingBindingCapability {
      binding: binding.id(),
      capability: binding.target.unique_id(),
    });
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn child_units_inherit_from_parents() {
    let profile = ProfileBuilder::new("p")
      .definition(CapabilityDefinition::new("http"))
      .unit(
        ConfigurationUnit::new("web-base")
          .abstract_()
          .provides("http", "http")
          .attribute("port", "80"),
      )
      .unit(ConfigurationUnit::new("web").with_parent("web-base").attribute("name", "shop"))
      .build(LoadOptions::default())
      .unwrap();

    let web = profile.unit("web").unwrap();
    assert!(!web.is_abstract);
    assert!(web.provided_capability("http").is_some());
    assert_eq!(web.attribute_value("port"), Some("80"));
    assert_eq!(web.attribute_value("name"), Some("shop"));
  }

  #[test]
  fn grandparents_are_inherited_in_order() {
    let profile = ProfileBuilder::new("p")
      .unit(ConfigurationUnit::new("c").with_parent("b").attribute("x", "c"))
      .unit(ConfigurationUnit::new("b").with_parent("a").attribute("y", "b"))
      .unit(ConfigurationUnit::new("a").attribute("x", "a").attribute("y", "a").attribute("z", "a"))
      .build(LoadOptions::default())
      .unwrap();

    let c = profile.unit("c").unwrap();
    assert_eq!(c.attribute_value("x"), Some("c"));
    assert_eq!(c.attribute_value("y"), Some("b"));
    assert_eq!(c.attribute_value("z"), Some("a"));
  }

  #[test]
  fn parent_cycles_and_unknown_parents() {
    let err = ProfileBuilder::new("p")
      .unit(ConfigurationUnit::new("a").with_parent("b"))
      .unit(ConfigurationUnit::new("b").with_parent("a"))
      .build(LoadOptions::default())
      .unwrap_err();
    assert_eq!(
      err,
      ConfigError::CyclicUnitInheritance {
        chain: "a -> b -> a".to_string()
      }
    );

    let err = ProfileBuilder::new("p")
      .unit(ConfigurationUnit::new("a").with_parent("ghost"))
      .build(LoadOptions::default())
      .unwrap_err();
    assert_eq!(err, ConfigError::UnknownUnit("ghost".to_string()));
  }

  #[test]
  fn bindings_must_name_existing_capabilities() {
    let builder = ProfileBuilder::new("p")
      .definition(CapabilityDefinition::new("db"))
      .unit(ConfigurationUnit::new("db").provides("out", "db"))
      .unit(ConfigurationUnit::new("app").requires("db", "db"));

    let err = builder
      .clone()
      .binding(Binding::new(CapabilityRef::new("db", "missing"), CapabilityRef::new("app", "db")))
      .build(LoadOptions::default())
      .unwrap_err();
    assert_eq!(
      err,
      ConfigError::MissingBindingCapability {
        binding: "db.missing#app.db".to_string(),
        capability: "db.missing".to_string(),
      }
    );

    let err = builder
      .binding(Binding::new(CapabilityRef::new("db", "out"), CapabilityRef::new("app", "cache")))
      .build(LoadOptions::default())
      .unwrap_err();
    assert!(matches!(err, ConfigError::MissingBindingCapability { ref capability, .. } if capability == "app.cache"));
  }

  #[test]
  fn unknown_definitions_only_fail_when_validating() {
    let builder = ProfileBuilder::new("p").unit(ConfigurationUnit::new("app").requires("db", "db.endpoint"));

    assert!(matches!(
      builder.clone().build(LoadOptions::default()),
      Err(ConfigError::UnknownCapabilityDefinition { ref referenced_by, .. }) if referenced_by == "app.db"
    ));
    assert!(builder.build(LoadOptions { validate: false }).is_ok());
  }
}
