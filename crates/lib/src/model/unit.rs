//! Configuration units and the capabilities they provide or require.

use serde::{Deserialize, Serialize};

use super::command::{CommandDefinition, LifecycleCommand};
use super::mapping::Mapping;
use super::Assert;

/// Addresses one capability of one unit.
///
/// The unique id (`<unit>.<capability>`) is the key under which the
/// capability's resolved properties are stored and overridden.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CapabilityRef {
  pub unit: String,
  pub capability: String,
}

impl CapabilityRef {
  pub fn new(unit: impl Into<String>, capability: impl Into<String>) -> Self {
    Self {
      unit: unit.into(),
      capability: capability.into(),
    }
  }

  pub fn unique_id(&self) -> String {
    format!("{}.{}", self.unit, self.capability)
  }
}

impl std::fmt::Display for CapabilityRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}.{}", self.unit, self.capability)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidedCapability {
  pub id: String,
  pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredCapability {
  pub id: String,
  pub definition: String,
  #[serde(default)]
  pub optional: bool,
  #[serde(default, rename = "multiple")]
  pub multiple_bindings_allowed: bool,
  #[serde(default)]
  pub identifies_host: bool,
}

/// A static attribute whose value may contain `${...}` and `%{...}` expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
  pub key: String,
  pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationUnit {
  pub id: String,
  #[serde(default, rename = "abstract")]
  pub is_abstract: bool,
  #[serde(default)]
  pub parent: Option<String>,
  #[serde(default, rename = "provides")]
  pub provided: Vec<ProvidedCapability>,
  #[serde(default, rename = "requires")]
  pub required: Vec<RequiredCapability>,
  #[serde(default)]
  pub attributes: Vec<Attribute>,
  #[serde(default)]
  pub mappings: Vec<Mapping>,
  #[serde(default)]
  pub commands: Vec<CommandDefinition>,
  #[serde(default)]
  pub asserts: Vec<Assert>,
}

impl ConfigurationUnit {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      ..Default::default()
    }
  }

  pub fn abstract_(mut self) -> Self {
    self.is_abstract = true;
    self
  }

  pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
    self.parent = Some(parent.into());
    self
  }

  pub fn provides(mut self, id: impl Into<String>, definition: impl Into<String>) -> Self {
    self.provided.push(ProvidedCapability {
      id: id.into(),
      definition: definition.into(),
    });
    self
  }

  pub fn requires(self, id: impl Into<String>, definition: impl Into<String>) -> Self {
    self.with_required(RequiredCapability {
      id: id.into(),
      definition: definition.into(),
      optional: false,
      multiple_bindings_allowed: false,
      identifies_host: false,
    })
  }

  pub fn with_required(mut self, required: RequiredCapability) -> Self {
    self.required.push(required);
    self
  }

  pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.attributes.push(Attribute {
      key: key.into(),
      value: value.into(),
    });
    self
  }

  pub fn with_mapping(mut self, mapping: Mapping) -> Self {
    self.mappings.push(mapping);
    self
  }

  pub fn with_command(mut self, command: CommandDefinition) -> Self {
    self.commands.push(command);
    self
  }

  pub fn with_assert(mut self, assert: Assert) -> Self {
    self.asserts.push(assert);
    self
  }

  pub fn provided_capability(&self, id: &str) -> Option<&ProvidedCapability> {
    self.provided.iter().find(|c| c.id == id)
  }

  pub fn required_capability(&self, id: &str) -> Option<&RequiredCapability> {
    self.required.iter().find(|c| c.id == id)
  }

  pub fn attribute_value(&self, key: &str) -> Option<&str> {
    self.attributes.iter().find(|a| a.key == key).map(|a| a.value.as_str())
  }

  pub fn command(&self, command: LifecycleCommand) -> Option<&CommandDefinition> {
    self.commands.iter().find(|c| c.command == command)
  }

  /// Definition id of a capability of this unit, required first.
  pub fn capability_definition(&self, id: &str) -> Option<&str> {
    self
      .required_capability(id)
      .map(|c| c.definition.as_str())
      .or_else(|| self.provided_capability(id).map(|c| c.definition.as_str()))
  }

  pub fn capability_ref(&self, capability: &str) -> CapabilityRef {
    CapabilityRef::new(&self.id, capability)
  }

  /// Merge this unit over its parent: the child's entries win.
  ///
  /// Capabilities and attributes declared twice keep only the last
  /// occurrence; mappings and asserts accumulate parent-first.
  pub(crate) fn inherit_from(&mut self, parent: &ConfigurationUnit) {
    self.provided = keep_last(parent.provided.iter().chain(&self.provided).cloned(), |c| c.id.clone());
    self.required = keep_last(parent.required.iter().chain(&self.required).cloned(), |c| c.id.clone());
    self.attributes = keep_last(parent.attributes.iter().chain(&self.attributes).cloned(), |a| a.key.clone());
    self.commands = keep_last(parent.commands.iter().chain(&self.commands).cloned(), |c| c.command);
    self.mappings = parent.mappings.iter().chain(&self.mappings).cloned().collect();
    self.asserts = parent.asserts.iter().chain(&self.asserts).cloned().collect();
  }

  /// Drop duplicated capabilities declared directly on this unit.
  pub(crate) fn dedup_capabilities(&mut self) {
    self.provided = keep_last(self.provided.drain(..), |c| c.id.clone());
    self.required = keep_last(self.required.drain(..), |c| c.id.clone());
  }
}

/// Keep the last occurrence of every key, in the position of that last occurrence.
fn keep_last<T, K: PartialEq>(items: impl IntoIterator<Item = T>, key: impl Fn(&T) -> K) -> Vec<T> {
  let items: Vec<T> = items.into_iter().collect();
  let keys: Vec<K> = items.iter().map(&key).collect();
  items
    .into_iter()
    .enumerate()
    .filter(|(i, _)| !keys[i + 1..].contains(&keys[*i]))
    .map(|(_, item)| item)
    .collect()
}
