//! Capability definitions: the attribute schema shared by capabilities of one kind.
//!
//! Definitions may inherit attribute keys from ancestors. Inheritance is
//! flattened once when the registry is built, so every later lookup sees the
//! complete key set. An ancestor reference can carry a prefix that is
//! dot-joined onto every key it contributes.
//!
//! ```text
//! net.endpoint   { host, port }
//! db.endpoint    : net.endpoint (prefix "net") { schema }
//!   -> { schema, net.host, net.port }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// One attribute of a capability definition.
///
/// Two keys are equal when their names are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeKey {
  pub key: String,
  #[serde(default)]
  pub optional: bool,
  #[serde(default, rename = "default")]
  pub default_value: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
}

impl AttributeKey {
  pub fn new(key: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      optional: false,
      default_value: None,
      description: None,
    }
  }

  pub fn optional(mut self) -> Self {
    self.optional = true;
    self
  }

  pub fn with_default(mut self, value: impl Into<String>) -> Self {
    self.default_value = Some(value.into());
    self
  }

  fn prefixed(&self, prefix: Option<&str>) -> Self {
    let mut key = self.clone();
    if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
      key.key = format!("{prefix}.{}", self.key);
    }
    key
  }
}

impl PartialEq for AttributeKey {
  fn eq(&self, other: &Self) -> bool {
    self.key == other.key
  }
}

impl Eq for AttributeKey {}

impl Hash for AttributeKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.key.hash(state);
  }
}

/// Reference from a definition to one of its ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorRef {
  pub definition: String,
  #[serde(default)]
  pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDefinition {
  pub id: String,
  #[serde(default)]
  pub ancestors: Vec<AncestorRef>,
  #[serde(default, rename = "attributes")]
  pub attribute_keys: Vec<AttributeKey>,
  #[serde(default, rename = "abstract")]
  pub is_abstract: bool,
}

impl CapabilityDefinition {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      ancestors: Vec::new(),
      attribute_keys: Vec::new(),
      is_abstract: false,
    }
  }

  pub fn with_key(mut self, key: AttributeKey) -> Self {
    self.attribute_keys.push(key);
    self
  }

  pub fn with_ancestor(mut self, definition: impl Into<String>, prefix: Option<&str>) -> Self {
    self.ancestors.push(AncestorRef {
      definition: definition.into(),
      prefix: prefix.map(str::to_string),
    });
    self
  }

  pub fn abstract_(mut self) -> Self {
    self.is_abstract = true;
    self
  }

  pub fn attribute_key(&self, key: &str) -> Option<&AttributeKey> {
    self.attribute_keys.iter().find(|k| k.key == key)
  }

  pub fn mandatory_keys(&self) -> impl Iterator<Item = &AttributeKey> {
    self.attribute_keys.iter().filter(|k| !k.optional)
  }
}

/// Registry of capability definitions with inheritance already flattened.
#[derive(Debug, Clone, Default)]
pub struct CapabilityDefinitions {
  definitions: BTreeMap<String, CapabilityDefinition>,
}

impl CapabilityDefinitions {
  /// Build the registry, flattening ancestor keys into every definition.
  ///
  /// # Errors
  ///
  /// - `CyclicCapabilityDefinition` when a definition reaches itself through
  ///   its ancestors.
  /// - `DuplicateAttributeKey` when two keys end up with the same name after
  ///   prefixing.
  /// - `UnknownCapabilityDefinition` when an ancestor does not exist.
  pub fn build(definitions: impl IntoIterator<Item = CapabilityDefinition>) -> Result<Self, ConfigError> {
    let raw: BTreeMap<String, CapabilityDefinition> = definitions.into_iter().map(|d| (d.id.clone(), d)).collect();

    let mut flattened: HashMap<String, Vec<AttributeKey>> = HashMap::new();
    for id in raw.keys() {
      let mut stack = Vec::new();
      flatten_keys(id, &raw, &mut flattened, &mut stack)?;
    }

    let definitions = raw
      .into_iter()
      .map(|(id, mut definition)| {
        if let Some(keys) = flattened.remove(&id) {
          definition.attribute_keys = keys;
        }
        // Ancestors are folded in; keep the references for introspection only.
        (id, definition)
      })
      .collect();

    Ok(Self { definitions })
  }

  pub fn get(&self, id: &str) -> Option<&CapabilityDefinition> {
    self.definitions.get(id)
  }

  pub fn contains(&self, id: &str) -> bool {
    self.definitions.contains_key(id)
  }

  pub fn iter(&self) -> impl Iterator<Item = &CapabilityDefinition> {
    self.definitions.values()
  }

  pub fn len(&self) -> usize {
    self.definitions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.definitions.is_empty()
  }
}

fn flatten_keys(
  id: &str,
  raw: &BTreeMap<String, CapabilityDefinition>,
  done: &mut HashMap<String, Vec<AttributeKey>>,
  stack: &mut Vec<String>,
) -> Result<Vec<AttributeKey>, ConfigError> {
  if let Some(keys) = done.get(id) {
    return Ok(keys.clone());
  }

  if stack.iter().any(|s| s == id) {
    let mut chain = stack.clone();
    chain.push(id.to_string());
    return Err(ConfigError::CyclicCapabilityDefinition {
      chain: chain.join(" -> "),
    });
  }

  let definition = raw.get(id).ok_or_else(|| ConfigError::UnknownCapabilityDefinition {
    id: id.to_string(),
    referenced_by: stack.last().cloned().unwrap_or_default(),
  })?;

  stack.push(id.to_string());

  let mut keys: Vec<AttributeKey> = Vec::new();
  let mut push = |key: AttributeKey| -> Result<(), ConfigError> {
    if keys.contains(&key) {
      return Err(ConfigError::DuplicateAttributeKey {
        definition: id.to_string(),
        key: key.key,
      });
    }
    keys.push(key);
    Ok(())
  };

  for key in &definition.attribute_keys {
    push(key.clone())?;
  }

  for ancestor in &definition.ancestors {
    let inherited = flatten_keys(&ancestor.definition, raw, done, stack)?;
    for key in inherited {
      push(key.prefixed(ancestor.prefix.as_deref()))?;
    }
  }

  stack.pop();

  debug!(definition = %id, keys = keys.len(), "flattened capability definition");
  done.insert(id.to_string(), keys.clone());
  Ok(keys)
}
