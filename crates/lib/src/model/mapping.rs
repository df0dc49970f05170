//! Mappings populate a capability of the owning unit from unit-local values.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
  pub id: String,
  /// Capability of the owning unit (required or provided) that receives values.
  pub target: String,
  #[serde(default)]
  pub mappers: Vec<AttributeMapper>,
}

impl Mapping {
  pub fn new(id: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      target: target.into(),
      mappers: Vec::new(),
    }
  }

  pub fn with(mut self, mapper: AttributeMapper) -> Self {
    self.mappers.push(mapper);
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeMapper {
  /// Copy unit attributes into the target, key for key.
  ///
  /// With an empty `keys` list every attribute key of the target's
  /// definition is copied.
  Unit {
    #[serde(default)]
    keys: Vec<String>,
  },

  /// Copy another capability of the same unit into the target.
  ///
  /// Only source keys starting with `source_prefix.` are taken (prefix
  /// stripped); `target_prefix.` is prepended before writing.
  Capability {
    source: String,
    #[serde(default)]
    source_prefix: Option<String>,
    #[serde(default)]
    target_prefix: Option<String>,
  },

  /// Derive a single attribute from a unit-scoped expression.
  Expression { key: String, expression: String },
}

impl AttributeMapper {
  /// Rewrite a source key for a capability-to-capability copy.
  ///
  /// Returns `None` when the key does not carry the expected source prefix.
  pub fn rewrite_key(key: &str, source_prefix: Option<&str>, target_prefix: Option<&str>) -> Option<String> {
    let stripped = match source_prefix.filter(|p| !p.is_empty()) {
      Some(prefix) => key.strip_prefix(prefix)?.strip_prefix('.')?,
      None => key,
    };
    Some(match target_prefix.filter(|p| !p.is_empty()) {
      Some(prefix) => format!("{prefix}.{stripped}"),
      None => stripped.to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rewrite_strips_and_adds_prefixes() {
    assert_eq!(
      AttributeMapper::rewrite_key("jdbc.url", Some("jdbc"), Some("ds")),
      Some("ds.url".to_string())
    );
    assert_eq!(AttributeMapper::rewrite_key("url", None, None), Some("url".to_string()));
    assert_eq!(AttributeMapper::rewrite_key("other.url", Some("jdbc"), None), None);
    assert_eq!(AttributeMapper::rewrite_key("jdbcurl", Some("jdbc"), None), None);
  }
}
