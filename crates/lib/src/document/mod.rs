//! Profile documents.
//!
//! A profile is written as YAML (or JSON) and read into plain reference
//! objects that name everything by id. [`ProfileDocument::into_builder`] turns
//! them into a [`ProfileBuilder`], whose `build` does the linking.
//!
//! ```yaml
//! name: shop
//! type: deployment
//! auto_bind: true
//! definitions:
//!   - id: db.endpoint
//!     attributes:
//!       - key: host
//!       - key: port
//!         default: "5432"
//! units:
//!   - id: db
//!     provides: [{ id: endpoint, definition: db.endpoint }]
//!     attributes:
//!       host: db01
//!   - id: app
//!     requires: [{ id: db, definition: db.endpoint }]
//! bindings:
//!   - source: db.endpoint
//!     target: app.db
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::capability::CapabilityDefinition;
use crate::error::ConfigError;
use crate::model::{
  Assert, Attribute, Binding, CapabilityRef, CommandDefinition, ConfigurationUnit, Mapping, ProfileType,
  ProvidedCapability, RequiredCapability,
};
use crate::profile::{LoadOptions, Profile, ProfileBuilder};
use crate::properties::PropertySource;

#[derive(Debug, Error)]
pub enum DocumentError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid YAML in {path}: {source}")]
  Yaml {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("invalid JSON in {path}: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid capability reference '{0}': expected <unit>.<capability>")]
  InvalidReference(String),

  #[error("attribute '{key}' of unit '{unit}' must be a scalar value")]
  InvalidAttribute { unit: String, key: String },

  #[error(transparent)]
  Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileDocument {
  pub name: String,
  #[serde(default, rename = "type")]
  pub profile_type: ProfileType,
  #[serde(default)]
  pub auto_bind: bool,
  #[serde(default)]
  pub definitions: Vec<CapabilityDefinition>,
  #[serde(default)]
  pub units: Vec<UnitDocument>,
  #[serde(default)]
  pub bindings: Vec<BindingDocument>,
  #[serde(default)]
  pub asserts: Vec<Assert>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitDocument {
  pub id: String,
  #[serde(default, rename = "abstract")]
  pub is_abstract: bool,
  #[serde(default)]
  pub parent: Option<String>,
  #[serde(default)]
  pub provides: Vec<ProvidedCapability>,
  #[serde(default)]
  pub requires: Vec<RequiredCapability>,
  /// Attribute values keyed by name, in document order.
  #[serde(default)]
  pub attributes: serde_yaml::Mapping,
  #[serde(default)]
  pub mappings: Vec<Mapping>,
  #[serde(default)]
  pub commands: Vec<CommandDefinition>,
  #[serde(default)]
  pub asserts: Vec<Assert>,
}

/// A binding with both ends written as `<unit>.<capability>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingDocument {
  pub source: String,
  pub target: String,
}

impl ProfileDocument {
  pub fn from_yaml_str(content: &str, path: &Path) -> Result<Self, DocumentError> {
    serde_yaml::from_str(content).map_err(|e| DocumentError::Yaml {
      path: path.to_path_buf(),
      source: e,
    })
  }

  pub fn from_json_str(content: &str, path: &Path) -> Result<Self, DocumentError> {
    serde_json::from_str(content).map_err(|e| DocumentError::Json {
      path: path.to_path_buf(),
      source: e,
    })
  }

  /// Read a document, choosing the format by file extension (YAML unless `.json`).
  pub fn read(path: &Path) -> Result<Self, DocumentError> {
    let content = fs::read_to_string(path).map_err(|e| DocumentError::Read {
      path: path.to_path_buf(),
      source: e,
    })?;
    match path.extension().and_then(|e| e.to_str()) {
      Some("json") => Self::from_json_str(&content, path),
      _ => Self::from_yaml_str(&content, path),
    }
  }

  /// Convert the reference objects into a builder ready for linking.
  pub fn into_builder(self) -> Result<ProfileBuilder, DocumentError> {
    let mut builder = ProfileBuilder::new(self.name)
      .profile_type(self.profile_type)
      .auto_bind(self.auto_bind);

    for definition in self.definitions {
      builder = builder.definition(definition);
    }
    for unit in self.units {
      builder = builder.unit(unit.into_unit()?);
    }
    for binding in self.bindings {
      let source = parse_reference(&binding.source)?;
      let target = parse_reference(&binding.target)?;
      builder = builder.binding(Binding::new(source, target));
    }
    for assert in self.asserts {
      builder = builder.assert(assert);
    }

    Ok(builder)
  }
}

impl UnitDocument {
  fn into_unit(self) -> Result<ConfigurationUnit, DocumentError> {
    let mut attributes = Vec::with_capacity(self.attributes.len());
    for (key, value) in &self.attributes {
      let (Some(key), Some(value)) = (scalar(key), scalar(value)) else {
        return Err(DocumentError::InvalidAttribute {
          unit: self.id.clone(),
          key: scalar(key).unwrap_or_default(),
        });
      };
      attributes.push(Attribute { key, value });
    }

    Ok(ConfigurationUnit {
      id: self.id,
      is_abstract: self.is_abstract,
      parent: self.parent,
      provided: self.provides,
      required: self.requires,
      attributes,
      mappings: self.mappings,
      commands: self.commands,
      asserts: self.asserts,
    })
  }
}

fn scalar(value: &serde_yaml::Value) -> Option<String> {
  use serde_yaml::Value;

  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    Value::Null => Some(String::new()),
    _ => None,
  }
}

/// Split `<unit>.<capability>` at the first dot.
fn parse_reference(reference: &str) -> Result<CapabilityRef, DocumentError> {
  match reference.split_once('.') {
    Some((unit, capability)) if !unit.is_empty() && !capability.is_empty() => Ok(CapabilityRef::new(unit, capability)),
    _ => Err(DocumentError::InvalidReference(reference.to_string())),
  }
}

/// Load and link a profile together with its property sources.
pub fn load_profile(
  path: &Path,
  solution: Option<&Path>,
  deployment: Option<&Path>,
  options: LoadOptions,
) -> Result<Profile, DocumentError> {
  debug!(path = %path.display(), "loading profile");
  let mut builder = ProfileDocument::read(path)?.into_builder()?;

  if let Some(solution) = solution {
    builder = builder.solution(PropertySource::load("solution", solution)?);
  }
  if let Some(deployment) = deployment {
    builder = builder.deployment(PropertySource::load("deployment", deployment)?);
  }

  Ok(builder.build(options)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  const SHOP: &str = r#"
name: shop
type: deployment
definitions:
  - id: db.endpoint
    attributes:
      - key: host
      - key: port
        default: "5432"
units:
  - id: db
    provides: [{ id: endpoint, definition: db.endpoint }]
    attributes:
      host: db01
      pool: 10
  - id: app
    requires: [{ id: db, definition: db.endpoint }]
    commands:
      - command: install
        package: app-pkg
bindings:
  - source: db.endpoint
    target: app.db
"#;

  #[test]
  fn yaml_document_links_into_profile() {
    let profile = ProfileDocument::from_yaml_str(SHOP, Path::new("shop.yaml"))
      .unwrap()
      .into_builder()
      .unwrap()
      .build(LoadOptions::default())
      .unwrap();

    assert_eq!(profile.name(), "shop");
    assert_eq!(profile.profile_type(), ProfileType::Deployment);
    assert_eq!(profile.unit("db").unwrap().attribute_value("pool"), Some("10"));
    assert!(profile.bindings().get("db.endpoint#app.db").is_some());
    assert_eq!(profile.unit("app").unwrap().commands[0].package, "app-pkg");
  }

  #[test]
  fn references_need_unit_and_capability() {
    assert_eq!(parse_reference("app.db.primary").unwrap(), CapabilityRef::new("app", "db.primary"));
    assert!(matches!(parse_reference("app"), Err(DocumentError::InvalidReference(_))));
    assert!(matches!(parse_reference(".db"), Err(DocumentError::InvalidReference(_))));
  }

  #[test]
  fn unknown_fields_are_rejected() {
    let result = ProfileDocument::from_yaml_str("name: x\nunits: []\nbogus: 1\n", Path::new("x.yaml"));
    assert!(matches!(result, Err(DocumentError::Yaml { .. })));
  }

  #[test]
  fn load_profile_reads_property_files() {
    let dir = tempfile::TempDir::new().unwrap();
    let profile_path = dir.path().join("shop.yaml");
    let deployment_path = dir.path().join("deployment.properties");
    fs::write(&profile_path, SHOP).unwrap();
    fs::write(&deployment_path, "db.port=6000\n").unwrap();

    let profile = load_profile(&profile_path, None, Some(&deployment_path), LoadOptions::default()).unwrap();
    assert_eq!(profile.deployment().get("db.port"), Some("6000"));
    assert!(profile.solution().is_empty());
  }

  #[test]
  fn structural_errors_surface_as_config_errors() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(
      &path,
      r#"{"name": "bad", "units": [{"id": "a", "parent": "b"}, {"id": "b", "parent": "a"}]}"#,
    )
    .unwrap();

    let err = load_profile(&path, None, None, LoadOptions::default()).unwrap_err();
    assert!(matches!(err, DocumentError::Config(ConfigError::CyclicUnitInheritance { .. })));
  }
}
