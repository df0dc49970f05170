//! Automatic binding of required capabilities in deployment profiles.

use tracing::{debug, info};

use crate::error::ConfigError;
use crate::model::{Binding, BindingIndex, CapabilityRef, ConfigurationUnit};

/// Bind every unbound required capability of every concrete unit to the one
/// concrete unit providing its definition. Returns the number of bindings added.
///
/// # Errors
///
/// - `NoAutoBindProvider` when nobody provides a mandatory capability.
/// - `AmbiguousAutoBind` when several units provide it.
/// - `AmbiguousProvider` when a candidate provides the definition twice.
pub(crate) fn auto_bind(units: &[ConfigurationUnit], bindings: &mut BindingIndex) -> Result<usize, ConfigError> {
  let mut added = 0;

  for unit in units.iter().filter(|u| !u.is_abstract) {
    for required in &unit.required {
      let target = unit.capability_ref(&required.id);
      if bindings.has_target(&target) {
        continue;
      }

      let mut candidates: Vec<CapabilityRef> = Vec::new();
      for provider in units.iter().filter(|u| !u.is_abstract && u.id != unit.id) {
        let mut matching = provider.provided.iter().filter(|c| c.definition == required.definition);
        let Some(capability) = matching.next() else {
          continue;
        };
        if matching.next().is_some() {
          return Err(ConfigError::AmbiguousProvider {
            unit: provider.id.clone(),
            definition: required.definition.clone(),
          });
        }
        candidates.push(provider.capability_ref(&capability.id));
      }
      candidates.sort();

      match candidates.len() {
        0 if required.optional => {
          debug!(unit = %unit.id, capability = %required.id, "no provider for optional capability");
        }
        0 => {
          return Err(ConfigError::NoAutoBindProvider {
            unit: unit.id.clone(),
            capability: required.id.clone(),
            definition: required.definition.clone(),
          });
        }
        1 => {
          let mut binding = Binding::new(candidates.remove(0), target);
          binding.auto_bound = true;
          info!(binding = %binding.id(), "auto-bound capability");
          bindings.insert(binding);
          added += 1;
        }
        _ => {
          return Err(ConfigError::AmbiguousAutoBind {
            unit: unit.id.clone(),
            capability: required.id.clone(),
            definition: required.definition.clone(),
            candidates: candidates.into_iter().map(|c| c.unit).collect(),
          });
        }
      }
    }
  }

  Ok(added)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn single_provider_is_bound() {
    let units = vec![
      ConfigurationUnit::new("db").provides("endpoint", "db.endpoint"),
      ConfigurationUnit::new("app").requires("db", "db.endpoint"),
    ];
    let mut bindings = BindingIndex::default();

    assert_eq!(auto_bind(&units, &mut bindings).unwrap(), 1);
    let binding = bindings.get("db.endpoint#app.db").unwrap();
    assert!(binding.auto_bound);
  }

  #[test]
  fn explicit_bindings_are_left_alone() {
    let units = vec![
      ConfigurationUnit::new("c1").provides("out", "cache"),
      ConfigurationUnit::new("c2").provides("out", "cache"),
      ConfigurationUnit::new("app").requires("cache", "cache"),
    ];
    let mut bindings = BindingIndex::default();
    bindings.insert(Binding::new(CapabilityRef::new("c2", "out"), CapabilityRef::new("app", "cache")));

    assert_eq!(auto_bind(&units, &mut bindings).unwrap(), 0);
    assert_eq!(bindings.len(), 1);
  }

  #[test]
  fn several_providers_are_ambiguous() {
    let units = vec![
      ConfigurationUnit::new("redis-b").provides("out", "cache.endpoint"),
      ConfigurationUnit::new("redis-a").provides("out", "cache.endpoint"),
      ConfigurationUnit::new("app").requires("cache", "cache.endpoint"),
    ];

    let err = auto_bind(&units, &mut BindingIndex::default()).unwrap_err();
    assert_eq!(
      err,
      ConfigError::AmbiguousAutoBind {
        unit: "app".to_string(),
        capability: "cache".to_string(),
        definition: "cache.endpoint".to_string(),
        candidates: vec!["redis-a".to_string(), "redis-b".to_string()],
      }
    );
    assert!(err.to_string().contains("redis-a, redis-b"));
  }

  #[test]
  fn abstract_units_are_neither_bound_nor_candidates() {
    let units = vec![
      ConfigurationUnit::new("template").abstract_().provides("out", "cache"),
      ConfigurationUnit::new("base").abstract_().requires("cache", "cache"),
      ConfigurationUnit::new("real").provides("out", "cache"),
    ];
    let mut bindings = BindingIndex::default();

    assert_eq!(auto_bind(&units, &mut bindings).unwrap(), 0);
  }

  #[test]
  fn missing_provider() {
    let mut optional = ConfigurationUnit::new("app").requires("mail", "smtp");
    optional.required[0].optional = true;
    assert_eq!(auto_bind(&[optional], &mut BindingIndex::default()).unwrap(), 0);

    let mandatory = ConfigurationUnit::new("app").requires("mail", "smtp");
    assert!(matches!(
      auto_bind(&[mandatory], &mut BindingIndex::default()),
      Err(ConfigError::NoAutoBindProvider { .. })
    ));
  }

  #[test]
  fn provider_with_two_matching_capabilities() {
    let units = vec![
      ConfigurationUnit::new("db").provides("a", "sql").provides("b", "sql"),
      ConfigurationUnit::new("app").requires("db", "sql"),
    ];
    assert!(matches!(
      auto_bind(&units, &mut BindingIndex::default()),
      Err(ConfigError::AmbiguousProvider { .. })
    ));
  }
}
