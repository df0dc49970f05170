//! Deployment profile validation.
//!
//! [`validate`] evaluates a deployment profile with deployment properties
//! included and then checks it as a whole. Failures are collected across the
//! entire profile and reported together as one [`ValidationError::Failed`];
//! advisory findings are logged as warnings and only fail the run in strict
//! mode.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::PREDEFINED_PREFIX;
use crate::error::ConfigError;
use crate::model::{Assert, ConfigurationUnit, ProfileType};
use crate::placeholder;
use crate::profile::Profile;
use crate::properties::{EvaluateOptions, Evaluator, PropertiesHolder, Scope};

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
  /// Treat advisory warnings as failures.
  pub strict: bool,
}

#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("profile validation failed with {count} error(s):\n{report}")]
  Failed { count: usize, report: String },

  #[error(transparent)]
  Config(#[from] ConfigError),
}

/// Outcome of a successful validation.
#[derive(Debug)]
pub struct ValidationReport {
  /// Advisory findings, already logged.
  pub warnings: Vec<String>,
  /// The evaluation the checks ran against.
  pub properties: PropertiesHolder,
}

/// Validate a deployment profile.
///
/// Profiles of any other type are evaluated but not checked.
///
/// # Errors
///
/// - `Config` when evaluation hits a configuration error.
/// - `Failed` with every failure found, sorted and numbered.
pub fn validate(profile: &Profile, options: ValidateOptions) -> Result<ValidationReport, ValidationError> {
  let mut holder = PropertiesHolder::new(EvaluateOptions::default().include_deployment);
  let mut failures = Vec::new();
  let mut warnings = Vec::new();

  {
    let mut evaluator = Evaluator::new(profile, &mut holder);
    evaluator.evaluate_all()?;

    if profile.profile_type() != ProfileType::Deployment {
      debug!(profile = %profile.name(), "not a deployment profile, skipping checks");
      drop(evaluator);
      return Ok(ValidationReport {
        warnings,
        properties: holder,
      });
    }

    check_asserts(profile, &mut evaluator, &mut failures)?;
  }

  for unit in profile.concrete_units() {
    check_mandatory_keys(profile, unit, &holder, &mut failures);
    check_bindings(profile, unit, &mut failures);
    check_abstract_definitions(profile, unit, &mut failures);
    unused_attributes(unit, &holder, &mut warnings);
  }
  unused_properties(profile, &holder, &mut warnings);
  unresolved_placeholders(profile, &holder, &mut warnings);

  for warning in &warnings {
    warn!("{warning}");
  }
  if options.strict {
    failures.append(&mut warnings);
  }

  if failures.is_empty() {
    info!(profile = %profile.name(), warnings = warnings.len(), "profile is valid");
    return Ok(ValidationReport {
      warnings,
      properties: holder,
    });
  }

  failures.sort();
  failures.dedup();
  let report = failures
    .iter()
    .enumerate()
    .map(|(i, f)| format!("{}. {f}", i + 1))
    .collect::<Vec<_>>()
    .join("\n");

  Err(ValidationError::Failed {
    count: failures.len(),
    report,
  })
}

fn check_mandatory_keys(
  profile: &Profile,
  unit: &ConfigurationUnit,
  holder: &PropertiesHolder,
  failures: &mut Vec<String>,
) {
  for capability in &unit.provided {
    let Some(definition) = profile.definitions().get(&capability.definition) else {
      continue;
    };
    let unique_id = unit.capability_ref(&capability.id).unique_id();
    for key in definition.mandatory_keys() {
      let blank = holder
        .get(&unique_id, &key.key)
        .is_none_or(|v| placeholder::strip_predefined(v).trim().is_empty());
      if blank {
        failures.push(format!(
          "capability '{unique_id}' has no value for mandatory attribute '{}'",
          key.key
        ));
      }
    }
  }
}

fn check_bindings(profile: &Profile, unit: &ConfigurationUnit, failures: &mut Vec<String>) {
  for required in &unit.required {
    let target = unit.capability_ref(&required.id);
    let bound = profile.bindings().targeting(&target);

    if bound.is_empty() && !required.optional {
      failures.push(format!("required capability '{target}' is not bound"));
    }
    if bound.len() > 1 && !required.multiple_bindings_allowed {
      let providers: Vec<String> = bound.iter().map(|b| b.source.unique_id()).collect();
      failures.push(format!(
        "required capability '{target}' is bound {} times ({}) but allows a single binding",
        bound.len(),
        providers.join(", ")
      ));
    }
  }
}

fn check_abstract_definitions(profile: &Profile, unit: &ConfigurationUnit, failures: &mut Vec<String>) {
  let capabilities = unit
    .provided
    .iter()
    .map(|c| (&c.id, &c.definition))
    .chain(unit.required.iter().map(|c| (&c.id, &c.definition)));

  for (id, definition) in capabilities {
    if profile.definitions().get(definition).is_some_and(|d| d.is_abstract) {
      failures.push(format!(
        "capability '{}' references abstract definition '{definition}'",
        unit.capability_ref(id)
      ));
    }
  }
}

/// A unique assert's evaluated value.
struct UniqueValue {
  value: String,
  message: String,
}

fn check_asserts(
  profile: &Profile,
  evaluator: &mut Evaluator<'_, '_>,
  failures: &mut Vec<String>,
) -> Result<(), ConfigError> {
  let scoped = profile
    .concrete_units()
    .flat_map(|u| u.asserts.iter().map(move |a| (a, Scope::unit(&u.id))))
    .chain(profile.asserts().iter().map(|a| (a, Scope::Global)));

  let mut unique: BTreeMap<(Option<String>, String), Vec<UniqueValue>> = BTreeMap::new();

  for (assert, scope) in scoped {
    let message = evaluator.render(assert.message(), &scope)?;
    match assert {
      Assert::Unique { expression, group, .. } => {
        let value = evaluator.render(expression, &scope)?;
        if value.trim().is_empty() || !placeholder::unresolved(&value).is_empty() {
          debug!(expression = %expression, "unique assert has no value");
          continue;
        }
        unique
          .entry((group.clone(), value.to_lowercase()))
          .or_default()
          .push(UniqueValue { value, message });
      }
      Assert::IsTrue { expression, .. } => {
        if evaluator.read_bool(expression, &scope)? == Some(false) {
          failures.push(message);
        }
      }
    }
  }

  for entries in unique.into_values().filter(|e| e.len() > 1) {
    let messages: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
    failures.push(format!(
      "value '{}' is not unique: {}",
      entries[0].value,
      messages.join("; ")
    ));
  }

  Ok(())
}

fn unused_attributes(unit: &ConfigurationUnit, holder: &PropertiesHolder, warnings: &mut Vec<String>) {
  for attribute in &unit.attributes {
    if !holder.is_attribute_used(&unit.id, &attribute.key) {
      warnings.push(format!("attribute '{}' of unit '{}' is never used", attribute.key, unit.id));
    }
  }
}

fn unused_properties(profile: &Profile, holder: &PropertiesHolder, warnings: &mut Vec<String>) {
  for key in profile.globals(holder.includes_deployment()).keys() {
    if !key.starts_with(PREDEFINED_PREFIX) && !holder.is_relevant(key) {
      warnings.push(format!("property '{key}' is never used"));
    }
  }
}

/// Binding bags (`src#tgt`) and required-capability bags copy the bound
/// provider's values, so a leftover is reported only where it originates.
fn unresolved_placeholders(profile: &Profile, holder: &PropertiesHolder, warnings: &mut Vec<String>) {
  let copies: BTreeSet<String> = profile
    .units()
    .flat_map(|unit| unit.required.iter().map(|r| unit.capability_ref(&r.id).unique_id()))
    .collect();

  for id in holder.ids() {
    if id.contains('#') || copies.contains(id) {
      continue;
    }
    let Some(bag) = holder.bag(id) else {
      continue;
    };
    for (key, value) in bag {
      let leftovers = placeholder::unresolved(value);
      if !leftovers.is_empty() {
        warnings.push(format!("'{id}' property '{key}' has unresolved {}", leftovers.join(", ")));
      }
    }
  }
}
