//! Profile evaluation: fills a [`PropertiesHolder`] with the resolved bags of
//! every unit and capability.
//!
//! A unit is evaluated in four steps:
//!
//! 1. bindings targeting its required capabilities (source units first)
//! 2. its declared attributes
//! 3. its mappings
//! 4. finalization of every capability bag against its definition
//!
//! Templates are rendered by substituting `${...}` placeholders and then
//! splicing in `%{...}` expressions. A template that fails either pass is kept
//! literally.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::capability::AttributeKey;
use crate::consts::{CAPABILITY_DEFINITION_PROPERTY, CAPABILITY_ID_PROPERTY, UNIT_ID_PROPERTY};
use crate::error::ConfigError;
use crate::expr::{self, Value};
use crate::model::{AttributeMapper, ConfigurationUnit, Mapping};
use crate::placeholder::{self, Placeholder, Resolver};
use crate::profile::Profile;

use super::{GlobalProperties, Properties, PropertiesHolder, resolve};

#[derive(Debug, Clone, Copy)]
pub struct EvaluateOptions {
  /// Consult deployment properties in addition to solution properties.
  pub include_deployment: bool,
}

impl Default for EvaluateOptions {
  fn default() -> Self {
    Self {
      include_deployment: true,
    }
  }
}

/// Where placeholders of a template are looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
  /// `${key}` and `${capability[key]}` refer to the named unit.
  Unit { unit: String, include_provided: bool },

  /// `${unit}`, `${unit[key]}` and `${unit[capability[key]]}`.
  Global,
}

impl Scope {
  pub fn unit(id: impl Into<String>) -> Self {
    Scope::Unit {
      unit: id.into(),
      include_provided: true,
    }
  }
}

/// Evaluate every concrete unit of a profile.
pub fn evaluate(profile: &Profile, options: EvaluateOptions) -> Result<PropertiesHolder, ConfigError> {
  let mut holder = PropertiesHolder::new(options.include_deployment);
  Evaluator::new(profile, &mut holder).evaluate_all()?;
  Ok(holder)
}

pub struct Evaluator<'p, 'h> {
  profile: &'p Profile,
  globals: GlobalProperties<'p>,
  holder: &'h mut PropertiesHolder,
  stack: Vec<String>,
  in_progress: HashSet<(String, String)>,
}

impl<'p, 'h> Evaluator<'p, 'h> {
  pub fn new(profile: &'p Profile, holder: &'h mut PropertiesHolder) -> Self {
    let globals = profile.globals(holder.includes_deployment());
    Self {
      profile,
      globals,
      holder,
      stack: Vec::new(),
      in_progress: HashSet::new(),
    }
  }

  pub fn holder(&self) -> &PropertiesHolder {
    self.holder
  }

  pub fn evaluate_all(&mut self) -> Result<(), ConfigError> {
    let profile = self.profile;
    let mut count = 0;
    for unit in profile.units().filter(|u| !u.is_abstract) {
      self.ensure_evaluated(&unit.id)?;
      count += 1;
    }
    info!(profile = %profile.name(), units = count, "profile evaluated");
    Ok(())
  }

  /// Evaluate a unit unless already done. Returns false for unknown units.
  ///
  /// # Errors
  ///
  /// `CyclicUnitDependency` when the unit is reached again while its own
  /// bindings are being resolved.
  pub fn ensure_evaluated(&mut self, unit_id: &str) -> Result<bool, ConfigError> {
    let profile = self.profile;
    let Some(unit) = profile.unit(unit_id) else {
      return Ok(false);
    };
    if self.holder.evaluated.contains(unit_id) {
      return Ok(true);
    }
    if let Some(pos) = self.stack.iter().position(|u| u == unit_id) {
      let mut chain = self.stack[pos..].to_vec();
      chain.push(unit_id.to_string());
      return Err(ConfigError::CyclicUnitDependency {
        chain: chain.join(" -> "),
      });
    }

    self.stack.push(unit_id.to_string());
    let result = self.evaluate_unit(unit);
    self.stack.pop();
    result?;

    self.holder.evaluated.insert(unit_id.to_string());
    Ok(true)
  }

  /// The resolved value of a unit-level key, as `${unit[key]}` would see it.
  pub fn unit_attribute(&mut self, unit_id: &str, key: &str) -> Result<Option<String>, ConfigError> {
    match self.reference(unit_id)? {
      Some(unit) => self.unit_key(unit, key),
      None => Ok(None),
    }
  }

  /// The resolved value of a capability key, as `${unit[capability[key]]}` would see it.
  pub fn capability_attribute(
    &mut self,
    unit_id: &str,
    capability: &str,
    key: &str,
  ) -> Result<Option<String>, ConfigError> {
    match self.reference(unit_id)? {
      Some(unit) => self.capability_value(unit, capability, key, true),
      None => Ok(None),
    }
  }

  fn evaluate_unit(&mut self, unit: &'p ConfigurationUnit) -> Result<(), ConfigError> {
    debug!(unit = %unit.id, "evaluating unit");
    self.holder.set(&unit.id, UNIT_ID_PROPERTY, unit.id.clone());

    self.resolve_bindings(unit)?;
    for attribute in &unit.attributes {
      self.attribute(unit, &attribute.key)?;
    }
    for mapping in &unit.mappings {
      self.apply_mapping(unit, mapping)?;
    }
    self.finalize_capabilities(unit)
  }

  fn definition_keys(&self, definition: &str) -> &'p [AttributeKey] {
    let profile = self.profile;
    profile
      .definitions()
      .get(definition)
      .map(|d| d.attribute_keys.as_slice())
      .unwrap_or(&[])
  }

  fn resolve_bindings(&mut self, unit: &'p ConfigurationUnit) -> Result<(), ConfigError> {
    let profile = self.profile;

    for required in &unit.required {
      let target = unit.capability_ref(&required.id);
      let keys = self.definition_keys(&required.definition);

      for (i, binding) in profile.bindings().targeting(&target).into_iter().enumerate() {
        self.ensure_evaluated(&binding.source.unit)?;

        let source_id = binding.source.unique_id();
        let mut values = Properties::new();
        for key in keys {
          let value = self
            .holder
            .get(&source_id, &key.key)
            .map(str::to_string)
            .or_else(|| key.default_value.clone());
          if let Some(value) = value {
            values.insert(key.key.clone(), value);
          }
        }

        let source_definition = profile
          .unit(&binding.source.unit)
          .and_then(|u| u.provided_capability(&binding.source.capability))
          .map(|c| c.definition.clone())
          .unwrap_or_default();
        values.insert(UNIT_ID_PROPERTY.to_string(), binding.source.unit.clone());
        values.insert(CAPABILITY_ID_PROPERTY.to_string(), binding.source.capability.clone());
        values.insert(CAPABILITY_DEFINITION_PROPERTY.to_string(), source_definition);

        debug!(binding = %binding.id(), "binding resolved");
        if i == 0 {
          self.holder.extend(&target.unique_id(), values.clone());
        }
        self.holder.extend(&binding.id(), values);
      }
    }

    Ok(())
  }

  /// Evaluate a unit attribute (or a unit-level override of `key`) once.
  fn attribute(&mut self, unit: &'p ConfigurationUnit, key: &str) -> Result<Option<String>, ConfigError> {
    let entry = (unit.id.clone(), key.to_string());
    if self.holder.attributes_done.contains(&entry) {
      return Ok(self.holder.get(&unit.id, key).map(str::to_string));
    }
    if self.in_progress.contains(&entry) {
      debug!(unit = %unit.id, key, "attribute references itself");
      return Ok(None);
    }

    let globals = self.globals;
    let template = match globals.consult(self.holder, &format!("{}.{key}", unit.id)) {
      Some(value) => value,
      None => match unit.attribute_value(key) {
        Some(template) => template,
        None => return Ok(None),
      },
    };

    self.in_progress.insert(entry.clone());
    let value = self.render(template, &Scope::unit(&unit.id));
    self.in_progress.remove(&entry);
    let value = value?;

    self.holder.set(&unit.id, key, value.clone());
    self.holder.attributes_done.insert(entry);
    Ok(Some(value))
  }

  /// A unit's own value for `key`: override, attribute, or bag entry.
  fn unit_value(&mut self, unit: &'p ConfigurationUnit, key: &str) -> Result<Option<String>, ConfigError> {
    if let Some(value) = self.attribute(unit, key)? {
      self.holder.mark_attribute_used(&unit.id, key);
      return Ok(Some(value));
    }
    Ok(self.holder.get(&unit.id, key).map(str::to_string))
  }

  /// `${key}` in unit scope.
  fn unit_key(&mut self, unit: &'p ConfigurationUnit, key: &str) -> Result<Option<String>, ConfigError> {
    if let Some(value) = self.unit_value(unit, key)? {
      return Ok(Some(value));
    }
    let globals = self.globals;
    Ok(resolve(self.holder, &globals, &unit.id, &unit.id, key, None))
  }

  /// `${capability[key]}` in unit scope: required capabilities first.
  fn capability_value(
    &mut self,
    unit: &'p ConfigurationUnit,
    capability: &str,
    key: &str,
    include_provided: bool,
  ) -> Result<Option<String>, ConfigError> {
    if let Some(required) = unit.required_capability(capability) {
      let default = self
        .definition_keys(&required.definition)
        .iter()
        .find(|k| k.key == key)
        .and_then(|k| k.default_value.as_deref());
      let globals = self.globals;
      let unique_id = unit.capability_ref(capability).unique_id();
      return Ok(resolve(self.holder, &globals, &unique_id, capability, key, default));
    }

    if include_provided && let Some(provided) = unit.provided_capability(capability) {
      let attribute_key = self
        .definition_keys(&provided.definition)
        .iter()
        .find(|k| k.key == key)
        .cloned()
        .unwrap_or_else(|| AttributeKey::new(key));
      return self.provided_value(unit, capability, &attribute_key);
    }

    Ok(None)
  }

  /// Value of a provided capability key. A mapped value beats the unit's own
  /// value, which beats the capability-qualified and plain external keys.
  fn provided_value(
    &mut self,
    unit: &'p ConfigurationUnit,
    capability: &str,
    key: &AttributeKey,
  ) -> Result<Option<String>, ConfigError> {
    let globals = self.globals;
    let unique_id = unit.capability_ref(capability).unique_id();

    if let Some(value) = globals.consult(self.holder, &format!("{unique_id}.{}", key.key)) {
      return Ok(Some(value.to_string()));
    }
    if let Some(value) = self.holder.get(&unique_id, &key.key) {
      return Ok(Some(value.to_string()));
    }
    if let Some(value) = self.unit_value(unit, &key.key)? {
      return Ok(Some(value));
    }
    if let Some(value) = globals.consult(self.holder, &format!("{capability}.{}", key.key)) {
      return Ok(Some(value.to_string()));
    }
    if let Some(value) = globals.consult(self.holder, &key.key) {
      return Ok(Some(value.to_string()));
    }

    let Some(default) = &key.default_value else {
      return Ok(None);
    };
    let entry = (unique_id, key.key.clone());
    if !self.in_progress.insert(entry.clone()) {
      return Ok(Some(default.clone()));
    }
    let value = self.render(default, &Scope::unit(&unit.id));
    self.in_progress.remove(&entry);
    value.map(Some)
  }

  fn apply_mapping(&mut self, unit: &'p ConfigurationUnit, mapping: &'p Mapping) -> Result<(), ConfigError> {
    let Some(definition) = unit.capability_definition(&mapping.target) else {
      return Err(ConfigError::MissingMappingTarget {
        unit: unit.id.clone(),
        mapping: mapping.id.clone(),
        capability: mapping.target.clone(),
      });
    };
    let target_id = unit.capability_ref(&mapping.target).unique_id();

    for mapper in &mapping.mappers {
      match mapper {
        AttributeMapper::Unit { keys } => {
          let keys: Vec<&str> = if keys.is_empty() {
            self.definition_keys(definition).iter().map(|k| k.key.as_str()).collect()
          } else {
            keys.iter().map(String::as_str).collect()
          };
          for key in keys {
            if let Some(value) = self.unit_value(unit, key)? {
              self.write_mapped(&target_id, key, value);
            }
          }
        }
        AttributeMapper::Capability {
          source,
          source_prefix,
          target_prefix,
        } => {
          if unit.capability_definition(source).is_none() {
            return Err(ConfigError::MissingMappingSource {
              unit: unit.id.clone(),
              mapping: mapping.id.clone(),
              capability: source.clone(),
            });
          }
          let source_id = unit.capability_ref(source).unique_id();
          let values: Vec<(String, String)> = self
            .holder
            .bag(&source_id)
            .map(|bag| {
              bag
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
            })
            .unwrap_or_default();
          for (key, value) in values {
            if let Some(key) = AttributeMapper::rewrite_key(&key, source_prefix.as_deref(), target_prefix.as_deref()) {
              self.write_mapped(&target_id, &key, value);
            }
          }
        }
        AttributeMapper::Expression { key, expression } => {
          let value = self.render(expression, &Scope::unit(&unit.id))?;
          self.write_mapped(&target_id, key, value);
        }
      }
    }

    Ok(())
  }

  fn write_mapped(&mut self, target_id: &str, key: &str, value: String) {
    if self.globals.get(&format!("{target_id}.{key}")).is_some() {
      debug!(capability = %target_id, key, "external override wins over mapping");
      return;
    }
    self.holder.set(target_id, key, value);
  }

  fn finalize_capabilities(&mut self, unit: &'p ConfigurationUnit) -> Result<(), ConfigError> {
    for provided in &unit.provided {
      let unique_id = unit.capability_ref(&provided.id).unique_id();
      for key in self.definition_keys(&provided.definition) {
        if let Some(value) = self.provided_value(unit, &provided.id, key)? {
          self.holder.set(&unique_id, key.key.clone(), value);
        }
      }
      self.holder.set(&unique_id, UNIT_ID_PROPERTY, unit.id.clone());
      self.holder.set(&unique_id, CAPABILITY_ID_PROPERTY, provided.id.clone());
      self.holder.set(&unique_id, CAPABILITY_DEFINITION_PROPERTY, provided.definition.clone());
    }

    let globals = self.globals;
    for required in &unit.required {
      let unique_id = unit.capability_ref(&required.id).unique_id();
      for key in self.definition_keys(&required.definition) {
        let value = resolve(
          self.holder,
          &globals,
          &unique_id,
          &required.id,
          &key.key,
          key.default_value.as_deref(),
        );
        if let Some(value) = value {
          self.holder.set(&unique_id, key.key.clone(), value);
        }
      }
    }

    Ok(())
  }

  /// A unit referenced from a placeholder, evaluated first unless it is
  /// currently being evaluated. Missing units resolve to nothing.
  fn reference(&mut self, unit_id: &str) -> Result<Option<&'p ConfigurationUnit>, ConfigError> {
    let profile = self.profile;
    let Some(unit) = profile.unit(unit_id) else {
      debug!(unit = unit_id, "reference to missing unit");
      return Ok(None);
    };
    if !self.stack.iter().any(|u| u == unit_id) {
      self.ensure_evaluated(unit_id)?;
    }
    Ok(Some(unit))
  }

  fn lookup(&mut self, placeholder: &Placeholder, scope: &Scope) -> Result<Option<String>, ConfigError> {
    let profile = self.profile;

    match (scope, placeholder) {
      (_, Placeholder::Predefined(_)) => Ok(None),
      (_, Placeholder::Nested { unit, capability, key }) => self.capability_attribute(unit, capability, key),
      (Scope::Unit { unit, .. }, Placeholder::Key(key)) => match profile.unit(unit) {
        Some(owner) => self.unit_key(owner, key),
        None => Ok(None),
      },
      (
        Scope::Unit {
          unit,
          include_provided,
        },
        Placeholder::Indexed { scope: name, key },
      ) => {
        let Some(owner) = profile.unit(unit) else {
          return Ok(None);
        };
        let own_capability =
          owner.required_capability(name).is_some() || (*include_provided && owner.provided_capability(name).is_some());
        if own_capability {
          self.capability_value(owner, name, key, *include_provided)
        } else {
          self.unit_attribute(name, key)
        }
      }
      (Scope::Global, Placeholder::Key(name)) => match profile.unit(name).filter(|u| !u.is_abstract) {
        Some(unit) => {
          self.reference(&unit.id)?;
          Ok(Some(
            self
              .holder
              .get(&unit.id, UNIT_ID_PROPERTY)
              .map_or_else(|| unit.id.clone(), str::to_string),
          ))
        }
        None => {
          let globals = self.globals;
          Ok(globals.consult(self.holder, name).map(str::to_string))
        }
      },
      (Scope::Global, Placeholder::Indexed { scope: name, key }) => self.unit_attribute(name, key),
    }
  }

  /// The bag `%{...}` expressions see: own keys plus `<capability>.<key>`
  /// in unit scope, `<uniqueId>.<key>` for everything in global scope.
  fn expression_context(&self, scope: &Scope) -> Properties {
    let mut context = Properties::new();
    match scope {
      Scope::Unit { unit, .. } => {
        if let Some(bag) = self.holder.bag(unit) {
          context.extend(bag.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(owner) = self.profile.unit(unit) {
          let capabilities = owner.required.iter().map(|c| &c.id).chain(owner.provided.iter().map(|c| &c.id));
          for capability in capabilities {
            if let Some(bag) = self.holder.bag(&owner.capability_ref(capability).unique_id()) {
              context.extend(bag.iter().map(|(k, v)| (format!("{capability}.{k}"), v.clone())));
            }
          }
        }
      }
      Scope::Global => {
        for id in self.holder.ids() {
          if let Some(bag) = self.holder.bag(id) {
            context.extend(bag.iter().map(|(k, v)| (format!("{id}.{k}"), v.clone())));
          }
        }
      }
    }
    context
  }

  fn substitute(&mut self, template: &str, scope: &Scope) -> Result<Option<String>, ConfigError> {
    if let Scope::Unit { unit, .. } = scope {
      self.reference(unit)?;
    }
    let mut resolver = ScopedResolver { evaluator: self, scope };
    match placeholder::substitute(template, &mut resolver)? {
      Ok(value) => Ok(Some(value)),
      Err(e) => {
        debug!(template, error = %e, "malformed placeholder");
        Ok(None)
      }
    }
  }

  /// Render a template to a string.
  ///
  /// A malformed placeholder or expression leaves the text as it stood
  /// before the failing pass.
  pub fn render(&mut self, template: &str, scope: &Scope) -> Result<String, ConfigError> {
    let Some(substituted) = self.substitute(template, scope)? else {
      return Ok(template.to_string());
    };
    if !expr::has_expressions(&substituted) {
      return Ok(substituted);
    }

    let context = self.expression_context(scope);
    match expr::render(&substituted, &context) {
      Ok(value) => Ok(value),
      Err(e) => {
        debug!(template, error = %e, "expression did not evaluate, keeping literal");
        Ok(substituted)
      }
    }
  }

  /// Read a template as a boolean condition.
  ///
  /// `None` when the condition is null or does not parse.
  pub fn read_bool(&mut self, template: &str, scope: &Scope) -> Result<Option<bool>, ConfigError> {
    let Some(substituted) = self.substitute(template, scope)? else {
      return Ok(None);
    };
    let trimmed = substituted.trim();
    let body = trimmed
      .strip_prefix("%{")
      .and_then(|b| b.strip_suffix('}'))
      .filter(|b| !b.contains("%{"))
      .unwrap_or(trimmed);

    if body.eq_ignore_ascii_case("true") {
      return Ok(Some(true));
    }
    if body.eq_ignore_ascii_case("false") {
      return Ok(Some(false));
    }

    let context = self.expression_context(scope);
    match expr::evaluate(body, &context) {
      Ok(Value::Null) => Ok(None),
      Ok(value) => Ok(Some(value.as_bool().unwrap_or(false))),
      Err(e) => {
        debug!(template, error = %e, "condition did not evaluate");
        Ok(None)
      }
    }
  }
}

struct ScopedResolver<'e, 'p, 'h> {
  evaluator: &'e mut Evaluator<'p, 'h>,
  scope: &'e Scope,
}

impl Resolver for ScopedResolver<'_, '_, '_> {
  fn resolve(&mut self, placeholder: &Placeholder) -> Result<Option<String>, ConfigError> {
    self.evaluator.lookup(placeholder, self.scope)
  }
}
