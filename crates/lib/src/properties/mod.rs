//! Property resolution.
//!
//! A [`PropertiesHolder`] is the mutable workspace of one evaluation pass. It
//! maps unique ids (unit ids, `<unit>.<capability>` ids and binding ids) to
//! sorted property bags, and records which external keys and unit attributes
//! were read so the validator can report the rest as unused.
//!
//! Values are resolved through five tiers, first match wins:
//!
//! 1. `<uniqueId>.<key>` in deployment, then solution properties
//! 2. the identifiable's own bag
//! 3. `<id>.<key>` in deployment, then solution properties (capabilities only)
//! 4. plain `<key>` in deployment, then solution properties
//! 5. the attribute key's default

mod evaluate;
mod source;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub use evaluate::{EvaluateOptions, Evaluator, Scope, evaluate};
pub use source::{PropertySource, parse_properties, to_properties_bytes};

/// A sorted property bag.
pub type Properties = BTreeMap<String, String>;

#[derive(Debug, Default)]
pub struct PropertiesHolder {
  bags: HashMap<String, Properties>,
  relevant: BTreeSet<String>,
  relevant_attributes: BTreeSet<(String, String)>,
  include_deployment: bool,
  pub(crate) evaluated: HashSet<String>,
  pub(crate) attributes_done: HashSet<(String, String)>,
}

impl PropertiesHolder {
  pub fn new(include_deployment: bool) -> Self {
    Self {
      include_deployment,
      ..Default::default()
    }
  }

  pub fn includes_deployment(&self) -> bool {
    self.include_deployment
  }

  /// Whether a unit has been fully evaluated in this pass.
  pub fn is_evaluated(&self, unit: &str) -> bool {
    self.evaluated.contains(unit)
  }

  pub fn bag(&self, id: &str) -> Option<&Properties> {
    self.bags.get(id)
  }

  pub fn get(&self, id: &str, key: &str) -> Option<&str> {
    self.bags.get(id).and_then(|bag| bag.get(key)).map(String::as_str)
  }

  pub fn set(&mut self, id: &str, key: impl Into<String>, value: impl Into<String>) {
    self.bags.entry(id.to_string()).or_default().insert(key.into(), value.into());
  }

  pub fn extend(&mut self, id: &str, values: Properties) {
    self.bags.entry(id.to_string()).or_default().extend(values);
  }

  /// Ids of every bag, sorted.
  pub fn ids(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self.bags.keys().map(String::as_str).collect();
    ids.sort_unstable();
    ids
  }

  pub(crate) fn mark_relevant(&mut self, key: &str) {
    if !self.relevant.contains(key) {
      self.relevant.insert(key.to_string());
    }
  }

  /// Whether an external property key was consulted.
  pub fn is_relevant(&self, key: &str) -> bool {
    self.relevant.contains(key)
  }

  pub fn relevant_keys(&self) -> impl Iterator<Item = &str> {
    self.relevant.iter().map(String::as_str)
  }

  pub(crate) fn mark_attribute_used(&mut self, unit: &str, key: &str) {
    let entry = (unit.to_string(), key.to_string());
    if !self.relevant_attributes.contains(&entry) {
      self.relevant_attributes.insert(entry);
    }
  }

  /// Whether a unit attribute was read by anything other than its own evaluation.
  pub fn is_attribute_used(&self, unit: &str, key: &str) -> bool {
    self.relevant_attributes.contains(&(unit.to_string(), key.to_string()))
  }
}

/// The external (solution and deployment) properties seen by one pass.
#[derive(Debug, Clone, Copy)]
pub struct GlobalProperties<'a> {
  deployment: Option<&'a PropertySource>,
  solution: &'a PropertySource,
}

impl<'a> GlobalProperties<'a> {
  pub fn new(solution: &'a PropertySource, deployment: Option<&'a PropertySource>) -> Self {
    Self { deployment, solution }
  }

  /// Look a key up, deployment first.
  pub fn get(&self, key: &str) -> Option<&'a str> {
    self
      .deployment
      .and_then(|d| d.get(key))
      .or_else(|| self.solution.get(key))
  }

  /// Look a key up and mark it relevant when found.
  pub fn consult(&self, holder: &mut PropertiesHolder, key: &str) -> Option<&'a str> {
    let value = self.get(key)?;
    holder.mark_relevant(key);
    Some(value)
  }

  /// Every external key, sorted and deduplicated.
  pub fn keys(&self) -> BTreeSet<&'a str> {
    let mut keys: BTreeSet<&'a str> = self.solution.keys().collect();
    if let Some(deployment) = self.deployment {
      keys.extend(deployment.keys());
    }
    keys
  }
}

/// Resolve `key` of the identifiable `unique_id` (plain id `id`) through all tiers.
pub fn resolve(
  holder: &mut PropertiesHolder,
  globals: &GlobalProperties<'_>,
  unique_id: &str,
  id: &str,
  key: &str,
  default: Option<&str>,
) -> Option<String> {
  if let Some(value) = globals.consult(holder, &format!("{unique_id}.{key}")) {
    return Some(value.to_string());
  }
  if let Some(value) = holder.get(unique_id, key) {
    return Some(value.to_string());
  }
  if id != unique_id
    && let Some(value) = globals.consult(holder, &format!("{id}.{key}"))
  {
    return Some(value.to_string());
  }
  if let Some(value) = globals.consult(holder, key) {
    return Some(value.to_string());
  }
  default.map(str::to_string)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sources() -> (PropertySource, PropertySource) {
    let solution = PropertySource::from_pairs(
      "solution",
      [("app.web.port", "1"), ("web.port", "3"), ("port", "4"), ("timeout", "30")],
    );
    let deployment = PropertySource::from_pairs("deployment", [("port", "40"), ("app.web.port", "10")]);
    (solution, deployment)
  }

  #[test]
  fn tiers_apply_in_order() {
    let (solution, deployment) = sources();
    let globals = GlobalProperties::new(&solution, Some(&deployment));
    let mut holder = PropertiesHolder::new(true);

    assert_eq!(
      resolve(&mut holder, &globals, "app.web", "web", "port", Some("5")).as_deref(),
      Some("10")
    );

    holder.set("app.other", "port", "2");
    assert_eq!(
      resolve(&mut holder, &globals, "app.other", "other", "port", None).as_deref(),
      Some("2")
    );
    assert_eq!(
      resolve(&mut holder, &globals, "db.web", "web", "port", None).as_deref(),
      Some("3")
    );
    assert_eq!(resolve(&mut holder, &globals, "db", "db", "port", None).as_deref(), Some("40"));
    assert_eq!(
      resolve(&mut holder, &globals, "db", "db", "missing", Some("d")).as_deref(),
      Some("d")
    );
  }

  #[test]
  fn deployment_wins_over_solution() {
    let (solution, deployment) = sources();
    let globals = GlobalProperties::new(&solution, Some(&deployment));
    assert_eq!(globals.get("port"), Some("40"));

    let without = GlobalProperties::new(&solution, None);
    assert_eq!(without.get("port"), Some("4"));
  }

  #[test]
  fn relevance_is_marked_once_per_key() {
    let (solution, deployment) = sources();
    let globals = GlobalProperties::new(&solution, Some(&deployment));
    let mut holder = PropertiesHolder::new(true);

    let first = resolve(&mut holder, &globals, "x", "x", "timeout", None);
    let marked: Vec<String> = holder.relevant_keys().map(str::to_string).collect();
    let second = resolve(&mut holder, &globals, "x", "x", "timeout", None);

    assert_eq!(first, second);
    assert_eq!(holder.relevant_keys().map(str::to_string).collect::<Vec<_>>(), marked);
    assert!(holder.is_relevant("timeout"));
    assert!(!holder.is_relevant("port"));
  }
}
