//! Bindings connect a provided capability to a required capability.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::unit::CapabilityRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
  pub source: CapabilityRef,
  pub target: CapabilityRef,
  #[serde(default)]
  pub auto_bound: bool,
}

impl Binding {
  pub fn new(source: CapabilityRef, target: CapabilityRef) -> Self {
    Self {
      source,
      target,
      auto_bound: false,
    }
  }

  /// `sourceCapabilityId#targetCapabilityId`, using unique capability ids.
  pub fn id(&self) -> String {
    format!("{}#{}", self.source.unique_id(), self.target.unique_id())
  }
}

/// All bindings of a profile, indexed by id and by target capability.
#[derive(Debug, Clone, Default)]
pub struct BindingIndex {
  bindings: BTreeMap<String, Binding>,
  by_target: BTreeMap<CapabilityRef, Vec<String>>,
}

impl BindingIndex {
  /// Register a binding. Returns false if a binding with the same id exists.
  pub fn insert(&mut self, binding: Binding) -> bool {
    let id = binding.id();
    if self.bindings.contains_key(&id) {
      return false;
    }
    let ids = self.by_target.entry(binding.target.clone()).or_default();
    ids.push(id.clone());
    ids.sort();
    self.bindings.insert(id, binding);
    true
  }

  pub fn get(&self, id: &str) -> Option<&Binding> {
    self.bindings.get(id)
  }

  /// Bindings targeting a required capability, ordered by binding id.
  pub fn targeting(&self, target: &CapabilityRef) -> Vec<&Binding> {
    self
      .by_target
      .get(target)
      .map(|ids| ids.iter().filter_map(|id| self.bindings.get(id)).collect())
      .unwrap_or_default()
  }

  pub fn has_target(&self, target: &CapabilityRef) -> bool {
    self.by_target.get(target).is_some_and(|ids| !ids.is_empty())
  }

  pub fn iter(&self) -> impl Iterator<Item = &Binding> {
    self.bindings.values()
  }

  pub fn len(&self) -> usize {
    self.bindings.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bindings.is_empty()
  }
}
