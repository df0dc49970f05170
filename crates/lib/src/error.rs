//! Configuration errors raised while linking and resolving a profile.
//!
//! These are fatal: they surface immediately with the offending ids named.
//! Validation findings are collected separately (see [`crate::validate`]).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("cyclic capability definition inheritance: {chain}")]
  CyclicCapabilityDefinition { chain: String },

  #[error("capability definition '{definition}' declares attribute key '{key}' more than once")]
  DuplicateAttributeKey { definition: String, key: String },

  #[error("unknown capability definition '{id}' referenced by '{referenced_by}'")]
  UnknownCapabilityDefinition { id: String, referenced_by: String },

  #[error("unit '{0}' is defined more than once")]
  DuplicateUnit(String),

  #[error("unknown unit '{0}'")]
  UnknownUnit(String),

  #[error("cyclic unit inheritance: {chain}")]
  CyclicUnitInheritance { chain: String },

  #[error("binding '{binding}' references missing capability '{capability}'")]
  MissingBindingCapability { binding: String, capability: String },

  #[error("mapping '{mapping}' of unit '{unit}' targets missing capability '{capability}'")]
  MissingMappingTarget {
    unit: String,
    mapping: String,
    capability: String,
  },

  #[error("mapping '{mapping}' of unit '{unit}' reads missing capability '{capability}'")]
  MissingMappingSource {
    unit: String,
    mapping: String,
    capability: String,
  },

  #[error("no provider of '{definition}' found for required capability '{capability}' of unit '{unit}'")]
  NoAutoBindProvider {
    unit: String,
    capability: String,
    definition: String,
  },

  #[error(
    "ambiguous auto-binding for required capability '{capability}' of unit '{unit}': '{definition}' is provided by {}",
    .candidates.join(", ")
  )]
  AmbiguousAutoBind {
    unit: String,
    capability: String,
    definition: String,
    candidates: Vec<String>,
  },

  #[error("unit '{unit}' provides more than one capability of definition '{definition}'")]
  AmbiguousProvider { unit: String, definition: String },

  #[error("cyclic unit dependency: {chain}")]
  CyclicUnitDependency { chain: String },

  #[error("unit '{unit}' can be hosted by more than one host unit: {}", .candidates.join(", "))]
  AmbiguousHost { unit: String, candidates: Vec<String> },

  #[error("cyclic host identification while mapping unit '{unit}': {chain}")]
  CyclicHostMapping { unit: String, chain: String },

  #[error("host unit '{0}' does not resolve a host name")]
  MissingHostName(String),
}
