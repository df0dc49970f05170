//! In-memory profile model.
//!
//! Units, their capabilities, bindings, mappings, commands and asserts. The
//! model is plain data; the [`crate::profile`] module links it into a
//! [`crate::profile::Profile`] and drives evaluation.

mod binding;
mod command;
mod mapping;
mod unit;

use serde::{Deserialize, Serialize};

pub use binding::{Binding, BindingIndex};
pub use command::{CommandDefinition, LifecycleCommand, UnknownCommand};
pub use mapping::{AttributeMapper, Mapping};
pub use unit::{Attribute, CapabilityRef, ConfigurationUnit, ProvidedCapability, RequiredCapability};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
  Base,
  Contribution,
  Solution,
  #[default]
  Deployment,
}

/// A custom check evaluated by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Assert {
  /// The expression's value must not collide (case-insensitively) with the
  /// value of any other unique assert in the same group.
  Unique {
    expression: String,
    message: String,
    #[serde(default)]
    group: Option<String>,
  },

  /// The expression must not evaluate to `false`.
  IsTrue { expression: String, message: String },
}

impl Assert {
  pub fn unique(expression: impl Into<String>, message: impl Into<String>) -> Self {
    Assert::Unique {
      expression: expression.into(),
      message: message.into(),
      group: None,
    }
  }

  pub fn is_true(expression: impl Into<String>, message: impl Into<String>) -> Self {
    Assert::IsTrue {
      expression: expression.into(),
      message: message.into(),
    }
  }

  pub fn expression(&self) -> &str {
    match self {
      Assert::Unique { expression, .. } | Assert::IsTrue { expression, .. } => expression,
    }
  }

  pub fn message(&self) -> &str {
    match self {
      Assert::Unique { message, .. } | Assert::IsTrue { message, .. } => message,
    }
  }
}
