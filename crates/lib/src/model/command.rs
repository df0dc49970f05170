//! Lifecycle commands and the per-unit definitions that bind them to packages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleCommand {
  Initialize,
  Install,
  Configure,
  Start,
  Stop,
  Uninstall,
  Upgrade,
}

impl LifecycleCommand {
  pub const ALL: [LifecycleCommand; 7] = [
    LifecycleCommand::Initialize,
    LifecycleCommand::Install,
    LifecycleCommand::Configure,
    LifecycleCommand::Start,
    LifecycleCommand::Stop,
    LifecycleCommand::Uninstall,
    LifecycleCommand::Upgrade,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      LifecycleCommand::Initialize => "initialize",
      LifecycleCommand::Install => "install",
      LifecycleCommand::Configure => "configure",
      LifecycleCommand::Start => "start",
      LifecycleCommand::Stop => "stop",
      LifecycleCommand::Uninstall => "uninstall",
      LifecycleCommand::Upgrade => "upgrade",
    }
  }

  /// Commands that tear down run downstream units first.
  pub fn is_reverse(self) -> bool {
    matches!(self, LifecycleCommand::Stop | LifecycleCommand::Uninstall)
  }
}

impl fmt::Display for LifecycleCommand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lifecycle command '{0}'")]
pub struct UnknownCommand(pub String);

impl FromStr for LifecycleCommand {
  type Err = UnknownCommand;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    LifecycleCommand::ALL
      .into_iter()
      .find(|c| c.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| UnknownCommand(s.to_string()))
  }
}

/// How a unit carries out one lifecycle command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDefinition {
  pub command: LifecycleCommand,
  pub package: String,
  /// Capabilities whose properties are sent with the command (all when empty).
  #[serde(default)]
  pub capabilities: Vec<String>,
  /// Other units whose properties are contributed to the command.
  #[serde(default)]
  pub contributions: Vec<String>,
  /// Required capabilities whose providers must have run before.
  #[serde(default)]
  pub requisitions: Vec<String>,
  /// Provided capabilities announced as prerequisites to downstream units.
  #[serde(default)]
  pub provisions: Vec<String>,
}

impl CommandDefinition {
  pub fn new(command: LifecycleCommand, package: impl Into<String>) -> Self {
    Self {
      command,
      package: package.into(),
      capabilities: Vec::new(),
      contributions: Vec::new(),
      requisitions: Vec::new(),
      provisions: Vec::new(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_case_insensitively() {
    assert_eq!("START".parse::<LifecycleCommand>().unwrap(), LifecycleCommand::Start);
    assert!("restart".parse::<LifecycleCommand>().is_err());
  }

  #[test]
  fn teardown_commands_are_reverse() {
    assert!(LifecycleCommand::Stop.is_reverse());
    assert!(LifecycleCommand::Uninstall.is_reverse());
    assert!(!LifecycleCommand::Install.is_reverse());
  }
}
