mod clean;
mod plan;
mod run;
mod state;
mod validate;

use std::path::Path;

use anyhow::{Context, Result};

use dcc_lib::document::load_profile;
use dcc_lib::execute::{ExecuteConfig, TlsConfig};
use dcc_lib::profile::{LoadOptions, Profile};

use crate::{HostArgs, ProfileArgs};

pub use clean::{cmd_clean, cmd_purge};
pub use plan::cmd_plan;
pub use run::{RunOptions, cmd_run};
pub use state::cmd_state;
pub use validate::cmd_validate;

/// Load and link the profile named on the command line.
fn load(args: &ProfileArgs) -> Result<Profile> {
  let options = LoadOptions {
    validate: !args.no_definition_check,
  };
  load_profile(
    &args.profile,
    args.solution.as_deref(),
    args.deployment.as_deref(),
    options,
  )
  .with_context(|| format!("Failed to load profile: {}", args.profile.display()))
}

fn execute_config(hosts: &HostArgs) -> ExecuteConfig {
  let mut config = ExecuteConfig {
    mode: hosts.mode,
    local_target_base: hosts.target_dir.clone(),
    ..ExecuteConfig::default()
  };
  if let (Some(identity), Some(truststore)) = (&hosts.identity, &hosts.truststore) {
    config.tls = Some(TlsConfig {
      identity: identity.clone(),
      truststore: truststore.clone(),
    });
  }
  if let Some(timeout) = hosts.timeout {
    config.request_timeout = timeout;
  }
  config
}

fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

fn canonical(path: &Path) -> Result<std::path::PathBuf> {
  dunce::canonicalize(path).with_context(|| format!("No such directory: {}", path.display()))
}
