//! Implementation of the `dcc clean` and `dcc purge` commands.
//!
//! Both act on every host of the profile. Units must have been stopped
//! before a clean and uninstalled before a purge.

use anyhow::{Context, Result};

use dcc_lib::execute::ExecutionContext;

use crate::output::print_done;
use crate::{HostArgs, ProfileArgs};

pub fn cmd_clean(args: &ProfileArgs, hosts: &HostArgs) -> Result<()> {
  let profile = super::load(args)?;
  let mut context =
    ExecutionContext::prepare(&profile, super::execute_config(hosts)).context("Failed to prepare execution")?;

  super::runtime()?.block_on(context.clean()).context("Clean failed")?;
  print_done(&format!("Cleaned {} host(s)", context.hosts().len()));
  Ok(())
}

pub fn cmd_purge(args: &ProfileArgs, hosts: &HostArgs) -> Result<()> {
  let profile = super::load(args)?;
  let mut context =
    ExecutionContext::prepare(&profile, super::execute_config(hosts)).context("Failed to prepare execution")?;

  super::runtime()?.block_on(context.purge()).context("Purge failed")?;
  print_done(&format!("Purged '{}' from {} host(s)", context.deployment_id(), context.hosts().len()));
  Ok(())
}
