//! Implementation of the `dcc state` command.

use anyhow::{Context, Result};

use dcc_lib::execute::ExecutionContext;

use crate::output::{print_done, print_field, print_note};
use crate::{HostArgs, ProfileArgs};

pub fn cmd_state(args: &ProfileArgs, hosts: &HostArgs, logs: &[String]) -> Result<()> {
  let profile = super::load(args)?;
  let mut context =
    ExecutionContext::prepare(&profile, super::execute_config(hosts)).context("Failed to prepare execution")?;
  let rt = super::runtime()?;

  rt.block_on(context.retrieve_state()).context("Failed to retrieve state")?;
  print_done(&format!("State of '{}' retrieved", context.deployment_id()));
  print_field("Hosts", &context.hosts().len().to_string());
  print_field("Directory", &context.state().dir().display().to_string());

  if !logs.is_empty() {
    let fetched = rt.block_on(context.retrieve_logs(logs)).context("Failed to retrieve logs")?;
    for path in &fetched {
      print_note(&path.display().to_string());
    }
    print_field("Logs", &fetched.len().to_string());
  }

  Ok(())
}
