//! Implementation of the `dcc plan` command.
//!
//! Maps units to hosts and prints the waves a lifecycle command would run in,
//! without contacting any host.

use anyhow::{Context, Result};

use dcc_lib::execute::{ExecuteConfig, ExecutionContext};
use dcc_lib::model::LifecycleCommand;

use crate::ProfileArgs;
use crate::output::{OutputFormat, print_field, print_json, print_mapping, print_note, print_wave};

pub fn cmd_plan(args: &ProfileArgs, command: LifecycleCommand, format: OutputFormat) -> Result<()> {
  let profile = super::load(args)?;
  let mut context =
    ExecutionContext::prepare(&profile, ExecuteConfig::default()).context("Failed to evaluate profile")?;
  let schedule = context.schedule(command, &[]).context("Failed to map units to hosts")?;

  if format.is_json() {
    let hosts: Vec<_> = context
      .hosts()
      .values()
      .map(|h| serde_json::json!({ "unit": h.unit, "name": h.name, "port": h.port }))
      .collect();
    let json_output = serde_json::json!({
      "profile": profile.name(),
      "deployment_id": context.deployment_id(),
      "command": command.as_str(),
      "hosts": hosts,
      "units": context.unit_hosts(),
      "waves": schedule.waves,
      "unhosted": schedule.unhosted,
    });
    return print_json(&json_output);
  }

  print_note(&format!("Plan for '{}' ({})", command, context.deployment_id()));
  println!();
  println!("Hosts:");
  for host in context.hosts().values() {
    print_mapping(&host.unit, &host.to_string());
  }

  println!();
  println!("Units:");
  for (unit, host) in context.unit_hosts() {
    print_mapping(unit, host);
  }

  println!();
  for (i, wave) in schedule.waves.iter().enumerate() {
    print_wave(i, wave);
  }
  if !schedule.unhosted.is_empty() {
    print_field("Not hosted", &schedule.unhosted.join(", "));
  }

  Ok(())
}
