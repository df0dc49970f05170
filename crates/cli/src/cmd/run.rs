//! Implementation of the `dcc run` command.
//!
//! Dispatches one lifecycle command to every hosted unit of a profile and
//! prints what happened to each.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::info;

use dcc_lib::execute::ExecutionContext;
use dcc_lib::model::LifecycleCommand;

use crate::output::{Outcome, format_elapsed, print_field, print_note, print_unit};
use crate::{HostArgs, ProfileArgs};

pub struct RunOptions {
  pub parallel: bool,
  pub jobs: Option<usize>,
  pub fail_on_error: bool,
  pub solution_dir: Option<PathBuf>,
  pub units: Vec<String>,
}

pub fn cmd_run(command: LifecycleCommand, args: &ProfileArgs, hosts: &HostArgs, options: RunOptions) -> Result<()> {
  let profile = super::load(args)?;

  let mut config = super::execute_config(hosts);
  config.parallel = options.parallel;
  if let Some(jobs) = options.jobs {
    config.parallelism = jobs;
  }
  if let Some(dir) = &options.solution_dir {
    config.solution_dir = Some(super::canonical(dir)?);
  }
  let ship_solution = config.solution_dir.is_some() && command == LifecycleCommand::Initialize;

  let mut context = ExecutionContext::prepare(&profile, config).context("Failed to prepare execution")?;
  let rt = super::runtime()?;
  let started = Instant::now();

  if ship_solution {
    let initialized = rt
      .block_on(context.initialize_hosts())
      .context("Failed to initialize hosts")?;
    for host in &initialized {
      print_note(&format!("Solution shipped to {host}"));
    }
  }

  let report = rt
    .block_on(context.run(command, &options.units))
    .with_context(|| format!("Failed to run {command}"))?;
  info!(command = %command, total = report.total(), "run finished");

  let verb = command.as_str();
  let host = |unit: &str| context.host_for_unit(unit).map(|h| h.name.as_str());
  for unit in &report.executed {
    print_unit(Outcome::Done, verb, unit, host(unit), None);
  }
  for (unit, error) in &report.failed {
    print_unit(Outcome::Failed, verb, unit, host(unit), Some(&error.to_string()));
  }
  for (unit, dependency) in &report.skipped {
    let detail = format!("skipped, '{dependency}' failed");
    print_unit(Outcome::Skipped, verb, unit, host(unit), Some(&detail));
  }

  println!();
  print_field("Executed", &report.executed.len().to_string());
  print_field("Failed", &report.failed.len().to_string());
  print_field("Skipped", &report.skipped.len().to_string());
  if !report.unhosted.is_empty() {
    print_field("Not hosted", &report.unhosted.join(", "));
  }
  print_field("Duration", &format_elapsed(started.elapsed()));

  if options.fail_on_error && !report.is_success() {
    bail!("{} of {} unit(s) did not complete {}", report.failed.len() + report.skipped.len(), report.total(), command);
  }
  Ok(())
}
