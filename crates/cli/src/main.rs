mod cmd;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dcc_lib::execute::ExecutionMode;
use dcc_lib::model::LifecycleCommand;

use crate::output::OutputFormat;

/// dcc - deploy configuration units to hosts
#[derive(Parser)]
#[command(name = "dcc", author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

/// The profile and the property files it is resolved against.
#[derive(Args, Debug, Clone)]
pub struct ProfileArgs {
  /// Profile document (YAML, or JSON by extension)
  pub profile: PathBuf,

  /// Solution properties
  #[arg(short, long)]
  pub solution: Option<PathBuf>,

  /// Deployment properties
  #[arg(short, long)]
  pub deployment: Option<PathBuf>,

  /// Skip the check that every capability references a known definition
  #[arg(long)]
  pub no_definition_check: bool,
}

/// How to reach the hosts.
#[derive(Args, Debug, Clone)]
pub struct HostArgs {
  /// Where commands are carried out
  #[arg(long, default_value = "remote")]
  pub mode: ExecutionMode,

  /// Local target base directory
  #[arg(long)]
  pub target_dir: Option<PathBuf>,

  /// PEM file with the client certificate and key
  #[arg(long, requires = "truststore")]
  pub identity: Option<PathBuf>,

  /// PEM bundle of trusted agent certificates
  #[arg(long, requires = "identity")]
  pub truststore: Option<PathBuf>,

  /// Per-request timeout (e.g. "90s", "10m")
  #[arg(long, value_parser = humantime::parse_duration)]
  pub timeout: Option<Duration>,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a deployment profile
  Validate {
    #[command(flatten)]
    profile: ProfileArgs,

    /// Treat warnings as errors
    #[arg(long)]
    strict: bool,
  },

  /// Show the host mapping and the execution waves of a command
  Plan {
    #[command(flatten)]
    profile: ProfileArgs,

    /// Lifecycle command to plan
    #[arg(short, long, default_value = "install")]
    command: LifecycleCommand,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
  },

  /// Run a lifecycle command on every unit defining it
  Run {
    /// initialize, install, configure, start, stop, uninstall or upgrade
    command: LifecycleCommand,

    #[command(flatten)]
    profile: ProfileArgs,

    #[command(flatten)]
    hosts: HostArgs,

    /// Dispatch the units of a wave concurrently
    #[arg(long)]
    parallel: bool,

    /// Maximum number of concurrent commands
    #[arg(long)]
    jobs: Option<usize>,

    /// Exit with an error when any unit fails or is skipped
    #[arg(long)]
    fail_on_error: bool,

    /// Ship this solution to every host before initializing
    #[arg(long)]
    solution_dir: Option<PathBuf>,

    /// Only run the command for these units
    #[arg(long = "unit")]
    units: Vec<String>,
  },

  /// Retrieve host state and logs
  State {
    #[command(flatten)]
    profile: ProfileArgs,

    #[command(flatten)]
    hosts: HostArgs,

    /// Log file to fetch from every host
    #[arg(long = "log")]
    logs: Vec<String>,
  },

  /// Empty the temporary directory of every host
  Clean {
    #[command(flatten)]
    profile: ProfileArgs,

    #[command(flatten)]
    hosts: HostArgs,
  },

  /// Remove the deployment from every host
  Purge {
    #[command(flatten)]
    profile: ProfileArgs,

    #[command(flatten)]
    hosts: HostArgs,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Validate { profile, strict } => cmd::cmd_validate(&profile, strict, cli.verbose),
    Commands::Plan {
      profile,
      command,
      format,
    } => cmd::cmd_plan(&profile, command, format),
    Commands::Run {
      command,
      profile,
      hosts,
      parallel,
      jobs,
      fail_on_error,
      solution_dir,
      units,
    } => cmd::cmd_run(
      command,
      &profile,
      &hosts,
      cmd::RunOptions {
        parallel,
        jobs,
        fail_on_error,
        solution_dir,
        units,
      },
    ),
    Commands::State { profile, hosts, logs } => cmd::cmd_state(&profile, &hosts, &logs),
    Commands::Clean { profile, hosts } => cmd::cmd_clean(&profile, &hosts),
    Commands::Purge { profile, hosts } => cmd::cmd_purge(&profile, &hosts),
  }
}
