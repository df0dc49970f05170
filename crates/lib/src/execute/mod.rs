//! Lifecycle command execution.
//!
//! This module dispatches lifecycle commands of a resolved profile to hosts.
//! It handles:
//! - Mapping units to the hosts announced by host units
//! - Wave ordering from unit dependencies, reversed for teardown commands
//! - Parallel execution within a wave and skip tracking after failures
//! - Local execution of package scripts and remote execution over the agent protocol

mod archive;
mod context;
mod executor;
mod local;
mod remote;
pub mod state;
mod types;

pub use archive::{copy_solution, solution_archive};
pub use context::{CommandSchedule, ExecutionContext};
pub use executor::{CommandRequest, DefaultExecutorFactory, Executor, ExecutorFactory, HostInfo};
pub use local::LocalExecutor;
pub use remote::RemoteExecutor;
pub use state::{StateError, StateStore, UnitState};
pub use types::{ExecuteConfig, ExecuteError, ExecutionMode, RunReport, TlsConfig};
