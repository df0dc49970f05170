use std::sync::Arc;

use tempfile::TempDir;

use dcc_lib::error::ConfigError;
use dcc_lib::execute::{ExecuteConfig, ExecuteError, ExecutionContext};
use dcc_lib::model::LifecycleCommand;
use dcc_lib::profile::Profile;
use dcc_lib::properties::{EvaluateOptions, evaluate};

use super::common::{NullFactory, profile};

const FARM: &str = r#"
name: farm
definitions:
  - id: dcc.agent.endpoint
    attributes:
      - key: host
      - key: port
        default: "8443"
units:
  - id: node1
    provides: [{ id: agent, definition: dcc.agent.endpoint }]
    attributes:
      host: ${node1.hostname}
  - id: node2
    provides: [{ id: agent, definition: dcc.agent.endpoint }]
    attributes:
      host: node2.internal
      port: 9000
  - id: api
    requires: [{ id: host, definition: dcc.agent.endpoint }]
    commands:
      - command: start
        package: api-pkg
  - id: worker
    commands:
      - command: start
        package: worker-pkg
bindings:
  - source: node1.agent
    target: api.host
"#;

fn context<'p>(profile: &'p Profile, factory: Arc<NullFactory>, work: &TempDir) -> ExecutionContext<'p> {
  let properties = evaluate(profile, EvaluateOptions::default()).unwrap();
  let config = ExecuteConfig {
    work_root: work.path().to_path_buf(),
    ..ExecuteConfig::default()
  };
  ExecutionContext::new(profile, properties, config, factory)
}

#[test]
fn unit_without_upstream_host_gets_no_executor() {
  let work = TempDir::new().unwrap();
  let profile = profile(FARM, &[("node1.hostname", "node1.internal")]);
  let factory = Arc::new(NullFactory::default());
  let mut ctx = context(&profile, factory.clone(), &work);

  ctx.initialize_executors(false).unwrap();

  assert!(ctx.host_for_unit("worker").is_none());
  assert!(ctx.executor_for_unit("worker").is_none());
  assert_eq!(ctx.host_for_unit("api").unwrap().name, "node1.internal");
  assert_eq!(ctx.host_for_unit("api").unwrap().port, 8443);
  assert_eq!(ctx.host_for_unit("node2").unwrap().port, 9000);
  assert_eq!(*factory.created.lock().unwrap(), vec!["node1".to_string(), "node2".to_string()]);
}

#[test]
fn host_mapping_is_stable_across_forced_reinitialization() {
  let work = TempDir::new().unwrap();
  let profile = profile(FARM, &[("node1.hostname", "node1.internal")]);
  let mut ctx = context(&profile, Arc::new(NullFactory::default()), &work);

  ctx.initialize_executors(true).unwrap();
  let first = ctx.unit_hosts().clone();
  for _ in 0..3 {
    ctx.initialize_executors(true).unwrap();
    assert_eq!(ctx.unit_hosts(), &first);
  }
}

#[test]
fn host_unit_without_host_name_is_an_error() {
  let work = TempDir::new().unwrap();
  let profile = profile(FARM, &[]);
  let mut ctx = context(&profile, Arc::new(NullFactory::default()), &work);

  let err = ctx.initialize_executors(false).unwrap_err();
  assert!(matches!(err, ExecuteError::Config(ConfigError::MissingHostName(ref unit)) if unit == "node1"));
}

#[tokio::test]
async fn unhosted_units_are_reported_not_dispatched() {
  let work = TempDir::new().unwrap();
  let profile = profile(FARM, &[("node1.hostname", "node1.internal")]);
  let mut ctx = context(&profile, Arc::new(NullFactory::default()), &work);

  let report = ctx.run(LifecycleCommand::Start, &[]).await.unwrap();
  assert_eq!(report.executed, vec!["api".to_string()]);
  assert_eq!(report.unhosted, vec!["worker".to_string()]);
  assert!(report.is_success());
}
