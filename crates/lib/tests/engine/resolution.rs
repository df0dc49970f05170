use std::path::Path;

use dcc_lib::document::ProfileDocument;
use dcc_lib::error::ConfigError;
use dcc_lib::profile::LoadOptions;
use dcc_lib::properties::{EvaluateOptions, Evaluator, PropertiesHolder, PropertySource, evaluate};

use super::common::profile;

const DB_APP: &str = r#"
name: shop
definitions:
  - id: db.endpoint
    attributes:
      - key: port
        default: "5432"
units:
  - id: db
    provides: [{ id: endpoint, definition: db.endpoint }]
  - id: app
    requires: [{ id: db, definition: db.endpoint }]
bindings:
  - source: db.endpoint
    target: app.db
"#;

fn app_port(holder: &mut PropertiesHolder, profile: &dcc_lib::profile::Profile) -> Option<String> {
  Evaluator::new(profile, holder).capability_attribute("app", "db", "port").unwrap()
}

#[test]
fn bound_capability_takes_the_definition_default() {
  let profile = profile(DB_APP, &[]);
  let mut holder = evaluate(&profile, EvaluateOptions::default()).unwrap();

  assert_eq!(app_port(&mut holder, &profile).as_deref(), Some("5432"));
}

#[test]
fn deployment_override_reaches_the_bound_capability() {
  let profile = profile(DB_APP, &[("db.port", "6000")]);
  let mut holder = evaluate(&profile, EvaluateOptions::default()).unwrap();

  assert_eq!(app_port(&mut holder, &profile).as_deref(), Some("6000"));
  assert_eq!(holder.get("app.db", "port"), Some("6000"));
}

#[test]
fn deployment_properties_beat_solution_properties() {
  let builder = || {
    ProfileDocument::from_yaml_str(DB_APP, Path::new("shop.yaml"))
      .unwrap()
      .into_builder()
      .unwrap()
      .solution(PropertySource::from_pairs("solution", [("db.port", "5500")]))
  };

  let with_deployment = builder()
    .deployment(PropertySource::from_pairs("deployment", [("db.port", "6000")]))
    .build(LoadOptions::default())
    .unwrap();
  let holder = evaluate(&with_deployment, EvaluateOptions::default()).unwrap();
  assert_eq!(holder.get("app.db", "port"), Some("6000"));

  let solution_only = evaluate(
    &with_deployment,
    EvaluateOptions {
      include_deployment: false,
    },
  )
  .unwrap();
  assert_eq!(solution_only.get("app.db", "port"), Some("5500"));

  let without = builder().build(LoadOptions::default()).unwrap();
  let holder = evaluate(&without, EvaluateOptions::default()).unwrap();
  assert_eq!(holder.get("app.db", "port"), Some("5500"));
}

#[test]
fn repeated_reads_are_idempotent() {
  let profile = profile(DB_APP, &[("db.port", "6000")]);
  let mut holder = evaluate(&profile, EvaluateOptions::default()).unwrap();

  let first = app_port(&mut holder, &profile);
  let relevant: Vec<String> = holder.relevant_keys().map(str::to_string).collect();
  let second = app_port(&mut holder, &profile);

  assert_eq!(first, second);
  assert_eq!(relevant, holder.relevant_keys().map(str::to_string).collect::<Vec<_>>());
}

const CACHES: &str = r#"
name: caches
auto_bind: true
definitions:
  - id: cache.endpoint
units:
  - id: cache-a
    provides: [{ id: cache, definition: cache.endpoint }]
  - id: cache-b
    provides: [{ id: cache, definition: cache.endpoint }]
  - id: app
    requires: [{ id: cache, definition: cache.endpoint }]
"#;

#[test]
fn auto_bind_with_two_providers_is_ambiguous() {
  let err = ProfileDocument::from_yaml_str(CACHES, Path::new("caches.yaml"))
    .unwrap()
    .into_builder()
    .unwrap()
    .build(LoadOptions::default())
    .unwrap_err();

  match err {
    ConfigError::AmbiguousAutoBind { unit, candidates, .. } => {
      assert_eq!(unit, "app");
      assert!(candidates.iter().any(|c| c.contains("cache-a")));
      assert!(candidates.iter().any(|c| c.contains("cache-b")));
    }
    other => panic!("expected an ambiguous auto-binding, got {other:?}"),
  }
}

#[test]
fn auto_bind_keeps_explicit_bindings() {
  let yaml = format!("{CACHES}bindings:\n  - source: cache-b.cache\n    target: app.cache\n");
  let profile = profile(&yaml, &[]);

  let bindings: Vec<String> = profile.bindings().iter().map(|b| b.id()).collect();
  assert_eq!(bindings, vec!["cache-b.cache#app.cache".to_string()]);
  assert!(profile.bindings().iter().all(|b| !b.auto_bound));
  assert!(profile.dependencies().depends_on("app", "cache-b"));
}

#[test]
fn upstream_follows_bindings_transitively() {
  let yaml = r#"
name: chain
definitions:
  - id: link
units:
  - id: a
    requires: [{ id: in, definition: link }]
  - id: b
    requires: [{ id: in, definition: link }]
    provides: [{ id: out, definition: link }]
  - id: c
    provides: [{ id: out, definition: link }]
bindings:
  - source: b.out
    target: a.in
  - source: c.out
    target: b.in
"#;
  let profile = profile(yaml, &[]);

  assert!(profile.dependencies().depends_on("a", "b"));
  assert!(profile.dependencies().depends_on("b", "c"));
  assert!(profile.dependencies().depends_on("a", "c"));
  assert!(!profile.dependencies().depends_on("c", "a"));
}
