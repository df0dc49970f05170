use dcc_lib::validate::{ValidateOptions, ValidationError, validate};

use super::common::profile;

const PORTS: &str = r#"
name: ports
units:
  - id: web
    attributes:
      port: 8080
    asserts:
      - type: unique
        expression: ${port}
        message: web port ${port}
  - id: admin
    attributes:
      port: "8080"
    asserts:
      - type: unique
        expression: ${port}
        message: admin port ${port}
  - id: metrics
    attributes:
      port: 9090
    asserts:
      - type: unique
        expression: ${port}
        message: metrics port
"#;

#[test]
fn duplicate_unique_values_are_one_failure() {
  let profile = profile(PORTS, &[]);
  let err = validate(&profile, ValidateOptions::default()).unwrap_err();

  let ValidationError::Failed { count, report } = err else {
    panic!("expected a validation failure");
  };
  assert_eq!(count, 1);
  assert!(report.contains("value '8080' is not unique"));
  assert!(report.contains("web port 8080"));
  assert!(report.contains("admin port 8080"));
  assert!(!report.contains("metrics"));
}

#[test]
fn failures_are_collected_across_the_profile() {
  let yaml = r#"
name: broken
definitions:
  - id: db.endpoint
    attributes:
      - key: host
units:
  - id: db
    provides: [{ id: endpoint, definition: db.endpoint }]
  - id: app
    requires: [{ id: db, definition: db.endpoint }]
    asserts:
      - type: is-true
        expression: "%{1 > 2}"
        message: arithmetic is broken
"#;
  let profile = profile(yaml, &[]);
  let err = validate(&profile, ValidateOptions::default()).unwrap_err();

  let ValidationError::Failed { count, report } = err else {
    panic!("expected a validation failure");
  };
  assert_eq!(count, 3);
  assert!(report.contains("capability 'db.endpoint' has no value for mandatory attribute 'host'"));
  assert!(report.contains("required capability 'app.db' is not bound"));
  assert!(report.contains("arithmetic is broken"));
  assert!(report.starts_with("1. "));
}

#[test]
fn strict_mode_fails_on_unused_properties() {
  let yaml = "name: quiet\nunits:\n  - id: app\n";
  let profile = profile(yaml, &[("unused.key", "x")]);

  assert!(validate(&profile, ValidateOptions::default()).is_ok());
  let err = validate(&profile, ValidateOptions { strict: true }).unwrap_err();
  assert!(matches!(err, ValidationError::Failed { count: 1, .. }));
}
