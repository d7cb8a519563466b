//! Manifest loading: error messages and a full example document.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use sonarsync_core::{
    manifest, Comparator, ManifestError, Selection, SelectionMode, ValidationError, Visibility,
};

const FULL: &str = r#"
projects:
  - key: svc-payments
    name: Payments
    visibility: public
    tags: [backend, payments]
  - key: svc-ledger
    name: Ledger
quality_gates:
  - name: strict
    conditions:
      - { metric: coverage, op: LT, error: "80" }
      - { metric: bugs, op: GT, error: "0", warning: "1" }
portfolios:
  - key: services
    name: Services
    description: All backend services
    selection:
      mode: REGEXP
      project_pattern: "^svc-.*"
  - key: compliant
    name: Compliant
    selection:
      mode: FILTER
      filters:
        languages: [java, kotlin]
        compliance:
          min_coverage: 85.5
          max_issues: 10
          required_rules: [R1, R2]
        custom_metrics:
          new_coverage: { operator: GT, value: "70" }
"#;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_manifest_returns_not_found() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("sonarsync.yaml");
    let err = manifest::load_at(&path).unwrap_err();
    assert!(matches!(err, ManifestError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("sonarsync.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("broken.yaml");
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = manifest::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("broken.yaml"));
}

#[test]
fn load_unknown_selection_mode_is_a_parse_error() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("mode.yaml");
    file.write_str("portfolios:\n  - key: p\n    name: P\n    selection: { mode: MAGIC }\n")
        .expect("write");

    let err = manifest::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }), "got: {err}");
}

#[test]
fn load_rejects_invalid_compliance() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("coverage.yaml");
    file.write_str(
        "portfolios:\n  - key: p\n    name: P\n    selection:\n      mode: FILTER\n      filters:\n        compliance: { min_coverage: -5 }\n",
    )
    .expect("write");

    let err = manifest::load_at(file.path()).unwrap_err();
    assert!(
        matches!(
            err,
            ManifestError::Invalid(ValidationError::OutOfRange { field: "min_coverage", .. })
        ),
        "got: {err}"
    );
}

// ---------------------------------------------------------------------------
// 2. Full document
// ---------------------------------------------------------------------------

#[test]
fn load_full_manifest() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("sonarsync.yaml");
    file.write_str(FULL).expect("write");
    file.assert(predicate::path::exists());

    let manifest = manifest::load_at(file.path()).expect("load");
    assert_eq!(manifest.projects.len(), 2);
    assert_eq!(manifest.projects[0].visibility, Visibility::Public);
    assert_eq!(manifest.projects[1].visibility, Visibility::Private);
    assert!(manifest.projects[0].tags.contains("payments"));

    let gate = &manifest.quality_gates[0];
    assert_eq!(gate.conditions[0].op, Comparator::Lt);
    assert_eq!(gate.conditions[1].warning.as_deref(), Some("1"));
    assert!(gate.conditions.iter().all(|c| c.id.is_none()));

    assert_eq!(manifest.portfolios[0].selection.mode(), SelectionMode::Regexp);
    let filters = manifest.portfolios[1]
        .selection
        .filters()
        .expect("filter selection");
    let compliance = filters.compliance.as_ref().expect("compliance");
    assert_eq!(compliance.min_coverage, Some(85.5));
    assert_eq!(compliance.max_issues, Some(10));
    assert_eq!(compliance.max_duplications, None);
    assert_eq!(filters.custom_metrics["new_coverage"].operator, "GT");
}

#[test]
fn manifest_yaml_roundtrip() {
    let parsed = manifest::parse(FULL, std::path::Path::new("inline")).expect("parse");
    let yaml = serde_yaml::to_string(&parsed).expect("serialize");
    let reparsed = manifest::parse(&yaml, std::path::Path::new("inline")).expect("reparse");
    assert_eq!(parsed, reparsed);
    assert!(matches!(
        reparsed.portfolios[0].selection,
        Selection::Regexp { branch_pattern: None, .. }
    ));
}
