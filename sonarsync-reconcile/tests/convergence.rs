use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use tokio_util::sync::CancellationToken;

use sonarsync_client::testing::{Failure, FakeSonar};
use sonarsync_client::{MetricsRecorder, RetryPolicy, SonarClient, Telemetry};
use sonarsync_core::manifest;
use sonarsync_core::{
    Comparator, Compliance, Condition, Filters, GateId, Manifest, Portfolio, PortfolioKey,
    Project, ProjectKey, QualityGateSpec, Selection, SelectionMode, Visibility,
};
use sonarsync_reconcile::{
    conditions, selection, Change, Observed, Operation, Pipeline, ReconcileError,
    SelectionOptions, StepError,
};

// -- fixtures ---------------------------------------------------------------

fn coverage(error: &str) -> Condition {
    Condition::new("coverage", Comparator::Lt, error)
}

fn bugs() -> Condition {
    Condition::new("bugs", Comparator::Gt, "0")
}

fn vulnerabilities() -> Condition {
    Condition::new("vulnerabilities", Comparator::Gt, "0")
}

fn project(key: &str) -> Project {
    Project {
        key: ProjectKey::from(key),
        name: format!("{key} service"),
        visibility: Visibility::Private,
        main_branch: "main".to_string(),
        tags: ["backend".to_string()].into(),
    }
}

fn manual(projects: &[&str]) -> Selection {
    Selection::Manual {
        projects: projects.iter().map(|p| p.to_string()).collect(),
    }
}

fn regexp(pattern: &str) -> Selection {
    Selection::Regexp {
        project_pattern: pattern.to_string(),
        branch_pattern: None,
    }
}

fn filter(language: &str) -> Selection {
    Selection::Filter {
        filters: Filters {
            languages: [language.to_string()].into(),
            compliance: Some(Compliance {
                min_coverage: Some(72.5),
                ..Compliance::default()
            }),
            ..Filters::default()
        },
    }
}

fn portfolio(key: &str, selection: Selection) -> Portfolio {
    Portfolio {
        key: PortfolioKey::from(key),
        name: key.to_uppercase(),
        description: Some("owned by platform".to_string()),
        selection,
    }
}

fn manifest() -> Manifest {
    Manifest {
        projects: vec![project("svc-orders"), project("svc-billing")],
        quality_gates: vec![QualityGateSpec {
            name: "strict".to_string(),
            conditions: vec![coverage("80"), bugs()],
        }],
        portfolios: vec![
            portfolio("hand-picked", manual(&["svc-orders"])),
            portfolio("services", regexp("^svc-.*")),
            portfolio("java", filter("java")),
        ],
    }
}

/// Cancels `cancel` once the named client operation has succeeded.
struct CancelAfter {
    resource: &'static str,
    operation: &'static str,
    cancel: CancellationToken,
}

impl Telemetry for CancelAfter {
    fn record_request(&self, _: &str, _: &str, _: u16, _: Duration) {}

    fn record_operation(&self, resource: &str, operation: &str, error_kind: Option<&str>) {
        if resource == self.resource && operation == self.operation && error_kind.is_none() {
            self.cancel.cancel();
        }
    }
}

fn cancelling_client(
    fake: &Arc<FakeSonar>,
    resource: &'static str,
    operation: &'static str,
) -> (SonarClient, CancellationToken) {
    let cancel = CancellationToken::new();
    let hook: Arc<dyn Telemetry> = Arc::new(CancelAfter {
        resource,
        operation,
        cancel: cancel.clone(),
    });
    (fake.client_with(RetryPolicy::disabled(), Some(hook)), cancel)
}

/// Seed a portfolio through the reconciler and forget the requests it took.
async fn seeded(fake: &Arc<FakeSonar>, client: &SonarClient, desired: &Portfolio) {
    selection::create(client, &CancellationToken::new(), desired, SelectionOptions::default())
        .await
        .unwrap();
    fake.clear_requests();
}

// -- condition sets ---------------------------------------------------------

#[tokio::test]
async fn removing_one_condition_issues_exactly_one_delete() {
    let fake = FakeSonar::new();
    let gate = fake.insert_gate("strict", &[coverage("80"), bugs()]);
    let client = fake.client();

    let report = conditions::reconcile(&client, &CancellationToken::new(), &gate.id, &[coverage("80")])
        .await
        .unwrap();

    let mutations = fake.mutations();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].path, "qualitygates/delete_condition");
    let bugs_id = gate.conditions[1].id.clone().unwrap();
    assert_eq!(mutations[0].param("id"), Some(bugs_id.as_str()));
    assert_eq!(report.applied.len(), 1);
}

#[tokio::test]
async fn matching_conditions_issue_no_writes() {
    let fake = FakeSonar::new();
    let gate = fake.insert_gate("strict", &[coverage("80"), bugs()]);

    let report = conditions::reconcile(
        &fake.client(),
        &CancellationToken::new(),
        &gate.id,
        &[bugs(), coverage("80")],
    )
    .await
    .unwrap();

    assert!(report.plan.is_noop());
    assert!(fake.mutations().is_empty());
}

#[tokio::test]
async fn deletes_run_before_creates_for_a_changed_threshold() {
    let fake = FakeSonar::new();
    let gate = fake.insert_gate("strict", &[coverage("80")]);

    conditions::reconcile(&fake.client(), &CancellationToken::new(), &gate.id, &[coverage("85")])
        .await
        .unwrap();

    let paths: Vec<_> = fake.mutations().into_iter().map(|r| r.path).collect();
    assert_eq!(
        paths,
        vec!["qualitygates/delete_condition", "qualitygates/create_condition"]
    );
    let stored = fake.gate(&gate.id).unwrap();
    assert_eq!(stored.conditions.len(), 1);
    assert!(stored.conditions[0].same_rule(&coverage("85")));
}

#[tokio::test]
async fn unknown_gate_is_not_found_without_writes() {
    let fake = FakeSonar::new();

    let err = conditions::reconcile(
        &fake.client(),
        &CancellationToken::new(),
        &GateId::from("999"),
        &[bugs()],
    )
    .await
    .unwrap_err();

    assert!(err.is_not_found(), "got {err:?}");
    assert!(fake.mutations().is_empty());
}

#[tokio::test]
async fn failed_create_reports_progress_and_a_rerun_converges() {
    let fake = FakeSonar::new();
    let gate = fake.insert_gate("strict", &[coverage("80"), bugs()]);
    let client = fake.client();
    let cancel = CancellationToken::new();
    let desired = vec![coverage("85"), vulnerabilities()];
    fake.fail_nth("qualitygates/create_condition", 1, Failure::Status(500));

    let err = conditions::reconcile(&client, &cancel, &gate.id, &desired)
        .await
        .unwrap_err();

    let partial = err.partial().expect("partial failure");
    assert_eq!(partial.completed.len(), 3);
    assert!(matches!(
        partial.completed[2],
        Operation::CreateCondition { ref metric, .. } if metric == "coverage"
    ));
    assert!(matches!(
        partial.failed,
        Operation::CreateCondition { ref metric, .. } if metric == "vulnerabilities"
    ));
    assert!(matches!(partial.cause, StepError::Api(_)));
    match &partial.observed {
        Observed::Conditions(observed) => {
            assert_eq!(observed.len(), 1);
            assert!(observed[0].same_rule(&coverage("85")));
        }
        other => panic!("expected observed conditions, got {other:?}"),
    }

    fake.clear_requests();
    let report = conditions::reconcile(&client, &cancel, &gate.id, &desired)
        .await
        .unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(fake.mutations().len(), 1);
    assert_eq!(fake.gate(&gate.id).unwrap().conditions.len(), 2);
}

#[tokio::test]
async fn reconcile_is_recorded_on_telemetry() {
    let fake = FakeSonar::new();
    let gate = fake.insert_gate("strict", &[]);
    let recorder = Arc::new(MetricsRecorder::new());
    let client = fake.client_with(RetryPolicy::disabled(), Some(recorder.clone()));

    conditions::reconcile(&client, &CancellationToken::new(), &gate.id, &[bugs()])
        .await
        .unwrap();

    let snapshot = recorder.snapshot();
    assert_eq!(snapshot.operation_count("condition_set", "reconcile"), 1);
    assert_eq!(snapshot.error_count("condition_set", "reconcile"), 0);
    assert_eq!(snapshot.operation_count("condition", "create"), 1);
}

#[tokio::test]
async fn cancelled_run_sends_nothing() {
    let fake = FakeSonar::new();
    let gate = fake.insert_gate("strict", &[]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = conditions::reconcile(&fake.client(), &cancel, &gate.id, &[bugs()])
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Api(ref api) if api.is_cancelled()));
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn cancel_after_first_delete_stops_the_sequence() {
    let fake = FakeSonar::new();
    let gate = fake.insert_gate("strict", &[coverage("80"), bugs(), vulnerabilities()]);
    let (client, cancel) = cancelling_client(&fake, "condition", "delete");

    let err = conditions::reconcile(&client, &cancel, &gate.id, &[coverage("85")])
        .await
        .unwrap_err();

    let partial = err.partial().expect("partial failure");
    assert_eq!(partial.completed.len(), 1);
    assert!(matches!(partial.completed[0], Operation::DeleteCondition { .. }));
    assert!(matches!(partial.failed, Operation::DeleteCondition { .. }));
    assert!(matches!(partial.cause, StepError::Api(ref api) if api.is_cancelled()));
    assert_eq!(err.kind(), "cancelled");
    assert!(matches!(partial.observed, Observed::Unavailable(_)));

    assert_eq!(fake.mutations().len(), 1);
    assert!(fake.requests_to("qualitygates/create_condition").is_empty());
    assert_eq!(fake.gate(&gate.id).unwrap().conditions.len(), 2);
}

#[tokio::test]
async fn cancel_after_selection_write_skips_the_filter_call() {
    let fake = FakeSonar::new();
    let key = PortfolioKey::from("pf");
    seeded(&fake, &fake.client(), &portfolio("pf", manual(&["p1"]))).await;
    let (client, cancel) = cancelling_client(&fake, "portfolio", "configure_selection");

    let err = selection::reconcile(&client, &cancel, &key, &filter("java"), SelectionOptions::default())
        .await
        .unwrap_err();

    let partial = err.partial().expect("partial failure");
    assert_eq!(
        partial.completed,
        vec![Operation::ConfigureSelection {
            key: key.clone(),
            mode: SelectionMode::Filter,
        }]
    );
    assert!(matches!(partial.failed, Operation::VerifySelection { .. }));
    assert!(matches!(partial.cause, StepError::Api(ref api) if api.is_cancelled()));

    let paths: Vec<_> = fake.mutations().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["portfolios/configure_selection"]);
    assert!(fake.requests_to("portfolios/configure_filters").is_empty());
}

// -- selections -------------------------------------------------------------

#[tokio::test]
async fn manual_to_regexp_sends_only_regexp_fields() {
    let fake = FakeSonar::new();
    let client = fake.client();
    seeded(&fake, &client, &portfolio("pf", manual(&["p1", "p2"]))).await;

    let report = selection::reconcile(
        &client,
        &CancellationToken::new(),
        &PortfolioKey::from("pf"),
        &regexp("^svc-.*"),
        SelectionOptions::default(),
    )
    .await
    .unwrap();

    let calls = fake.requests_to("portfolios/configure_selection");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].param("mode"), Some("REGEXP"));
    assert_eq!(calls[0].param("projectPattern"), Some("^svc-.*"));
    assert!(calls[0].param("projects").is_none());
    assert!(report.plan.is_mode_change());

    let remote = fake.portfolio("pf").unwrap();
    assert!(remote.selection.projects.is_empty());
    assert_eq!(remote.selection(), Some(regexp("^svc-.*")));
}

#[rstest]
#[case::manual_to_regexp(manual(&["p1"]), regexp("^svc-.*"))]
#[case::manual_to_filter(manual(&["p1"]), filter("java"))]
#[case::regexp_to_manual(regexp("^svc-.*"), manual(&["p2"]))]
#[case::regexp_to_filter(regexp("^svc-.*"), filter("go"))]
#[case::filter_to_manual(filter("java"), manual(&["p1", "p2"]))]
#[case::filter_to_regexp(filter("java"), regexp("^lib-.*"))]
#[tokio::test]
async fn mode_switch_leaves_no_stale_fields(#[case] from: Selection, #[case] to: Selection) {
    let fake = FakeSonar::new();
    let client = fake.client();
    seeded(&fake, &client, &portfolio("pf", from)).await;

    selection::reconcile(
        &client,
        &CancellationToken::new(),
        &PortfolioKey::from("pf"),
        &to,
        SelectionOptions::default(),
    )
    .await
    .unwrap();

    let remote = fake.portfolio("pf").unwrap();
    assert!(remote.stale_fields().is_empty(), "{:?}", remote.stale_fields());
    assert_eq!(remote.selection(), Some(to));
}

#[tokio::test]
async fn stale_fields_after_reconfiguration_are_reported() {
    let fake = FakeSonar::new();
    let client = fake.client();
    let cancel = CancellationToken::new();
    let key = PortfolioKey::from("pf");
    seeded(&fake, &client, &portfolio("pf", manual(&["p1"]))).await;
    fake.retain_stale_selection(true);

    let err = selection::reconcile(&client, &cancel, &key, &regexp("^svc-.*"), SelectionOptions::default())
        .await
        .unwrap_err();

    let partial = err.partial().expect("partial failure");
    assert_eq!(
        partial.completed,
        vec![Operation::ConfigureSelection {
            key: key.clone(),
            mode: SelectionMode::Regexp,
        }]
    );
    assert!(matches!(partial.failed, Operation::VerifySelection { .. }));
    match &partial.cause {
        StepError::StaleSelection { mode, fields } => {
            assert_eq!(*mode, SelectionMode::Regexp);
            assert_eq!(fields, &vec!["projects"]);
        }
        other => panic!("expected stale selection, got {other:?}"),
    }
    assert!(matches!(partial.observed, Observed::Portfolio(_)));

    fake.retain_stale_selection(false);
    let report = selection::reconcile(&client, &cancel, &key, &regexp("^svc-.*"), SelectionOptions::default())
        .await
        .unwrap();
    assert_eq!(report.plan.stale_fields, vec!["projects"]);
    assert!(fake.portfolio("pf").unwrap().stale_fields().is_empty());
}

#[tokio::test]
async fn failed_filter_call_leaves_empty_filters_until_rerun() {
    let fake = FakeSonar::new();
    let client = fake.client();
    let cancel = CancellationToken::new();
    let key = PortfolioKey::from("pf");
    seeded(&fake, &client, &portfolio("pf", manual(&["p1"]))).await;
    fake.fail_next("portfolios/configure_filters", Failure::Status(503));

    let err = selection::reconcile(&client, &cancel, &key, &filter("java"), SelectionOptions::default())
        .await
        .unwrap_err();

    let partial = err.partial().expect("partial failure");
    assert_eq!(partial.completed.len(), 2);
    assert_eq!(partial.failed, Operation::ConfigureFilters { key: key.clone() });
    match &partial.observed {
        Observed::Portfolio(remote) => {
            assert_eq!(remote.mode(), Some(SelectionMode::Filter));
            assert!(remote.filters().is_empty());
        }
        other => panic!("expected observed portfolio, got {other:?}"),
    }

    fake.clear_requests();
    let report = selection::reconcile(&client, &cancel, &key, &filter("java"), SelectionOptions::default())
        .await
        .unwrap();
    assert_eq!(report.applied, vec![Operation::ConfigureFilters { key }]);
    assert!(fake.requests_to("portfolios/configure_selection").is_empty());
    assert_eq!(fake.portfolio("pf").unwrap().selection(), Some(filter("java")));
}

#[tokio::test]
async fn filter_verification_is_opt_in() {
    let fake = FakeSonar::new();
    let client = fake.client();
    let cancel = CancellationToken::new();
    let key = PortfolioKey::from("pf");
    seeded(&fake, &client, &portfolio("pf", filter("java"))).await;

    let options = SelectionOptions {
        verify_filters: true,
    };
    let report = selection::reconcile(&client, &cancel, &key, &filter("go"), options)
        .await
        .unwrap();

    assert_eq!(
        report.applied,
        vec![
            Operation::ConfigureFilters { key: key.clone() },
            Operation::VerifyFilters { key },
        ]
    );
}

#[tokio::test]
async fn empty_regexp_pattern_is_rejected_before_any_call() {
    let fake = FakeSonar::new();

    let err = selection::reconcile(
        &fake.client(),
        &CancellationToken::new(),
        &PortfolioKey::from("pf"),
        &regexp("  "),
        SelectionOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ReconcileError::Invalid(_)));
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn empty_compliance_block_converges() {
    let fake = FakeSonar::new();
    let client = fake.client();
    let cancel = CancellationToken::new();
    let options = SelectionOptions {
        verify_filters: true,
    };
    let blank_status = Selection::Filter {
        filters: Filters {
            languages: ["java".to_string()].into(),
            compliance: Some(Compliance {
                min_quality_gate_status: Some(String::new()),
                ..Compliance::default()
            }),
            ..Filters::default()
        },
    };
    let desired = portfolio("pf", blank_status);

    let created = selection::create(&client, &cancel, &desired, options)
        .await
        .unwrap();
    let verified = Operation::VerifyFilters {
        key: desired.key.clone(),
    };
    assert_eq!(created.applied.last(), Some(&verified));

    fake.clear_requests();
    let report = selection::reconcile(&client, &cancel, &desired.key, &desired.selection, options)
        .await
        .unwrap();
    assert!(report.plan.is_noop());
    assert!(fake.mutations().is_empty(), "{:?}", fake.mutations());
}

#[tokio::test]
async fn empty_branch_pattern_converges() {
    let fake = FakeSonar::new();
    let client = fake.client();
    let desired = portfolio(
        "pf",
        Selection::Regexp {
            project_pattern: "^svc-.*".to_string(),
            branch_pattern: Some(String::new()),
        },
    );
    seeded(&fake, &client, &desired).await;

    let report = selection::reconcile(
        &client,
        &CancellationToken::new(),
        &desired.key,
        &desired.selection,
        SelectionOptions::default(),
    )
    .await
    .unwrap();

    assert!(report.applied.is_empty());
    assert!(fake.mutations().is_empty(), "{:?}", fake.mutations());
    assert_eq!(fake.portfolio("pf").unwrap().selection(), Some(regexp("^svc-.*")));
}

#[tokio::test]
async fn create_is_recorded_on_telemetry() {
    let fake = FakeSonar::new();
    let recorder = Arc::new(MetricsRecorder::new());
    let client = fake.client_with(RetryPolicy::disabled(), Some(recorder.clone()));
    let cancel = CancellationToken::new();

    selection::create(&client, &cancel, &portfolio("pf", regexp("^svc-.*")), SelectionOptions::default())
        .await
        .unwrap();
    let err = selection::create(&client, &cancel, &portfolio("bad", regexp(" ")), SelectionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Invalid(_)));

    let snapshot = recorder.snapshot();
    assert_eq!(snapshot.operation_count("selection", "create"), 2);
    assert_eq!(snapshot.error_count("selection", "create"), 1);
    assert_eq!(snapshot.operation_count("selection", "reconcile"), 0);
}

// -- pipeline ---------------------------------------------------------------

#[tokio::test]
async fn second_apply_issues_no_writes() {
    let fake = FakeSonar::new();
    let pipeline = Pipeline::new(fake.client());
    let cancel = CancellationToken::new();

    let first = pipeline.apply(&cancel, &manifest()).await.unwrap();
    assert!(first.outcomes.iter().all(|o| o.change == Change::Created));
    assert_eq!(fake.gate_by_name("strict").unwrap().conditions.len(), 2);
    assert_eq!(fake.portfolio("java").unwrap().selection(), Some(filter("java")));

    fake.clear_requests();
    let second = pipeline.apply(&cancel, &manifest()).await.unwrap();
    assert!(fake.mutations().is_empty(), "{:?}", fake.mutations());
    assert_eq!(second.changed(), 0);
    assert_eq!(second.write_count(), 0);
}

#[tokio::test]
async fn manifest_with_empty_compliance_applies_once() {
    let yaml = r#"
portfolios:
  - key: java
    name: Java
    selection:
      mode: FILTER
      filters:
        languages: [java]
        compliance: {}
"#;
    let desired = manifest::parse(yaml, Path::new("sonarsync.yaml")).unwrap();
    let fake = FakeSonar::new();
    let pipeline = Pipeline::new(fake.client()).with_options(SelectionOptions {
        verify_filters: true,
    });
    let cancel = CancellationToken::new();

    pipeline.apply(&cancel, &desired).await.unwrap();
    fake.clear_requests();
    let second = pipeline.apply(&cancel, &desired).await.unwrap();

    assert!(fake.mutations().is_empty(), "{:?}", fake.mutations());
    assert_eq!(second.changed(), 0);
}

#[tokio::test]
async fn plan_reports_without_writing() {
    let fake = FakeSonar::new();
    let pipeline = Pipeline::new(fake.client());

    let report = pipeline
        .plan(&CancellationToken::new(), &manifest())
        .await
        .unwrap();

    assert!(fake.mutations().is_empty());
    assert_eq!(report.outcomes.len(), 6);
    let gate = &report.outcomes[2];
    assert_eq!(gate.key, "strict");
    assert_eq!(gate.operations.len(), 3);
    assert!(matches!(gate.operations[0], Operation::CreateGate { .. }));
    let java = &report.outcomes[5];
    assert_eq!(java.operations.len(), 3);
}

#[tokio::test]
async fn header_drift_updates_portfolio_and_project() {
    let fake = FakeSonar::new();
    let pipeline = Pipeline::new(fake.client());
    let cancel = CancellationToken::new();
    pipeline.apply(&cancel, &manifest()).await.unwrap();

    let mut changed = manifest();
    changed.projects[0].visibility = Visibility::Public;
    changed.portfolios[1].name = "All services".to_string();
    fake.clear_requests();
    let report = pipeline.apply(&cancel, &changed).await.unwrap();

    assert_eq!(report.outcomes[0].change, Change::Updated);
    assert_eq!(report.outcomes[4].change, Change::Updated);
    assert_eq!(
        report.outcomes[4].operations,
        vec![Operation::UpdatePortfolio {
            key: PortfolioKey::from("services")
        }]
    );
    let paths: Vec<_> = fake.mutations().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["projects/update", "portfolios/update"]);
}

#[tokio::test]
async fn destroy_removes_everything_and_tolerates_absence() {
    let fake = FakeSonar::new();
    let pipeline = Pipeline::new(fake.client());
    let cancel = CancellationToken::new();
    pipeline.apply(&cancel, &manifest()).await.unwrap();

    let report = pipeline.destroy(&cancel, &manifest()).await.unwrap();
    assert!(report.outcomes.iter().all(|o| o.change == Change::Deleted));
    assert_eq!(report.outcomes[0].key, "java");
    assert!(fake.gate_by_name("strict").is_none());
    assert!(fake.project(&ProjectKey::from("svc-orders")).is_none());

    let again = pipeline.destroy(&cancel, &manifest()).await.unwrap();
    assert!(again.outcomes.iter().all(|o| o.change == Change::Absent));
    assert_eq!(again.changed(), 0);
}

#[tokio::test]
async fn pipeline_failure_keeps_earlier_outcomes() {
    let fake = FakeSonar::new();
    fake.fail_always("portfolios/create", Failure::Status(500));
    let pipeline = Pipeline::new(fake.client());

    let err = pipeline
        .apply(&CancellationToken::new(), &manifest())
        .await
        .unwrap_err();

    assert_eq!(err.resource, "portfolio hand-picked");
    assert_eq!(err.outcomes.len(), 3);
    assert!(matches!(err.source, ReconcileError::Api(_)));
}

#[tokio::test]
async fn invalid_manifest_is_rejected_before_any_request() {
    let fake = FakeSonar::new();
    let mut invalid = manifest();
    invalid.projects.push(project("svc-orders"));

    let err = Pipeline::new(fake.client())
        .apply(&CancellationToken::new(), &invalid)
        .await
        .unwrap_err();

    assert_eq!(err.resource, "manifest");
    assert!(matches!(err.source, ReconcileError::Invalid(_)));
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn run_report_serializes_operations_by_kind() {
    let fake = FakeSonar::new();
    let report = Pipeline::new(fake.client())
        .plan(&CancellationToken::new(), &manifest())
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["mode"], "plan");
    assert_eq!(json["outcomes"][0]["change"], "created");
    assert_eq!(json["outcomes"][0]["operations"][0]["kind"], "create_project");
}
