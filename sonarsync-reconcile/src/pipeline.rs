//! Manifest-wide pipeline shared by `apply`, `plan` and `destroy`.
//!
//! Apply and plan walk projects, then quality gates, then portfolios, in
//! manifest order. Destroy walks them in reverse dependency order. The
//! first failure stops the run and comes back with every outcome
//! completed before it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sonarsync_client::{ApiError, RemotePortfolio, SonarClient};
use sonarsync_core::{GateId, Manifest, Portfolio, Project, QualityGateSpec};

use crate::conditions;
use crate::error::{Operation, PipelineError, ReconcileError};
use crate::selection::{self, SelectionOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Converge the remote to the manifest.
    Apply,
    /// Read only; report what `Apply` would do.
    Plan,
    /// Delete everything the manifest declares.
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Project,
    QualityGate,
    Portfolio,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Project => "project",
            ResourceKind::QualityGate => "quality gate",
            ResourceKind::Portfolio => "portfolio",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Created,
    Updated,
    Unchanged,
    Deleted,
    /// Destroy found nothing to delete.
    Absent,
}

/// Outcome for a single declared resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceOutcome {
    pub kind: ResourceKind,
    pub key: String,
    pub change: Change,
    /// Applied operations, or planned ones in [`RunMode::Plan`].
    pub operations: Vec<Operation>,
}

impl ResourceOutcome {
    fn new(kind: ResourceKind, key: impl Into<String>, change: Change) -> Self {
        Self {
            kind,
            key: key.into(),
            change,
            operations: Vec::new(),
        }
    }

    fn with_operations(mut self, operations: Vec<Operation>) -> Self {
        self.operations = operations;
        self
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ResourceOutcome>,
}

impl RunReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Outcomes other than `Unchanged` / `Absent`.
    pub fn changed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.change, Change::Unchanged | Change::Absent))
            .count()
    }

    /// Remote writes issued (or planned).
    pub fn write_count(&self) -> usize {
        self.outcomes
            .iter()
            .flat_map(|o| &o.operations)
            .filter(|op| op.is_write())
            .count()
    }
}

/// Placeholder id for conditions of a gate that does not exist yet.
fn pending_gate(name: &str) -> GateId {
    GateId::from(format!("<new {name}>"))
}

fn same_description(remote: Option<&str>, desired: Option<&str>) -> bool {
    remote.filter(|d| !d.is_empty()) == desired.filter(|d| !d.is_empty())
}

/// Runs a [`Manifest`] against one remote.
#[derive(Debug, Clone)]
pub struct Pipeline {
    client: SonarClient,
    options: SelectionOptions,
}

impl Pipeline {
    pub fn new(client: SonarClient) -> Self {
        Self {
            client,
            options: SelectionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SelectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn client(&self) -> &SonarClient {
        &self.client
    }

    pub async fn apply(
        &self,
        cancel: &CancellationToken,
        manifest: &Manifest,
    ) -> Result<RunReport, PipelineError> {
        self.run(cancel, manifest, RunMode::Apply).await
    }

    pub async fn plan(
        &self,
        cancel: &CancellationToken,
        manifest: &Manifest,
    ) -> Result<RunReport, PipelineError> {
        self.run(cancel, manifest, RunMode::Plan).await
    }

    pub async fn destroy(
        &self,
        cancel: &CancellationToken,
        manifest: &Manifest,
    ) -> Result<RunReport, PipelineError> {
        self.run(cancel, manifest, RunMode::Destroy).await
    }

    /// Run the pipeline for `mode`. The manifest is validated before any
    /// remote call.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        manifest: &Manifest,
        mode: RunMode,
    ) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        let mut outcomes = Vec::new();

        if let Err(err) = manifest.validate() {
            return Err(PipelineError {
                resource: "manifest".to_string(),
                outcomes,
                source: err.into(),
            });
        }

        match mode {
            RunMode::Apply | RunMode::Plan => {
                for project in &manifest.projects {
                    let result = self.converge_project(cancel, project, mode).await;
                    record(&mut outcomes, ResourceKind::Project, project.key.as_str(), result)?;
                }
                for gate in &manifest.quality_gates {
                    let result = self.converge_gate(cancel, gate, mode).await;
                    record(&mut outcomes, ResourceKind::QualityGate, &gate.name, result)?;
                }
                for portfolio in &manifest.portfolios {
                    let result = self.converge_portfolio(cancel, portfolio, mode).await;
                    record(&mut outcomes, ResourceKind::Portfolio, portfolio.key.as_str(), result)?;
                }
            }
            RunMode::Destroy => {
                for portfolio in manifest.portfolios.iter().rev() {
                    let result = self.destroy_portfolio(cancel, portfolio).await;
                    record(&mut outcomes, ResourceKind::Portfolio, portfolio.key.as_str(), result)?;
                }
                for gate in manifest.quality_gates.iter().rev() {
                    let result = self.destroy_gate(cancel, gate).await;
                    record(&mut outcomes, ResourceKind::QualityGate, &gate.name, result)?;
                }
                for project in manifest.projects.iter().rev() {
                    let result = self.destroy_project(cancel, project).await;
                    record(&mut outcomes, ResourceKind::Project, project.key.as_str(), result)?;
                }
            }
        }

        let report = RunReport {
            mode,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            mode = ?mode,
            resources = report.outcomes.len(),
            changed = report.changed(),
            writes = report.write_count(),
            duration_ms = report.duration_ms(),
            "run finished"
        );
        Ok(report)
    }

    // -- projects -----------------------------------------------------------

    async fn converge_project(
        &self,
        cancel: &CancellationToken,
        desired: &Project,
        mode: RunMode,
    ) -> Result<ResourceOutcome, ReconcileError> {
        let projects = self.client.projects();
        let key = desired.key.as_str();
        let current = match projects.read(cancel, &desired.key).await {
            Ok(current) => current,
            Err(err) if err.is_not_found() => {
                if mode == RunMode::Apply {
                    projects.create(cancel, desired).await?;
                }
                return Ok(ResourceOutcome::new(ResourceKind::Project, key, Change::Created)
                    .with_operations(vec![Operation::CreateProject {
                        key: desired.key.clone(),
                    }]));
            }
            Err(err) => return Err(err.into()),
        };

        if current.main_branch != desired.main_branch {
            warn!(
                project = key,
                remote = %current.main_branch,
                declared = %desired.main_branch,
                "main branch differs and cannot be changed by update"
            );
        }
        let in_sync = current.name == desired.name
            && current.visibility == desired.visibility
            && current.tags == desired.tags;
        if in_sync {
            return Ok(ResourceOutcome::new(ResourceKind::Project, key, Change::Unchanged));
        }
        if mode == RunMode::Apply {
            projects.update(cancel, desired).await?;
        }
        Ok(
            ResourceOutcome::new(ResourceKind::Project, key, Change::Updated).with_operations(
                vec![Operation::UpdateProject {
                    key: desired.key.clone(),
                }],
            ),
        )
    }

    async fn destroy_project(
        &self,
        cancel: &CancellationToken,
        project: &Project,
    ) -> Result<ResourceOutcome, ReconcileError> {
        let deleted = absent_ok(self.client.projects().delete(cancel, &project.key).await)?;
        Ok(destroyed(
            ResourceKind::Project,
            project.key.as_str(),
            deleted,
            Operation::DeleteProject {
                key: project.key.clone(),
            },
        ))
    }

    // -- quality gates ------------------------------------------------------

    async fn converge_gate(
        &self,
        cancel: &CancellationToken,
        spec: &QualityGateSpec,
        mode: RunMode,
    ) -> Result<ResourceOutcome, ReconcileError> {
        let gates = self.client.quality_gates();
        let current = match gates.show_by_name(cancel, &spec.name).await {
            Ok(current) => Some(current),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        match (current, mode) {
            (None, RunMode::Plan) => {
                let pending = pending_gate(&spec.name);
                let plan = conditions::plan(&spec.name, &[], &spec.conditions)?;
                let mut operations = vec![Operation::CreateGate {
                    name: spec.name.clone(),
                }];
                operations.extend(plan.operations(&pending));
                Ok(ResourceOutcome::new(ResourceKind::QualityGate, &spec.name, Change::Created)
                    .with_operations(operations))
            }
            (None, _) => {
                spec.validate()?;
                let created = gates.create(cancel, &spec.name).await?;
                let create = Operation::CreateGate {
                    name: spec.name.clone(),
                };
                let report = conditions::reconcile(&self.client, cancel, &created.id, &spec.conditions)
                    .await
                    .map_err(|err| {
                        err.after(
                            vec![create.clone()],
                            Operation::ReadGate {
                                gate: created.id.to_string(),
                            },
                        )
                    })?;
                let mut operations = vec![create];
                operations.extend(report.applied);
                Ok(ResourceOutcome::new(ResourceKind::QualityGate, &spec.name, Change::Created)
                    .with_operations(operations))
            }
            (Some(current), RunMode::Plan) => {
                let plan = conditions::plan(&spec.name, &current.conditions, &spec.conditions)?;
                let change = if plan.is_noop() {
                    Change::Unchanged
                } else {
                    Change::Updated
                };
                Ok(ResourceOutcome::new(ResourceKind::QualityGate, &spec.name, change)
                    .with_operations(plan.operations(&current.id)))
            }
            (Some(current), _) => {
                let report =
                    conditions::reconcile(&self.client, cancel, &current.id, &spec.conditions)
                        .await?;
                let change = if report.applied.is_empty() {
                    Change::Unchanged
                } else {
                    Change::Updated
                };
                Ok(ResourceOutcome::new(ResourceKind::QualityGate, &spec.name, change)
                    .with_operations(report.applied))
            }
        }
    }

    async fn destroy_gate(
        &self,
        cancel: &CancellationToken,
        spec: &QualityGateSpec,
    ) -> Result<ResourceOutcome, ReconcileError> {
        let gates = self.client.quality_gates();
        let gate = match gates.show_by_name(cancel, &spec.name).await {
            Ok(gate) => gate,
            Err(err) if err.is_not_found() => {
                return Ok(ResourceOutcome::new(
                    ResourceKind::QualityGate,
                    &spec.name,
                    Change::Absent,
                ))
            }
            Err(err) => return Err(err.into()),
        };
        let deleted = absent_ok(gates.delete(cancel, &gate.id).await)?;
        Ok(destroyed(
            ResourceKind::QualityGate,
            &spec.name,
            deleted,
            Operation::DeleteGate { id: gate.id },
        ))
    }

    // -- portfolios ---------------------------------------------------------

    async fn converge_portfolio(
        &self,
        cancel: &CancellationToken,
        desired: &Portfolio,
        mode: RunMode,
    ) -> Result<ResourceOutcome, ReconcileError> {
        let portfolios = self.client.portfolios();
        let key = desired.key.as_str();
        let current = match portfolios.show(cancel, &desired.key).await {
            Ok(current) => Some(current),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        match (current, mode) {
            (None, RunMode::Plan) => {
                desired.selection.validate(&desired.key)?;
                let blank = RemotePortfolio {
                    key: key.to_string(),
                    name: desired.name.clone(),
                    description: desired.description.clone(),
                    ..RemotePortfolio::default()
                };
                let mut operations = vec![Operation::CreatePortfolio {
                    key: desired.key.clone(),
                }];
                operations.extend(selection::plan(&blank, &desired.selection).operations(&desired.key));
                Ok(ResourceOutcome::new(ResourceKind::Portfolio, key, Change::Created)
                    .with_operations(operations))
            }
            (None, _) => {
                let report = selection::create(&self.client, cancel, desired, self.options).await?;
                Ok(ResourceOutcome::new(ResourceKind::Portfolio, key, Change::Created)
                    .with_operations(report.applied))
            }
            (Some(current), mode) => {
                let header_changed = current.name != desired.name
                    || !same_description(
                        current.description.as_deref(),
                        desired.description.as_deref(),
                    );
                let mut operations = Vec::new();
                if header_changed {
                    if mode == RunMode::Apply {
                        portfolios.update(cancel, desired).await?;
                    }
                    operations.push(Operation::UpdatePortfolio {
                        key: desired.key.clone(),
                    });
                }

                if mode == RunMode::Plan {
                    desired.selection.validate(&desired.key)?;
                    operations.extend(
                        selection::plan(&current, &desired.selection).operations(&desired.key),
                    );
                } else {
                    let report = selection::reconcile(
                        &self.client,
                        cancel,
                        &desired.key,
                        &desired.selection,
                        self.options,
                    )
                    .await
                    .map_err(|err| {
                        err.after(
                            operations.clone(),
                            Operation::ReadPortfolio {
                                key: desired.key.clone(),
                            },
                        )
                    })?;
                    operations.extend(report.applied);
                }

                let change = if operations.is_empty() {
                    Change::Unchanged
                } else {
                    Change::Updated
                };
                Ok(ResourceOutcome::new(ResourceKind::Portfolio, key, change)
                    .with_operations(operations))
            }
        }
    }

    async fn destroy_portfolio(
        &self,
        cancel: &CancellationToken,
        portfolio: &Portfolio,
    ) -> Result<ResourceOutcome, ReconcileError> {
        let deleted = absent_ok(self.client.portfolios().delete(cancel, &portfolio.key).await)?;
        Ok(destroyed(
            ResourceKind::Portfolio,
            portfolio.key.as_str(),
            deleted,
            Operation::DeletePortfolio {
                key: portfolio.key.clone(),
            },
        ))
    }
}

/// `Ok(true)` when deleted, `Ok(false)` when it was already gone.
fn absent_ok(result: Result<(), ApiError>) -> Result<bool, ReconcileError> {
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn destroyed(kind: ResourceKind, key: &str, deleted: bool, operation: Operation) -> ResourceOutcome {
    if deleted {
        ResourceOutcome::new(kind, key, Change::Deleted).with_operations(vec![operation])
    } else {
        ResourceOutcome::new(kind, key, Change::Absent)
    }
}

fn record(
    outcomes: &mut Vec<ResourceOutcome>,
    kind: ResourceKind,
    key: &str,
    result: Result<ResourceOutcome, ReconcileError>,
) -> Result<(), PipelineError> {
    match result {
        Ok(outcome) => {
            outcomes.push(outcome);
            Ok(())
        }
        Err(source) => Err(PipelineError {
            resource: format!("{kind} {key}"),
            outcomes: std::mem::take(outcomes),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_descriptions_compare_equal() {
        assert!(same_description(None, Some("")));
        assert!(same_description(Some(""), None));
        assert!(!same_description(Some("a"), None));
    }

    #[test]
    fn report_counts_only_writes() {
        let now = Utc::now();
        let key = sonarsync_core::PortfolioKey::from("pf");
        let report = RunReport {
            mode: RunMode::Apply,
            started_at: now,
            finished_at: now,
            outcomes: vec![
                ResourceOutcome::new(ResourceKind::Portfolio, "pf", Change::Updated)
                    .with_operations(vec![
                        Operation::ConfigureSelection {
                            key: key.clone(),
                            mode: sonarsync_core::SelectionMode::Manual,
                        },
                        Operation::VerifySelection {
                            key,
                            mode: sonarsync_core::SelectionMode::Manual,
                        },
                    ]),
                ResourceOutcome::new(ResourceKind::Project, "a", Change::Unchanged),
            ],
        };
        assert_eq!(report.changed(), 1);
        assert_eq!(report.write_count(), 1);
        assert_eq!(report.duration_ms(), 0);
    }
}
