//! Condition-set reconciliation for one quality gate.
//!
//! The remote has no condition update, so a condition whose operator or
//! thresholds changed is deleted and created again. All deletions run
//! before any creation, so a reused metric never collides with its old
//! condition. The first failing call stops the sequence; the gate is then
//! re-read and reported as observed.

use std::collections::BTreeSet;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sonarsync_client::{ApiError, SonarClient};
use sonarsync_core::{Condition, GateId, ValidationError};

use crate::error::{Observed, Operation, OperationLog, ReconcileError};

/// Calls needed to move a gate's conditions to the desired set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConditionPlan {
    /// Current conditions absent from, or different in, the desired set.
    pub deletes: Vec<Condition>,
    /// Desired conditions without an identical current condition.
    pub creates: Vec<Condition>,
    /// Current conditions kept as they are.
    pub unchanged: Vec<Condition>,
}

impl ConditionPlan {
    pub fn is_noop(&self) -> bool {
        self.deletes.is_empty() && self.creates.is_empty()
    }

    /// Deletions first, then creations.
    pub fn operations(&self, gate: &GateId) -> Vec<Operation> {
        self.deletes
            .iter()
            .map(|c| Operation::delete_condition(gate, c))
            .chain(self.creates.iter().map(|c| Operation::create_condition(gate, c)))
            .collect()
    }
}

/// Diff `current` against `desired`.
///
/// A current condition is kept only when a desired condition has the same
/// metric, operator, error and warning. Remote ids on `desired` are
/// ignored. `gate` labels the error when `desired` repeats a metric.
pub fn plan(
    gate: &str,
    current: &[Condition],
    desired: &[Condition],
) -> Result<ConditionPlan, ValidationError> {
    let mut metrics = BTreeSet::new();
    for condition in desired {
        if !metrics.insert(condition.metric.as_str()) {
            return Err(ValidationError::DuplicateMetric {
                gate: gate.to_string(),
                metric: condition.metric.clone(),
            });
        }
    }

    let mut plan = ConditionPlan::default();
    let mut matched = vec![false; desired.len()];

    for existing in current {
        let keep = desired
            .iter()
            .enumerate()
            .find(|(idx, wanted)| !matched[*idx] && wanted.same_rule(existing))
            .map(|(idx, _)| idx);
        match keep {
            Some(idx) => {
                matched[idx] = true;
                plan.unchanged.push(existing.clone());
            }
            None => plan.deletes.push(existing.clone()),
        }
    }

    plan.creates = desired
        .iter()
        .zip(&matched)
        .filter(|(_, matched)| !**matched)
        .map(|(wanted, _)| Condition {
            id: None,
            ..wanted.clone()
        })
        .collect();

    Ok(plan)
}

/// What one reconciliation did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionReport {
    pub gate: GateId,
    pub plan: ConditionPlan,
    pub applied: Vec<Operation>,
}

/// Bring the conditions of gate `gate` to `desired`.
///
/// Current state is always read fresh, so running this again after a
/// partial failure finishes the job without repeating applied calls.
pub async fn reconcile(
    client: &SonarClient,
    cancel: &CancellationToken,
    gate: &GateId,
    desired: &[Condition],
) -> Result<ConditionReport, ReconcileError> {
    let result = reconcile_logged(client, cancel, gate, desired, OperationLog::default()).await;
    client.record_operation(
        "condition_set",
        "reconcile",
        result.as_ref().err().map(ReconcileError::kind),
    );
    result
}

async fn reconcile_logged(
    client: &SonarClient,
    cancel: &CancellationToken,
    gate: &GateId,
    desired: &[Condition],
    mut log: OperationLog,
) -> Result<ConditionReport, ReconcileError> {
    let gates = client.quality_gates();
    let current = match gates.show(cancel, gate).await {
        Ok(current) => current,
        Err(err) => {
            let step = Operation::ReadGate {
                gate: gate.to_string(),
            };
            return Err(ReconcileError::Api(err).after(log.into_completed(), step));
        }
    };

    let plan = plan(&current.name, &current.conditions, desired)?;
    if plan.is_noop() {
        debug!(gate = %gate, conditions = plan.unchanged.len(), "conditions up to date");
        return Ok(ConditionReport {
            gate: gate.clone(),
            plan,
            applied: log.into_completed(),
        });
    }
    info!(
        gate = %gate,
        deletes = plan.deletes.len(),
        creates = plan.creates.len(),
        unchanged = plan.unchanged.len(),
        "reconciling conditions"
    );

    for condition in &plan.deletes {
        let operation = Operation::delete_condition(gate, condition);
        let result = match &condition.id {
            Some(id) => gates.delete_condition(cancel, id).await,
            None => Err(ApiError::RequestBuild {
                path: "qualitygates/delete_condition".to_string(),
                reason: format!("condition on '{}' has no remote id", condition.metric),
            }),
        };
        match result {
            Ok(()) => log.record(operation),
            Err(cause) => {
                let observed = observe(client, cancel, gate).await;
                return Err(log.fail(operation, cause, observed));
            }
        }
    }

    for condition in &plan.creates {
        let operation = Operation::create_condition(gate, condition);
        match gates.create_condition(cancel, gate, condition).await {
            Ok(_) => log.record(operation),
            Err(cause) => {
                let observed = observe(client, cancel, gate).await;
                return Err(log.fail(operation, cause, observed));
            }
        }
    }

    Ok(ConditionReport {
        gate: gate.clone(),
        plan,
        applied: log.into_completed(),
    })
}

async fn observe(client: &SonarClient, cancel: &CancellationToken, gate: &GateId) -> Observed {
    match client.quality_gates().show(cancel, gate).await {
        Ok(current) => Observed::Conditions(current.conditions),
        Err(err) => Observed::Unavailable(err.to_string()),
    }
}
