//! Error types for sonarsync-reconcile.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use sonarsync_client::{ApiError, RemotePortfolio};
use sonarsync_core::{
    Comparator, Condition, ConditionId, GateId, PortfolioKey, ProjectKey, SelectionMode,
    ValidationError,
};

/// One remote call issued (or planned) by a reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    CreateProject { key: ProjectKey },
    UpdateProject { key: ProjectKey },
    DeleteProject { key: ProjectKey },
    ReadGate { gate: String },
    CreateGate { name: String },
    DeleteGate { id: GateId },
    DeleteCondition { gate: GateId, id: Option<ConditionId>, metric: String },
    CreateCondition {
        gate: GateId,
        metric: String,
        op: Comparator,
        error: String,
        warning: Option<String>,
    },
    ReadPortfolio { key: PortfolioKey },
    CreatePortfolio { key: PortfolioKey },
    UpdatePortfolio { key: PortfolioKey },
    DeletePortfolio { key: PortfolioKey },
    ConfigureSelection { key: PortfolioKey, mode: SelectionMode },
    VerifySelection { key: PortfolioKey, mode: SelectionMode },
    ConfigureFilters { key: PortfolioKey },
    VerifyFilters { key: PortfolioKey },
}

impl Operation {
    pub(crate) fn create_condition(gate: &GateId, condition: &Condition) -> Self {
        Operation::CreateCondition {
            gate: gate.clone(),
            metric: condition.metric.clone(),
            op: condition.op,
            error: condition.error.clone(),
            warning: condition.warning.clone(),
        }
    }

    pub(crate) fn delete_condition(gate: &GateId, condition: &Condition) -> Self {
        Operation::DeleteCondition {
            gate: gate.clone(),
            id: condition.id.clone(),
            metric: condition.metric.clone(),
        }
    }

    /// Whether this operation changes remote state.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Operation::ReadGate { .. }
                | Operation::ReadPortfolio { .. }
                | Operation::VerifySelection { .. }
                | Operation::VerifyFilters { .. }
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateProject { key } => write!(f, "create project {key}"),
            Operation::UpdateProject { key } => write!(f, "update project {key}"),
            Operation::DeleteProject { key } => write!(f, "delete project {key}"),
            Operation::ReadGate { gate } => write!(f, "read quality gate {gate}"),
            Operation::CreateGate { name } => write!(f, "create quality gate {name}"),
            Operation::DeleteGate { id } => write!(f, "delete quality gate {id}"),
            Operation::DeleteCondition { gate, id, metric } => match id {
                Some(id) => write!(f, "delete condition {id} ({metric}) from gate {gate}"),
                None => write!(f, "delete condition ({metric}) from gate {gate}"),
            },
            Operation::CreateCondition {
                gate,
                metric,
                op,
                error,
                warning,
            } => {
                write!(f, "create condition {metric} {op} {error}")?;
                if let Some(warning) = warning {
                    write!(f, " (warning {warning})")?;
                }
                write!(f, " on gate {gate}")
            }
            Operation::ReadPortfolio { key } => write!(f, "read portfolio {key}"),
            Operation::CreatePortfolio { key } => write!(f, "create portfolio {key}"),
            Operation::UpdatePortfolio { key } => write!(f, "update portfolio {key}"),
            Operation::DeletePortfolio { key } => write!(f, "delete portfolio {key}"),
            Operation::ConfigureSelection { key, mode } => {
                write!(f, "configure {mode} selection of portfolio {key}")
            }
            Operation::VerifySelection { key, mode } => {
                write!(f, "verify {mode} selection of portfolio {key}")
            }
            Operation::ConfigureFilters { key } => write!(f, "configure filters of portfolio {key}"),
            Operation::VerifyFilters { key } => write!(f, "verify filters of portfolio {key}"),
        }
    }
}

/// Why one step of a multi-step sequence failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Fields of a previous mode are still visible after reconfiguring.
    #[error("stale fields still present after switching to {mode}: {}", .fields.join(", "))]
    StaleSelection {
        mode: SelectionMode,
        fields: Vec<&'static str>,
    },

    #[error("selection mode reads back as {}, expected {expected}", display_mode(.actual))]
    ModeMismatch {
        expected: SelectionMode,
        actual: Option<SelectionMode>,
    },

    #[error("filters read back differ from the configured filters")]
    FiltersDrift,
}

fn display_mode(mode: &Option<SelectionMode>) -> String {
    mode.map(|m| m.to_string())
        .unwrap_or_else(|| "unset".to_string())
}

impl StepError {
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::Api(err) => err.kind(),
            StepError::StaleSelection { .. } => "stale_selection",
            StepError::ModeMismatch { .. } => "mode_mismatch",
            StepError::FiltersDrift => "filters_drift",
        }
    }
}

/// Best-known remote state after a failed sequence, re-read from the remote.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Conditions(Vec<Condition>),
    Portfolio(Box<RemotePortfolio>),
    /// The re-read itself failed.
    Unavailable(String),
}

/// A multi-step sequence stopped partway. Nothing already applied was
/// rolled back.
#[derive(Debug, Error)]
#[error("{failed} failed after {} completed operation(s): {cause}", .completed.len())]
pub struct PartialReconciliation {
    pub completed: Vec<Operation>,
    pub failed: Operation,
    #[source]
    pub cause: StepError,
    pub observed: Observed,
}

/// All errors that can arise from reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Failed before anything was written.
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("invalid desired state: {0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Partial(Box<PartialReconciliation>),
}

impl From<PartialReconciliation> for ReconcileError {
    fn from(partial: PartialReconciliation) -> Self {
        ReconcileError::Partial(Box::new(partial))
    }
}

impl ReconcileError {
    /// Stable label for telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Api(err) => err.kind(),
            ReconcileError::Invalid(_) => "validation",
            ReconcileError::Partial(partial) => partial.cause.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::Api(err) if err.is_not_found())
    }

    pub fn partial(&self) -> Option<&PartialReconciliation> {
        match self {
            ReconcileError::Partial(partial) => Some(partial),
            _ => None,
        }
    }

    /// Put `earlier` in front of whatever this error reports as completed.
    /// A plain API error becomes a partial failure of `step` when
    /// `earlier` is non-empty.
    pub(crate) fn after(self, earlier: Vec<Operation>, step: Operation) -> Self {
        if earlier.is_empty() {
            return self;
        }
        match self {
            ReconcileError::Partial(mut partial) => {
                let mut completed = earlier;
                completed.append(&mut partial.completed);
                partial.completed = completed;
                ReconcileError::Partial(partial)
            }
            ReconcileError::Api(cause) => PartialReconciliation {
                completed: earlier,
                failed: step,
                cause: StepError::Api(cause),
                observed: Observed::Unavailable("not re-read".to_string()),
            }
            .into(),
            other => other,
        }
    }
}

/// Ordered record of the operations a sequence has applied so far.
#[derive(Debug, Default)]
pub(crate) struct OperationLog {
    completed: Vec<Operation>,
}

impl OperationLog {
    pub fn record(&mut self, operation: Operation) {
        info!(operation = %operation, "applied");
        self.completed.push(operation);
    }

    pub fn fail(
        self,
        failed: Operation,
        cause: impl Into<StepError>,
        observed: Observed,
    ) -> ReconcileError {
        PartialReconciliation {
            completed: self.completed,
            failed,
            cause: cause.into(),
            observed,
        }
        .into()
    }

    pub fn into_completed(self) -> Vec<Operation> {
        self.completed
    }
}

/// Error from a manifest-wide run: the failing resource plus everything
/// applied before it.
#[derive(Debug, Error)]
#[error("{resource}: {source}")]
pub struct PipelineError {
    pub resource: String,
    pub outcomes: Vec<crate::pipeline::ResourceOutcome>,
    #[source]
    pub source: ReconcileError,
}
