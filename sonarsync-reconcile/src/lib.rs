//! # sonarsync-reconcile
//!
//! Converges SonarQube to a desired state.
//!
//! [`conditions::reconcile`] brings one quality gate's condition set in
//! line, [`selection::reconcile`] does the same for a portfolio's selection
//! and filters, and [`Pipeline`] runs a whole [`sonarsync_core::Manifest`].
//! Every reconciler reads the remote fresh, so a rerun after a partial
//! failure picks up where the last one stopped.

pub mod conditions;
pub mod error;
pub mod pipeline;
pub mod selection;

pub use conditions::{ConditionPlan, ConditionReport};
pub use error::{
    Observed, Operation, PartialReconciliation, PipelineError, ReconcileError, StepError,
};
pub use pipeline::{Change, Pipeline, ResourceKind, ResourceOutcome, RunMode, RunReport};
pub use selection::{SelectionOptions, SelectionPlan, SelectionReport, SelectionStep};
