//! Portfolio selection and filter reconciliation.
//!
//! The selection mode (MANUAL, REGEXP, FILTER) decides which fields are
//! meaningful. Moving between modes reconfigures the selection as a whole
//! with only the new mode's fields; `configure_selection` is mode-scoped
//! and supersedes the old mode, which is checked by reading the portfolio
//! back. FILTER additionally needs `configure_filters` once the selection
//! call has succeeded. If that second call fails, the portfolio stays in
//! FILTER mode with empty filters until the next run.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sonarsync_client::{RemotePortfolio, SonarClient};
use sonarsync_core::{Filters, Portfolio, PortfolioKey, Selection, SelectionMode};

use crate::error::{Observed, Operation, OperationLog, ReconcileError, StepError};

/// Reconciliation knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionOptions {
    /// Read the portfolio back after `configure_filters` and fail when the
    /// filters differ from what was sent.
    pub verify_filters: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SelectionStep {
    ConfigureSelection { selection: Selection },
    ConfigureFilters { filters: Filters },
}

impl SelectionStep {
    pub fn operation(&self, key: &PortfolioKey) -> Operation {
        match self {
            SelectionStep::ConfigureSelection { selection } => Operation::ConfigureSelection {
                key: key.clone(),
                mode: selection.mode(),
            },
            SelectionStep::ConfigureFilters { .. } => {
                Operation::ConfigureFilters { key: key.clone() }
            }
        }
    }
}

/// Calls needed to move a portfolio's selection to the desired one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionPlan {
    pub from: Option<SelectionMode>,
    pub to: SelectionMode,
    pub steps: Vec<SelectionStep>,
    /// Inactive-mode fields observed on the remote before planning.
    pub stale_fields: Vec<&'static str>,
}

impl SelectionPlan {
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_mode_change(&self) -> bool {
        self.from != Some(self.to)
    }

    pub fn operations(&self, key: &PortfolioKey) -> Vec<Operation> {
        self.steps.iter().map(|step| step.operation(key)).collect()
    }
}

fn full_configuration(desired: &Selection) -> Vec<SelectionStep> {
    let mut steps = vec![SelectionStep::ConfigureSelection {
        selection: desired.clone(),
    }];
    if let Selection::Filter { filters } = desired {
        steps.push(SelectionStep::ConfigureFilters {
            filters: filters.clone(),
        });
    }
    steps
}

/// Diff the remote selection against `desired`.
///
/// - mode change, or stale fields of another mode: full reconfiguration
/// - same MANUAL/REGEXP mode with different fields: `configure_selection`
/// - same FILTER mode with different filters: `configure_filters` only
///
/// `desired` is compared in its normalized form, the shape the remote
/// reads back.
pub fn plan(current: &RemotePortfolio, desired: &Selection) -> SelectionPlan {
    let desired = &desired.normalized();
    let from = current.mode();
    let to = desired.mode();
    let stale_fields = current.stale_fields();

    let steps = if from != Some(to) || !stale_fields.is_empty() {
        full_configuration(desired)
    } else {
        match desired {
            Selection::Filter { filters } => {
                if current.filters() == *filters {
                    Vec::new()
                } else {
                    vec![SelectionStep::ConfigureFilters {
                        filters: filters.clone(),
                    }]
                }
            }
            _ if current.selection().as_ref() == Some(desired) => Vec::new(),
            _ => vec![SelectionStep::ConfigureSelection {
                selection: desired.clone(),
            }],
        }
    };

    SelectionPlan {
        from,
        to,
        steps,
        stale_fields,
    }
}

/// What one reconciliation did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionReport {
    pub key: PortfolioKey,
    pub plan: SelectionPlan,
    pub applied: Vec<Operation>,
}

/// Bring the selection of portfolio `key` to `desired`.
pub async fn reconcile(
    client: &SonarClient,
    cancel: &CancellationToken,
    key: &PortfolioKey,
    desired: &Selection,
    options: SelectionOptions,
) -> Result<SelectionReport, ReconcileError> {
    let result =
        reconcile_logged(client, cancel, key, desired, options, OperationLog::default()).await;
    client.record_operation(
        "selection",
        "reconcile",
        result.as_ref().err().map(ReconcileError::kind),
    );
    result
}

/// Create the portfolio and configure its selection.
pub async fn create(
    client: &SonarClient,
    cancel: &CancellationToken,
    portfolio: &Portfolio,
    options: SelectionOptions,
) -> Result<SelectionReport, ReconcileError> {
    let result = async {
        portfolio.selection.validate(&portfolio.key)?;
        let created = client.portfolios().create(cancel, portfolio).await?;
        let mut log = OperationLog::default();
        log.record(Operation::CreatePortfolio {
            key: portfolio.key.clone(),
        });
        let plan = plan(&created, &portfolio.selection);
        apply(client, cancel, &portfolio.key, plan, options, log).await
    }
    .await;
    client.record_operation(
        "selection",
        "create",
        result.as_ref().err().map(ReconcileError::kind),
    );
    result
}

async fn reconcile_logged(
    client: &SonarClient,
    cancel: &CancellationToken,
    key: &PortfolioKey,
    desired: &Selection,
    options: SelectionOptions,
    log: OperationLog,
) -> Result<SelectionReport, ReconcileError> {
    desired.validate(key)?;
    let current = match client.portfolios().show(cancel, key).await {
        Ok(current) => current,
        Err(err) => {
            let step = Operation::ReadPortfolio { key: key.clone() };
            return Err(ReconcileError::Api(err).after(log.into_completed(), step));
        }
    };
    let plan = plan(&current, desired);
    apply(client, cancel, key, plan, options, log).await
}

async fn apply(
    client: &SonarClient,
    cancel: &CancellationToken,
    key: &PortfolioKey,
    plan: SelectionPlan,
    options: SelectionOptions,
    mut log: OperationLog,
) -> Result<SelectionReport, ReconcileError> {
    if !plan.stale_fields.is_empty() {
        warn!(
            portfolio = %key,
            fields = %plan.stale_fields.join(","),
            "remote selection carries fields of an inactive mode"
        );
    }
    if plan.is_noop() {
        debug!(portfolio = %key, mode = %plan.to, "selection up to date");
        return Ok(SelectionReport {
            key: key.clone(),
            plan,
            applied: log.into_completed(),
        });
    }
    info!(
        portfolio = %key,
        from = %plan.from.map(|m| m.to_string()).unwrap_or_else(|| "unset".to_string()),
        to = %plan.to,
        steps = plan.steps.len(),
        "reconciling selection"
    );

    let portfolios = client.portfolios();
    for step in &plan.steps {
        let operation = step.operation(key);
        match step {
            SelectionStep::ConfigureSelection { selection } => {
                if let Err(cause) = portfolios.configure_selection(cancel, key, selection).await {
                    let observed = observe(client, cancel, key).await;
                    return Err(log.fail(operation, cause, observed));
                }
                log.record(operation);

                let verify = Operation::VerifySelection {
                    key: key.clone(),
                    mode: selection.mode(),
                };
                match verify_selection(client, cancel, key, selection.mode()).await {
                    Ok(()) => log.record(verify),
                    Err((cause, observed)) => return Err(log.fail(verify, cause, observed)),
                }
            }
            SelectionStep::ConfigureFilters { filters } => {
                if let Err(cause) = portfolios.configure_filters(cancel, key, filters).await {
                    let observed = observe(client, cancel, key).await;
                    return Err(log.fail(operation, cause, observed));
                }
                log.record(operation);

                if options.verify_filters {
                    let verify = Operation::VerifyFilters { key: key.clone() };
                    match verify_filters(client, cancel, key, filters).await {
                        Ok(()) => log.record(verify),
                        Err((cause, observed)) => return Err(log.fail(verify, cause, observed)),
                    }
                }
            }
        }
    }

    Ok(SelectionReport {
        key: key.clone(),
        plan,
        applied: log.into_completed(),
    })
}

type Verification = Result<(), (StepError, Observed)>;

async fn verify_selection(
    client: &SonarClient,
    cancel: &CancellationToken,
    key: &PortfolioKey,
    expected: SelectionMode,
) -> Verification {
    let current = client
        .portfolios()
        .show(cancel, key)
        .await
        .map_err(|err| {
            let observed = Observed::Unavailable(err.to_string());
            (StepError::Api(err), observed)
        })?;

    let cause = if current.mode() != Some(expected) {
        Some(StepError::ModeMismatch {
            expected,
            actual: current.mode(),
        })
    } else {
        let fields = current.stale_fields();
        (!fields.is_empty()).then_some(StepError::StaleSelection {
            mode: expected,
            fields,
        })
    };
    match cause {
        None => Ok(()),
        Some(cause) => {
            warn!(portfolio = %key, error = %cause, "selection verification failed");
            Err((cause, Observed::Portfolio(Box::new(current))))
        }
    }
}

async fn verify_filters(
    client: &SonarClient,
    cancel: &CancellationToken,
    key: &PortfolioKey,
    expected: &Filters,
) -> Verification {
    let current = client
        .portfolios()
        .show(cancel, key)
        .await
        .map_err(|err| {
            let observed = Observed::Unavailable(err.to_string());
            (StepError::Api(err), observed)
        })?;
    if current.filters() == *expected {
        Ok(())
    } else {
        warn!(portfolio = %key, "filters read back differ from the configured filters");
        Err((StepError::FiltersDrift, Observed::Portfolio(Box::new(current))))
    }
}

async fn observe(client: &SonarClient, cancel: &CancellationToken, key: &PortfolioKey) -> Observed {
    match client.portfolios().show(cancel, key).await {
        Ok(current) => Observed::Portfolio(Box::new(current)),
        Err(err) => Observed::Unavailable(err.to_string()),
    }
}
