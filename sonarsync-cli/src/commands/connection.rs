//! Connection flags, client construction and the async runtime wrapper
//! shared by every networked subcommand.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};
use tokio_util::sync::CancellationToken;

use sonarsync_client::{MetricsRecorder, NoopTelemetry, SonarClient, Telemetry};
use sonarsync_core::config::{DEFAULT_MAX_RETRIES, HOST_ENV, TOKEN_ENV};
use sonarsync_core::{ClientConfig, ConfigError, RetrySettings};

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// SonarQube base URL, e.g. https://sonar.example.com.
    #[arg(long, env = "SONARQUBE_HOST", global = true)]
    pub host: Option<String>,

    /// User token sent as a bearer credential.
    #[arg(long, env = "SONARQUBE_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Retries after the first attempt for network errors and 5xx replies.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Send every request exactly once.
    #[arg(long, global = true, conflicts_with = "max_retries")]
    pub no_retry: bool,

    /// Per-attempt HTTP timeout.
    #[arg(long, global = true, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Record request and operation metrics and print them on exit.
    #[arg(long, global = true)]
    pub metrics: bool,
}

/// A connected client plus the recorder behind it, when metrics are on.
pub struct Session {
    pub client: SonarClient,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ConnectionArgs {
    pub fn config(&self) -> Result<ClientConfig> {
        let host = self.host.clone().ok_or(ConfigError::Missing(HOST_ENV))?;
        let token = self.token.clone().ok_or(ConfigError::Missing(TOKEN_ENV))?;
        let retry = if self.no_retry {
            RetrySettings::disabled()
        } else {
            RetrySettings {
                max_retries: self.max_retries,
                ..RetrySettings::default()
            }
        };
        let config = ClientConfig::new(host, token)
            .with_retry(retry)
            .with_telemetry(self.metrics)
            .with_request_timeout(Some(Duration::from_secs(self.timeout_secs)));
        config.validate()?;
        Ok(config)
    }

    pub fn connect(&self) -> Result<Session> {
        let config = self.config()?;
        let metrics = config.telemetry.then(|| Arc::new(MetricsRecorder::new()));
        let telemetry: Arc<dyn Telemetry> = match &metrics {
            Some(recorder) => recorder.clone(),
            None => Arc::new(NoopTelemetry),
        };
        let client = SonarClient::from_config(&config, telemetry)
            .context("failed to build SonarQube client")?;
        Ok(Session { client, metrics })
    }
}

#[derive(Tabled)]
struct RequestRow {
    #[tabled(rename = "method")]
    method: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "status")]
    status: u16,
    #[tabled(rename = "count")]
    count: u64,
    #[tabled(rename = "avg ms")]
    avg_ms: String,
}

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "resource")]
    resource: String,
    #[tabled(rename = "operation")]
    operation: String,
    #[tabled(rename = "count")]
    count: u64,
    #[tabled(rename = "errors")]
    errors: u64,
}

impl Session {
    /// Print the recorded metrics, if any, to stderr.
    pub fn print_metrics(&self) {
        let Some(recorder) = &self.metrics else {
            return;
        };
        let snapshot = recorder.snapshot();

        let requests: Vec<RequestRow> = snapshot
            .requests
            .iter()
            .map(|(labels, stats)| RequestRow {
                method: labels.method.clone(),
                path: labels.path.clone(),
                status: labels.status,
                count: stats.count,
                avg_ms: format!(
                    "{:.1}",
                    stats.total_seconds * 1000.0 / stats.count.max(1) as f64
                ),
            })
            .collect();
        let operations: Vec<OperationRow> = snapshot
            .operations
            .iter()
            .map(|(labels, count)| OperationRow {
                resource: labels.resource.clone(),
                operation: labels.operation.clone(),
                count: *count,
                errors: snapshot.error_count(&labels.resource, &labels.operation),
            })
            .collect();

        if !requests.is_empty() {
            let mut table = Table::new(requests);
            table.with(Style::rounded());
            eprintln!("{table}");
        }
        if !operations.is_empty() {
            let mut table = Table::new(operations);
            table.with(Style::rounded());
            eprintln!("{table}");
        }
    }
}

/// Run `task` on a fresh multi-threaded runtime. Ctrl-C cancels the token
/// handed to `task`; the task is then awaited so it can report how far it
/// got.
pub fn block_on<F, T>(task: impl FnOnce(CancellationToken) -> F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let work = task(cancel.clone());
        tokio::pin!(work);

        tokio::select! {
            result = &mut work => return result,
            signal = tokio::signal::ctrl_c() => {
                signal.context("ctrl-c handler failed")?;
                tracing::warn!("received ctrl-c, cancelling in-flight requests");
                cancel.cancel();
            }
        }
        work.await
    })
}

pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
