//! Entry point holding the shared [`Transport`].

use std::sync::Arc;

use sonarsync_core::ClientConfig;

use crate::error::ApiError;
use crate::portfolios::Portfolios;
use crate::projects::Projects;
use crate::quality_gates::QualityGates;
use crate::telemetry::Telemetry;
use crate::transport::Transport;

/// Cheap to clone; all clones share one transport.
#[derive(Debug, Clone)]
pub struct SonarClient {
    transport: Arc<Transport>,
}

impl SonarClient {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn from_config(
        config: &ClientConfig,
        telemetry: Arc<dyn Telemetry>,
    ) -> Result<Self, ApiError> {
        Ok(Self::new(Transport::from_config(config, telemetry)?))
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn projects(&self) -> Projects<'_> {
        Projects::new(&self.transport)
    }

    pub fn quality_gates(&self) -> QualityGates<'_> {
        QualityGates::new(&self.transport)
    }

    pub fn portfolios(&self) -> Portfolios<'_> {
        Portfolios::new(&self.transport)
    }

    /// Record a resource-level operation on the transport's telemetry, if any.
    pub fn record_operation(&self, resource: &str, operation: &str, error_kind: Option<&str>) {
        if let Some(telemetry) = self.transport.telemetry() {
            telemetry.record_operation(resource, operation, error_kind);
        }
    }
}

/// Record `result` as one `(resource, operation)` observation and pass it on.
pub(crate) fn observed<T>(
    transport: &Transport,
    resource: &str,
    operation: &str,
    result: Result<T, ApiError>,
) -> Result<T, ApiError> {
    if let Some(telemetry) = transport.telemetry() {
        telemetry.record_operation(resource, operation, result.as_ref().err().map(ApiError::kind));
    }
    result
}
