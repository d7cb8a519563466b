//! sonarsync client library: authenticated, retried, observable access to
//! the SonarQube Web API.
//!
//! - [`transport`]: [`Transport`] with URL building, auth, retry and cancellation
//! - [`retry`]: [`RetryPolicy`]
//! - [`telemetry`]: [`Telemetry`] handle and the in-memory [`MetricsRecorder`]
//! - [`wire`]: query-parameter encoding and remote response shapes
//! - [`projects`], [`quality_gates`], [`portfolios`]: typed resource clients
//! - [`error`]: [`ApiError`]

pub mod client;
pub mod error;
pub mod portfolios;
pub mod projects;
pub mod quality_gates;
pub mod retry;
pub mod telemetry;
pub mod transport;
pub mod wire;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use client::SonarClient;
pub use error::{ApiError, NetworkError};
pub use retry::RetryPolicy;
pub use telemetry::{MetricsRecorder, MetricsSnapshot, NoopTelemetry, Telemetry};
pub use transport::{ApiCall, Credential, HttpBackend, Method, ReqwestBackend, Transport};
pub use wire::{Params, RemotePortfolio};
