//! Authenticated request execution against the SonarQube Web API.
//!
//! Every call goes through [`Transport::execute`]: build the URL under
//! `<host>/api/`, attach the bearer token, send through the configured
//! [`HttpBackend`], and retry per the [`RetryPolicy`]. Cancellation is
//! observed before each attempt, during the send, and during the backoff
//! sleep.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, warn, Instrument, Span};

use sonarsync_core::ClientConfig;

use crate::error::{ApiError, NetworkError};
use crate::retry::RetryPolicy;
use crate::telemetry::Telemetry;
use crate::wire::{remote_message, Params};

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// One logical API call: a path relative to `/api/` plus its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub method: Method,
    pub path: String,
    pub params: Params,
    pub body: Option<serde_json::Value>,
}

impl ApiCall {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            params: Params::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(path)
        }
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A fully built HTTP request, ready for a backend.
#[derive(Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: reqwest::Url,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Vec<u8>>,
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<_> = self
            .headers
            .iter()
            .map(|(name, value)| {
                if name.eq_ignore_ascii_case("authorization") {
                    (*name, "<redacted>")
                } else {
                    (*name, value.as_str())
                }
            })
            .collect();
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &headers)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish()
    }
}

impl HttpRequest {
    /// Path below `/api/`, e.g. `qualitygates/create`.
    pub fn api_path(&self) -> &str {
        let path = self.url.path();
        path.find("/api/")
            .map(|idx| &path[idx + "/api/".len()..])
            .unwrap_or(path)
    }

    pub fn query(&self) -> Params {
        self.url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Sends one HTTP request. Implementations do not retry.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError>;
}

/// [`HttpBackend`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new(timeout: Option<Duration>) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| ApiError::RequestBuild {
            path: String::new(),
            reason: format!("http client: {e}"),
        })?;
        Ok(Self { client })
    }
}

fn network_error(err: reqwest::Error) -> NetworkError {
    let timeout = err.is_timeout();
    let message = err.without_url().to_string();
    if timeout {
        NetworkError::timeout(message)
    } else {
        NetworkError::new(message)
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let mut builder = self
            .client
            .request(request.method.into(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().await.map_err(network_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(network_error)?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Decoded-on-demand successful response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub path: String,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|source| ApiError::Decode {
            path: self.path.clone(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// Host plus bearer token. The token never appears in `Debug` output.
#[derive(Clone)]
pub struct Credential {
    host: String,
    token: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("host", &self.host)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Credential {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        let host: String = host.into();
        Self {
            host: host.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct TransportBuilder {
    credential: Credential,
    retry: RetryPolicy,
    telemetry: Option<Arc<dyn Telemetry>>,
    backend: Option<Arc<dyn HttpBackend>>,
    request_timeout: Option<Duration>,
}

impl TransportBuilder {
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable request spans and per-request measurements.
    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn HttpBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Transport, ApiError> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(ReqwestBackend::new(self.request_timeout)?),
        };
        Ok(Transport {
            credential: self.credential,
            retry: self.retry,
            telemetry: self.telemetry,
            backend,
        })
    }
}

enum Outcome {
    Response(HttpResponse),
    Network(NetworkError),
    Cancelled,
}

/// Shared by all resource clients; holds no per-call state.
pub struct Transport {
    credential: Credential,
    retry: RetryPolicy,
    telemetry: Option<Arc<dyn Telemetry>>,
    backend: Arc<dyn HttpBackend>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("credential", &self.credential)
            .field("retry", &self.retry)
            .field("telemetry", &self.telemetry.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn builder(credential: Credential) -> TransportBuilder {
        TransportBuilder {
            credential,
            retry: RetryPolicy::default(),
            telemetry: None,
            backend: None,
            request_timeout: None,
        }
    }

    /// Validate `config` and build a reqwest-backed transport from it.
    /// `telemetry` is attached only when the config enables it.
    pub fn from_config(
        config: &ClientConfig,
        telemetry: Arc<dyn Telemetry>,
    ) -> Result<Self, ApiError> {
        config.validate()?;
        let mut builder = Self::builder(Credential::new(config.base_host(), config.token.clone()))
            .retry(RetryPolicy::from_settings(config.retry))
            .request_timeout(config.request_timeout);
        if config.telemetry {
            builder = builder.telemetry(telemetry);
        }
        builder.build()
    }

    pub fn telemetry(&self) -> Option<&Arc<dyn Telemetry>> {
        self.telemetry.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn build_request(&self, call: &ApiCall) -> Result<HttpRequest, ApiError> {
        let build_err = |reason: String| ApiError::RequestBuild {
            path: call.path.clone(),
            reason,
        };
        let path = call.path.trim_start_matches('/');
        if path.is_empty() {
            return Err(build_err("empty path".to_string()));
        }
        if path.contains(['?', '#']) {
            return Err(build_err(
                "query arguments belong in params, not the path".to_string(),
            ));
        }

        let mut url = reqwest::Url::parse(&format!("{}/api/{path}", self.credential.host))
            .map_err(|e| build_err(e.to_string()))?;
        if !call.params.is_empty() {
            url.query_pairs_mut().extend_pairs(call.params.iter());
        }

        let body = call
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| build_err(e.to_string()))?;

        Ok(HttpRequest {
            method: call.method,
            url,
            headers: vec![
                (
                    "Authorization",
                    format!("Bearer {}", self.credential.token),
                ),
                ("Content-Type", "application/json".to_string()),
                ("Accept", "application/json".to_string()),
            ],
            body,
        })
    }

    /// Execute `call`, retrying transient failures.
    ///
    /// Returns the successful response, or:
    /// - [`ApiError::RequestBuild`] when nothing could be sent,
    /// - [`ApiError::Remote`] for a final HTTP status >= 400,
    /// - [`ApiError::Transport`] when every attempt failed below HTTP,
    /// - [`ApiError::Cancelled`] when `cancel` fired first.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        call: ApiCall,
    ) -> Result<ApiResponse, ApiError> {
        let request = self.build_request(&call)?;
        let method = call.method.as_str();

        let span = if self.telemetry.is_some() {
            tracing::info_span!(
                "sonarqube.request",
                http.method = method,
                http.path = %call.path,
                http.duration_ms = field::Empty,
                http.status_code = field::Empty,
            )
        } else {
            Span::none()
        };

        let started = Instant::now();
        let (outcome, attempts) = self
            .send_with_retry(cancel, &request)
            .instrument(span.clone())
            .await;
        let elapsed = started.elapsed();

        let status = match &outcome {
            Outcome::Response(response) => response.status,
            _ => 0,
        };
        span.record("http.duration_ms", elapsed.as_millis() as u64);
        span.record("http.status_code", status);
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_request(method, &call.path, status, elapsed);
        }
        debug!(
            method,
            path = %call.path,
            status,
            attempts,
            duration_ms = elapsed.as_millis() as u64,
            "api call finished"
        );

        match outcome {
            Outcome::Response(response) if response.status < 400 => Ok(ApiResponse {
                status: response.status,
                path: call.path,
                body: response.body,
            }),
            Outcome::Response(response) => {
                let message = remote_message(&response.body);
                error!(
                    method,
                    path = %call.path,
                    status = response.status,
                    message = message.as_deref().unwrap_or_default(),
                    "api call rejected"
                );
                Err(ApiError::Remote {
                    method: method.to_string(),
                    path: call.path,
                    status: response.status,
                    message,
                })
            }
            Outcome::Network(source) => {
                error!(method, path = %call.path, attempts, error = %source, "api call failed");
                Err(ApiError::Transport {
                    method: method.to_string(),
                    path: call.path,
                    attempts,
                    source,
                })
            }
            Outcome::Cancelled => Err(ApiError::Cancelled {
                method: method.to_string(),
                path: call.path,
            }),
        }
    }

    async fn send_with_retry(
        &self,
        cancel: &CancellationToken,
        request: &HttpRequest,
    ) -> (Outcome, u32) {
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return (Outcome::Cancelled, attempts);
            }
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return (Outcome::Cancelled, attempts),
                result = self.backend.send(request) => result,
            };

            let retries_done = attempts - 1;
            let retryable = retries_done < self.retry.max_retries
                && self.retry.should_retry(result.as_ref());
            if !retryable {
                let outcome = match result {
                    Ok(response) => Outcome::Response(response),
                    Err(err) => Outcome::Network(err),
                };
                return (outcome, attempts);
            }

            let wait = self.retry.backoff(retries_done);
            match &result {
                Ok(response) => warn!(
                    path = request.api_path(),
                    status = response.status,
                    attempt = attempts,
                    wait_ms = wait.as_millis() as u64,
                    "retrying api call"
                ),
                Err(err) => warn!(
                    path = request.api_path(),
                    error = %err,
                    attempt = attempts,
                    wait_ms = wait.as_millis() as u64,
                    "retrying api call"
                ),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return (Outcome::Cancelled, attempts),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
