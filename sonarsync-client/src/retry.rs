//! Retry policy: how many attempts, how long to wait, and which outcomes
//! are worth another attempt.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sonarsync_core::RetrySettings;

use crate::error::NetworkError;
use crate::transport::HttpResponse;

/// Result of one attempt, as seen by the retry predicate.
pub type Attempt<'a> = Result<&'a HttpResponse, &'a NetworkError>;

type Predicate = Arc<dyn Fn(Attempt<'_>) -> bool + Send + Sync>;

/// Owned by the transport; configurable at construction.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait_min: Duration,
    pub wait_max: Duration,
    predicate: Predicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("wait_min", &self.wait_min)
            .field("wait_max", &self.wait_max)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(RetrySettings::default())
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self::from_settings(settings)
    }
}

/// Network errors and 5xx are transient; 4xx means the request itself is
/// wrong and repeating it cannot help.
pub fn default_retryable(attempt: Attempt<'_>) -> bool {
    match attempt {
        Err(_) => true,
        Ok(response) => response.status >= 500,
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            wait_min: settings.wait_min,
            wait_max: settings.wait_max,
            predicate: Arc::new(default_retryable),
        }
    }

    pub fn disabled() -> Self {
        Self::from_settings(RetrySettings::disabled())
    }

    /// Replace the retryability predicate.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(Attempt<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn should_retry(&self, attempt: Attempt<'_>) -> bool {
        (self.predicate)(attempt)
    }

    /// Wait before retry number `retry` (0-based): `wait_min * 2^retry`,
    /// capped at `wait_max`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.wait_min
            .checked_mul(factor)
            .unwrap_or(self.wait_max)
            .min(self.wait_max)
    }
}
