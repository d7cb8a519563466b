//! Connection settings for the remote SonarQube API.

use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

pub const HOST_ENV: &str = "SONARQUBE_HOST";
pub const TOKEN_ENV: &str = "SONARQUBE_TOKEN";

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_WAIT_MIN: Duration = Duration::from_secs(1);
pub const DEFAULT_WAIT_MAX: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry knobs. The retry predicate itself lives with the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    pub wait_min: Duration,
    pub wait_max: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            wait_min: DEFAULT_WAIT_MIN,
            wait_max: DEFAULT_WAIT_MAX,
        }
    }
}

impl RetrySettings {
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Host, credentials and transport behaviour. Immutable once a client is
/// built from it.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub token: String,
    pub retry: RetrySettings,
    /// Emit request spans and measurements to the telemetry handle.
    pub telemetry: bool,
    pub request_timeout: Option<Duration>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("token", &"<redacted>")
            .field("retry", &self.retry)
            .field("telemetry", &self.telemetry)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            token: token.into(),
            retry: RetrySettings::default(),
            telemetry: false,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Build from `SONARQUBE_HOST` / `SONARQUBE_TOKEN`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup; `from_env` delegates here.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup(HOST_ENV)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(HOST_ENV))?;
        let token = lookup(TOKEN_ENV)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(TOKEN_ENV))?;
        let config = Self::new(host, token);
        config.validate()?;
        Ok(config)
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_telemetry(mut self, enabled: bool) -> Self {
        self.telemetry = enabled;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Host without trailing slashes, as used to build `{host}/api/{path}`.
    pub fn base_host(&self) -> &str {
        self.host.trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let host = self.base_host();
        let has_scheme = host.starts_with("http://") || host.starts_with("https://");
        let has_authority = host.split("://").nth(1).is_some_and(|rest| !rest.is_empty());
        if !has_scheme || !has_authority {
            return Err(ConfigError::InvalidHost(self.host.clone()));
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::Missing("token"));
        }
        if self.retry.wait_min > self.retry.wait_max {
            return Err(ConfigError::InvalidBackoff {
                min_ms: self.retry.wait_min.as_millis(),
                max_ms: self.retry.wait_max.as_millis(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn debug_redacts_token() {
        let config = ClientConfig::new("https://sonar.example.com", "squ_secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("squ_secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn defaults_match_documented_policy() {
        let config = ClientConfig::new("https://sonar.example.com/", "t");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.wait_min, Duration::from_secs(1));
        assert_eq!(config.retry.wait_max, Duration::from_secs(30));
        assert!(!config.telemetry);
        assert_eq!(config.base_host(), "https://sonar.example.com");
    }

    #[test]
    fn from_lookup_reads_both_variables() {
        let config = ClientConfig::from_lookup(|name| match name {
            HOST_ENV => Some("http://localhost:9000".to_string()),
            TOKEN_ENV => Some("admin".to_string()),
            _ => None,
        })
        .expect("config");
        assert_eq!(config.host, "http://localhost:9000");
        assert_eq!(config.token, "admin");
    }

    #[test]
    fn from_lookup_reports_missing_token() {
        let err = ClientConfig::from_lookup(|name| {
            (name == HOST_ENV).then(|| "http://localhost:9000".to_string())
        })
        .expect_err("missing token");
        assert_eq!(err, ConfigError::Missing(TOKEN_ENV));
    }

    #[rstest]
    #[case("localhost:9000")]
    #[case("ftp://sonar")]
    #[case("https://")]
    fn invalid_hosts_are_rejected(#[case] host: &str) {
        let err = ClientConfig::new(host, "t").validate().expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidHost(_)));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let config = ClientConfig::new("http://sonar", "t").with_retry(RetrySettings {
            max_retries: 1,
            wait_min: Duration::from_secs(5),
            wait_max: Duration::from_secs(1),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBackoff { .. })
        ));
    }
}
