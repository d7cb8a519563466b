//! Error types for sonarsync-client.

use thiserror::Error;

use sonarsync_core::ConfigError;

/// A failure below HTTP: connect, TLS, timeout, reset.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct NetworkError {
    pub message: String,
    pub timeout: bool,
}

impl NetworkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: true,
        }
    }
}

/// All errors that can arise from a remote API call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Input could not be turned into a request; nothing was sent.
    #[error("cannot build request for {path}: {reason}")]
    RequestBuild { path: String, reason: String },

    /// Network-level failure, surfaced after the retry policy gave up.
    #[error("{method} {path} failed after {attempts} attempt(s): {source}")]
    Transport {
        method: String,
        path: String,
        attempts: u32,
        #[source]
        source: NetworkError,
    },

    /// HTTP status >= 400.
    #[error("{method} {path} returned HTTP {status}{}", remote_suffix(.message))]
    Remote {
        method: String,
        path: String,
        status: u16,
        message: Option<String>,
    },

    /// A read matched nothing.
    #[error("{resource} '{key}' not found")]
    NotFound { resource: &'static str, key: String },

    #[error("cannot decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The caller's cancellation token fired; no further attempt was made.
    #[error("{method} {path} cancelled")]
    Cancelled { method: String, path: String },

    #[error("invalid client configuration: {0}")]
    Config(#[from] ConfigError),
}

fn remote_suffix(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(": {message}"),
        None => String::new(),
    }
}

impl ApiError {
    /// Stable label for telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::RequestBuild { .. } => "request_build",
            ApiError::Transport { .. } => "transport",
            ApiError::Remote { .. } => "remote",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Decode { .. } => "decode",
            ApiError::Cancelled { .. } => "cancelled",
            ApiError::Config(_) => "config",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Reads treat HTTP 404 as "zero matches".
    pub(crate) fn not_found_on_404(self, resource: &'static str, key: &str) -> Self {
        match self {
            ApiError::Remote { status: 404, .. } => ApiError::NotFound {
                resource,
                key: key.to_string(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_includes_message_when_present() {
        let err = ApiError::Remote {
            method: "POST".to_string(),
            path: "qualitygates/create".to_string(),
            status: 400,
            message: Some("Name has already been taken".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "POST qualitygates/create returned HTTP 400: Name has already been taken"
        );
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.kind(), "remote");
    }

    #[test]
    fn remote_404_becomes_not_found() {
        let err = ApiError::Remote {
            method: "GET".to_string(),
            path: "qualitygates/show".to_string(),
            status: 404,
            message: None,
        }
        .not_found_on_404("quality gate", "12");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "quality gate '12' not found");
    }

    #[test]
    fn other_statuses_are_left_alone() {
        let err = ApiError::Remote {
            method: "GET".to_string(),
            path: "projects/search".to_string(),
            status: 403,
            message: None,
        }
        .not_found_on_404("project", "a");
        assert_eq!(err.status(), Some(403));
    }
}
