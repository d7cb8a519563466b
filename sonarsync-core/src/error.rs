//! Error types for sonarsync-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{PortfolioKey, ProjectKey};

/// Desired state that is malformed before any remote call is attempted.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("project key '{0}' is declared more than once")]
    DuplicateProject(ProjectKey),

    #[error("quality gate '{0}' is declared more than once")]
    DuplicateGate(String),

    #[error("portfolio key '{0}' is declared more than once")]
    DuplicatePortfolio(PortfolioKey),

    #[error("quality gate '{gate}' declares metric '{metric}' more than once")]
    DuplicateMetric { gate: String, metric: String },

    #[error("portfolio '{portfolio}' uses REGEXP selection with an empty project pattern")]
    EmptyPattern { portfolio: PortfolioKey },

    #[error("portfolio '{portfolio}': {field} = {value} is out of range")]
    OutOfRange {
        portfolio: PortfolioKey,
        field: &'static str,
        value: f64,
    },
}

/// All errors that can arise from loading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error, with the file path and serde_yaml's line context.
    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("manifest not found at {path}")]
    NotFound { path: PathBuf },

    #[error("invalid manifest: {0}")]
    Invalid(#[from] ValidationError),
}

/// Connection settings that cannot produce a working client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing {0}; pass it explicitly or set the environment variable")]
    Missing(&'static str),

    #[error("host '{0}' must be an absolute http:// or https:// URL")]
    InvalidHost(String),

    #[error("retry wait_min ({min_ms}ms) exceeds wait_max ({max_ms}ms)")]
    InvalidBackoff { min_ms: u128, max_ms: u128 },
}
