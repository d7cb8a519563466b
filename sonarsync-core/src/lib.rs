//! sonarsync core library: domain types, desired-state manifest, connection
//! configuration, errors.
//!
//! - [`types`]: newtypes and domain structs
//! - [`manifest`]: load / validate the desired-state document
//! - [`config`]: [`ClientConfig`] for the remote API
//! - [`error`]: [`ManifestError`], [`ValidationError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod manifest;
pub mod types;

pub use config::{ClientConfig, RetrySettings};
pub use error::{ConfigError, ManifestError, ValidationError};
pub use manifest::Manifest;
pub use types::{
    Comparator, Compliance, Condition, ConditionId, Filters, GateId, MetricFilter, Portfolio,
    PortfolioKey, Project, ProjectKey, QualityGate, QualityGateSpec, Selection, SelectionMode,
    Visibility,
};
