//! Desired-state manifest.
//!
//! # Layout
//!
//! ```yaml
//! projects:
//!   - key: svc-payments
//!     name: Payments
//!     tags: [backend]
//! quality_gates:
//!   - name: strict
//!     conditions:
//!       - { metric: coverage, op: LT, error: "80" }
//! portfolios:
//!   - key: services
//!     name: Services
//!     selection:
//!       mode: REGEXP
//!       project_pattern: "^svc-.*"
//! ```
//!
//! [`load_at`] parses and validates; nothing here talks to the network.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, ValidationError};
use crate::types::{Portfolio, Project, QualityGateSpec};

/// Root of the desired-state document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub quality_gates: Vec<QualityGateSpec>,
    #[serde(default)]
    pub portfolios: Vec<Portfolio>,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() && self.quality_gates.is_empty() && self.portfolios.is_empty()
    }

    /// Reject desired state the remote would either refuse or apply
    /// ambiguously.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut keys = BTreeSet::new();
        for project in &self.projects {
            if !keys.insert(&project.key) {
                return Err(ValidationError::DuplicateProject(project.key.clone()));
            }
        }

        let mut names = BTreeSet::new();
        for gate in &self.quality_gates {
            if !names.insert(gate.name.as_str()) {
                return Err(ValidationError::DuplicateGate(gate.name.clone()));
            }
            gate.validate()?;
        }

        let mut portfolio_keys = BTreeSet::new();
        for portfolio in &self.portfolios {
            if !portfolio_keys.insert(&portfolio.key) {
                return Err(ValidationError::DuplicatePortfolio(portfolio.key.clone()));
            }
            portfolio.selection.validate(&portfolio.key)?;
        }
        Ok(())
    }
}

/// Parse a manifest from YAML text without validating it.
pub fn parse(contents: &str, path: &Path) -> Result<Manifest, ManifestError> {
    serde_yaml::from_str(contents).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate the manifest at `path`.
///
/// Returns `ManifestError::NotFound` if absent, `ManifestError::Parse`
/// (with path + line context) if malformed, `ManifestError::Invalid` if it
/// parses but fails [`Manifest::validate`].
pub fn load_at(path: &Path) -> Result<Manifest, ManifestError> {
    if !path.exists() {
        return Err(ManifestError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest = parse(&contents, path)?;
    manifest.validate()?;
    Ok(manifest)
}
