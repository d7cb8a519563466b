//! Domain types for the desired and observed SonarQube state.
//!
//! Identity fields (project key, portfolio key, quality gate id) are
//! newtypes so they cannot be mixed up with display names. Sets are
//! `BTreeSet` so equality and wire encoding are order-independent and
//! deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Immutable identity of a project.
    ProjectKey
);
string_newtype!(
    /// Immutable identity of a portfolio.
    PortfolioKey
);
string_newtype!(
    /// Remote-assigned identity of a quality gate.
    GateId
);
string_newtype!(
    /// Remote-assigned identity of a quality gate condition.
    ConditionId
);

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_main_branch() -> String {
    "main".to_string()
}

/// A SonarQube project. Identity is `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub key: ProjectKey,
    pub name: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default = "default_main_branch")]
    pub main_branch: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Quality gates
// ---------------------------------------------------------------------------

/// Comparison operator of a gate condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Comparator {
    Lt,
    Gt,
    Eq,
    Ne,
}

impl Comparator {
    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::Lt => "LT",
            Comparator::Gt => "GT",
            Comparator::Eq => "EQ",
            Comparator::Ne => "NE",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single metric/operator/threshold rule.
///
/// `id` is `None` for a condition that only exists in the desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ConditionId>,
    pub metric: String,
    pub op: Comparator,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Condition {
    pub fn new(metric: impl Into<String>, op: Comparator, error: impl Into<String>) -> Self {
        Self {
            id: None,
            metric: metric.into(),
            op,
            error: error.into(),
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<ConditionId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Equality on everything except the remote id.
    pub fn same_rule(&self, other: &Condition) -> bool {
        self.metric == other.metric
            && self.op == other.op
            && self.error == other.error
            && self.warning == other.warning
    }
}

/// A quality gate as observed on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGate {
    pub id: GateId,
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub is_default: bool,
}

/// A quality gate as declared. The remote id is resolved by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGateSpec {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl QualityGateSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = BTreeSet::new();
        for condition in &self.conditions {
            if !seen.insert(condition.metric.as_str()) {
                return Err(ValidationError::DuplicateMetric {
                    gate: self.name.clone(),
                    metric: condition.metric.clone(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Portfolios
// ---------------------------------------------------------------------------

/// Discriminant of [`Selection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SelectionMode {
    Manual,
    Regexp,
    Filter,
}

impl SelectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionMode::Manual => "MANUAL",
            SelectionMode::Regexp => "REGEXP",
            SelectionMode::Filter => "FILTER",
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a portfolio picks its member projects.
///
/// Each variant carries only the fields meaningful for its mode, so a
/// configuration call built from a `Selection` can never leak fields of
/// another mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "UPPERCASE")]
pub enum Selection {
    Manual {
        #[serde(default)]
        projects: BTreeSet<String>,
    },
    Regexp {
        project_pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch_pattern: Option<String>,
    },
    Filter {
        #[serde(default)]
        filters: Filters,
    },
}

impl Selection {
    pub fn mode(&self) -> SelectionMode {
        match self {
            Selection::Manual { .. } => SelectionMode::Manual,
            Selection::Regexp { .. } => SelectionMode::Regexp,
            Selection::Filter { .. } => SelectionMode::Filter,
        }
    }

    pub fn filters(&self) -> Option<&Filters> {
        match self {
            Selection::Filter { filters } => Some(filters),
            _ => None,
        }
    }

    pub fn validate(&self, portfolio: &PortfolioKey) -> Result<(), ValidationError> {
        match self {
            Selection::Manual { .. } => Ok(()),
            Selection::Regexp {
                project_pattern, ..
            } => {
                if project_pattern.trim().is_empty() {
                    return Err(ValidationError::EmptyPattern {
                        portfolio: portfolio.clone(),
                    });
                }
                Ok(())
            }
            Selection::Filter { filters } => filters.validate(portfolio),
        }
    }

    /// The selection as the remote reports it back: an empty branch pattern
    /// is unset and empty filter blocks are dropped.
    pub fn normalized(&self) -> Selection {
        match self {
            Selection::Manual { .. } => self.clone(),
            Selection::Regexp {
                project_pattern,
                branch_pattern,
            } => Selection::Regexp {
                project_pattern: project_pattern.clone(),
                branch_pattern: branch_pattern.clone().filter(|p| !p.is_empty()),
            },
            Selection::Filter { filters } => Selection::Filter {
                filters: filters.normalized(),
            },
        }
    }
}

/// Predicate block of a FILTER-mode portfolio.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub languages: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub quality_gates: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<Compliance>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_metrics: BTreeMap<String, MetricFilter>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self == &Filters::default()
    }

    pub fn validate(&self, portfolio: &PortfolioKey) -> Result<(), ValidationError> {
        match &self.compliance {
            Some(compliance) => compliance.validate(portfolio),
            None => Ok(()),
        }
    }

    pub fn normalized(&self) -> Filters {
        Filters {
            compliance: self
                .compliance
                .as_ref()
                .map(Compliance::normalized)
                .filter(|c| !c.is_empty()),
            ..self.clone()
        }
    }
}

/// Compliance thresholds inside [`Filters`]. Every field is optional so an
/// unset threshold is never confused with an explicit zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Compliance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_quality_gate_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duplications: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_issues: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required_rules: BTreeSet<String>,
}

impl Compliance {
    pub fn is_empty(&self) -> bool {
        self == &Compliance::default()
    }

    pub fn normalized(&self) -> Compliance {
        Compliance {
            min_quality_gate_status: self
                .min_quality_gate_status
                .clone()
                .filter(|s| !s.is_empty()),
            ..self.clone()
        }
    }

    pub fn validate(&self, portfolio: &PortfolioKey) -> Result<(), ValidationError> {
        if let Some(coverage) = self.min_coverage {
            if !(0.0..=100.0).contains(&coverage) {
                return Err(ValidationError::OutOfRange {
                    portfolio: portfolio.clone(),
                    field: "min_coverage",
                    value: coverage,
                });
            }
        }
        if let Some(duplications) = self.max_duplications {
            if duplications < 0.0 || !duplications.is_finite() {
                return Err(ValidationError::OutOfRange {
                    portfolio: portfolio.clone(),
                    field: "max_duplications",
                    value: duplications,
                });
            }
        }
        Ok(())
    }
}

/// Custom metric predicate, encoded as `metric_<name>_operator` /
/// `metric_<name>_value` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFilter {
    pub operator: String,
    pub value: String,
}

/// A portfolio. Identity is `key`; `selection` fully describes membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub key: PortfolioKey,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub selection: Selection,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(ProjectKey::from("svc-api").to_string(), "svc-api");
        assert_eq!(GateId::from(String::from("12")).as_str(), "12");
    }

    #[test]
    fn same_rule_ignores_remote_id() {
        let desired = Condition::new("coverage", Comparator::Lt, "80");
        let current = Condition::new("coverage", Comparator::Lt, "80").with_id("7");
        assert!(desired.same_rule(&current));
        assert!(!desired.same_rule(&current.clone().with_warning("90")));
    }

    #[test]
    fn selection_yaml_is_tagged_by_mode() {
        let yaml = "mode: REGEXP\nproject_pattern: ^svc-.*\n";
        let selection: Selection = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(
            selection,
            Selection::Regexp {
                project_pattern: "^svc-.*".to_string(),
                branch_pattern: None,
            }
        );
        assert_eq!(selection.mode(), SelectionMode::Regexp);
        assert!(selection.filters().is_none());
    }

    #[test]
    fn normalized_drops_empty_blocks() {
        let yaml = "mode: FILTER\nfilters:\n  languages: [java]\n  compliance: {}\n";
        let selection: Selection = serde_yaml::from_str(yaml).expect("parse");
        let filters = selection.normalized().filters().cloned().expect("filters");
        assert_eq!(filters.compliance, None);
        assert!(filters.languages.contains("java"));

        let blank_status = Filters {
            compliance: Some(Compliance {
                min_quality_gate_status: Some(String::new()),
                ..Compliance::default()
            }),
            ..Filters::default()
        };
        assert!(blank_status.normalized().is_empty());

        let kept = Compliance {
            min_quality_gate_status: Some(String::new()),
            min_coverage: Some(80.0),
            ..Compliance::default()
        };
        assert_eq!(
            kept.normalized(),
            Compliance {
                min_coverage: Some(80.0),
                ..Compliance::default()
            }
        );

        let regexp = Selection::Regexp {
            project_pattern: "^svc-".to_string(),
            branch_pattern: Some(String::new()),
        };
        assert_eq!(
            regexp.normalized(),
            Selection::Regexp {
                project_pattern: "^svc-".to_string(),
                branch_pattern: None,
            }
        );
    }

    #[test]
    fn filter_selection_defaults_to_empty_filters() {
        let selection: Selection = serde_yaml::from_str("mode: FILTER\n").expect("parse");
        assert_eq!(selection.filters().map(Filters::is_empty), Some(true));
    }

    #[test]
    fn negative_coverage_is_rejected() {
        let compliance = Compliance {
            min_coverage: Some(-1.0),
            ..Compliance::default()
        };
        let err = compliance
            .validate(&PortfolioKey::from("pf"))
            .expect_err("negative coverage");
        assert!(err.to_string().contains("min_coverage"));
    }

    #[test]
    fn duplicate_metric_in_gate_is_rejected() {
        let gate = QualityGateSpec {
            name: "strict".to_string(),
            conditions: vec![
                Condition::new("coverage", Comparator::Lt, "80"),
                Condition::new("coverage", Comparator::Lt, "90"),
            ],
        };
        assert!(matches!(
            gate.validate(),
            Err(ValidationError::DuplicateMetric { .. })
        ));
    }

    #[test]
    fn project_defaults() {
        let project: Project = serde_yaml::from_str("key: a\nname: A\n").expect("parse");
        assert_eq!(project.visibility, Visibility::Private);
        assert_eq!(project.main_branch, "main");
        assert!(project.tags.is_empty());
    }
}
