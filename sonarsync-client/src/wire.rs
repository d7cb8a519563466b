//! Wire encoding for the SonarQube Web API.
//!
//! Requests carry their arguments as query parameters ([`Params`]); list
//! values are comma-joined and custom metrics are flattened to
//! `metric_<name>_operator` / `metric_<name>_value` pairs. Responses are
//! JSON and decode into the `Remote*` structs below, which convert into
//! the domain types of `sonarsync_core`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};

use sonarsync_core::{
    Comparator, Compliance, Condition, ConditionId, Filters, GateId, MetricFilter, PortfolioKey,
    Project, ProjectKey, QualityGate, Selection, SelectionMode, Visibility,
};

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// Ordered query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((name.into(), value.into()));
        self
    }

    /// Set only when `value` is present and non-empty.
    pub fn set_opt(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value.map(Into::into) {
            Some(value) if !value.is_empty() => self.set(name, value),
            _ => self,
        }
    }

    /// Comma-join `values`; omitted entirely when empty.
    pub fn set_list<I, S>(self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = values
            .into_iter()
            .map(|v| v.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.set_opt(name, Some(joined))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Params {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub(crate) fn split_list(value: Option<&str>) -> BTreeSet<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shortest decimal that parses back to the same `f64`.
pub fn format_decimal(value: f64) -> String {
    format!("{value}")
}

// ---------------------------------------------------------------------------
// Error payload and ids
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
struct ErrorEntry {
    msg: String,
}

/// Extract `{"errors":[{"msg":...}]}` messages, joined with `"; "`.
pub fn remote_message(body: &[u8]) -> Option<String> {
    let payload: ErrorPayload = serde_json::from_slice(body).ok()?;
    let messages: Vec<_> = payload.errors.into_iter().map(|e| e.msg).collect();
    (!messages.is_empty()).then(|| messages.join("; "))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

/// Remote ids and thresholds arrive as either JSON strings or numbers.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    })
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.map(|v| match v {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProject {
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_branch: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<RemoteProject> for Project {
    fn from(remote: RemoteProject) -> Self {
        let visibility = match remote.visibility.as_deref() {
            Some("public") => Visibility::Public,
            _ => Visibility::Private,
        };
        Project {
            key: ProjectKey::from(remote.key),
            name: remote.name,
            visibility,
            main_branch: remote.main_branch.unwrap_or_else(|| "main".to_string()),
            tags: remote.tags.into_iter().collect(),
        }
    }
}

impl From<&Project> for RemoteProject {
    fn from(project: &Project) -> Self {
        RemoteProject {
            key: project.key.0.clone(),
            name: project.name.clone(),
            visibility: Some(project.visibility.as_str().to_string()),
            main_branch: Some(project.main_branch.clone()),
            tags: project.tags.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectEnvelope {
    pub project: RemoteProject,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectSearch {
    #[serde(default)]
    pub components: Vec<RemoteProject>,
}

pub(crate) fn project_params(project: &Project) -> Params {
    Params::new()
        .set("project", project.key.as_str())
        .set("name", project.name.as_str())
        .set("visibility", project.visibility.as_str())
}

// ---------------------------------------------------------------------------
// Quality gates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCondition {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub metric: String,
    pub op: Comparator,
    #[serde(deserialize_with = "string_or_number")]
    pub error: String,
    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub warning: Option<String>,
}

impl From<RemoteCondition> for Condition {
    fn from(remote: RemoteCondition) -> Self {
        Condition {
            id: Some(ConditionId::from(remote.id)),
            metric: remote.metric,
            op: remote.op,
            error: remote.error,
            warning: remote.warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteGate {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<RemoteCondition>,
    #[serde(default)]
    pub is_default: bool,
}

impl From<RemoteGate> for QualityGate {
    fn from(remote: RemoteGate) -> Self {
        QualityGate {
            id: GateId::from(remote.id),
            name: remote.name,
            conditions: remote.conditions.into_iter().map(Condition::from).collect(),
            is_default: remote.is_default,
        }
    }
}

pub(crate) fn condition_params(gate: &GateId, condition: &Condition) -> Params {
    Params::new()
        .set("gateId", gate.as_str())
        .set("metric", condition.metric.as_str())
        .set("op", condition.op.as_str())
        .set("error", condition.error.as_str())
        .set_opt("warning", condition.warning.as_deref())
}

// ---------------------------------------------------------------------------
// Portfolios
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSelection {
    #[serde(default)]
    pub mode: Option<SelectionMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCompliance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_quality_gate_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duplications: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_issues: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_rules: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality_gates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<RemoteCompliance>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, MetricFilter>,
}

impl From<RemoteFilters> for Filters {
    fn from(remote: RemoteFilters) -> Self {
        let compliance = remote
            .compliance
            .map(|c| Compliance {
                min_quality_gate_status: c.min_quality_gate_status.filter(|s| !s.is_empty()),
                min_coverage: c.min_coverage,
                max_duplications: c.max_duplications,
                max_issues: c.max_issues,
                required_rules: c.required_rules.into_iter().collect(),
            })
            .filter(|c| !c.is_empty());
        Filters {
            languages: remote.languages.into_iter().collect(),
            tags: remote.tags.into_iter().collect(),
            quality_gates: remote.quality_gates.into_iter().collect(),
            compliance,
            custom_metrics: remote.metrics,
        }
    }
}

/// A portfolio exactly as the remote reports it, including fields that do
/// not belong to its current selection mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePortfolio {
    pub key: String,
    pub name: String,
    #[serde(default, alias = "desc", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub selection: RemoteSelection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<RemoteFilters>,
}

impl RemotePortfolio {
    pub fn key(&self) -> PortfolioKey {
        PortfolioKey::from(self.key.as_str())
    }

    pub fn mode(&self) -> Option<SelectionMode> {
        self.selection.mode
    }

    /// Filters as a domain value; absent and empty are the same.
    pub fn filters(&self) -> Filters {
        self.filters.clone().map(Filters::from).unwrap_or_default()
    }

    /// The selection restricted to the fields of the active mode.
    pub fn selection(&self) -> Option<Selection> {
        let selection = match self.selection.mode? {
            SelectionMode::Manual => Selection::Manual {
                projects: self.selection.projects.iter().cloned().collect(),
            },
            SelectionMode::Regexp => Selection::Regexp {
                project_pattern: self.selection.project_pattern.clone().unwrap_or_default(),
                branch_pattern: self
                    .selection
                    .branch_pattern
                    .clone()
                    .filter(|p| !p.is_empty()),
            },
            SelectionMode::Filter => Selection::Filter {
                filters: self.filters(),
            },
        };
        Some(selection)
    }

    /// Names of populated fields that belong to a mode other than the
    /// active one.
    pub fn stale_fields(&self) -> Vec<&'static str> {
        let Some(mode) = self.selection.mode else {
            return Vec::new();
        };
        let has_projects = !self.selection.projects.is_empty();
        let has_project_pattern = self
            .selection
            .project_pattern
            .as_deref()
            .is_some_and(|p| !p.is_empty());
        let has_branch_pattern = self
            .selection
            .branch_pattern
            .as_deref()
            .is_some_and(|p| !p.is_empty());
        let has_filters = !self.filters().is_empty();

        let mut stale = Vec::new();
        if mode != SelectionMode::Manual && has_projects {
            stale.push("projects");
        }
        if mode != SelectionMode::Regexp && has_project_pattern {
            stale.push("projectPattern");
        }
        if mode != SelectionMode::Regexp && has_branch_pattern {
            stale.push("branchPattern");
        }
        if mode != SelectionMode::Filter && has_filters {
            stale.push("filters");
        }
        stale
    }
}

pub(crate) fn portfolio_header_params(
    key: &PortfolioKey,
    name: &str,
    description: Option<&str>,
) -> Params {
    Params::new()
        .set("key", key.as_str())
        .set("name", name)
        .set_opt("description", description)
}

/// `configure_selection` arguments: the key, the mode, and only the fields
/// of that mode.
pub fn selection_params(key: &PortfolioKey, selection: &Selection) -> Params {
    let params = Params::new()
        .set("key", key.as_str())
        .set("mode", selection.mode().as_str());
    match selection {
        Selection::Manual { projects } => params.set_list("projects", projects),
        Selection::Regexp {
            project_pattern,
            branch_pattern,
        } => params
            .set("projectPattern", project_pattern.as_str())
            .set_opt("branchPattern", branch_pattern.as_deref()),
        Selection::Filter { .. } => params,
    }
}

/// `configure_filters` arguments. Absent compliance fields and metrics are
/// omitted rather than sent as zero.
pub fn filter_params(key: &PortfolioKey, filters: &Filters) -> Params {
    let mut params = Params::new()
        .set("key", key.as_str())
        .set_list("languages", &filters.languages)
        .set_list("tags", &filters.tags)
        .set_list("qualityGates", &filters.quality_gates);

    if let Some(compliance) = &filters.compliance {
        params = params
            .set_opt(
                "minQualityGateStatus",
                compliance.min_quality_gate_status.as_deref(),
            )
            .set_opt("minCoverage", compliance.min_coverage.map(format_decimal))
            .set_opt(
                "maxDuplications",
                compliance.max_duplications.map(format_decimal),
            )
            .set_opt("maxIssues", compliance.max_issues.map(|n| n.to_string()))
            .set_list("requiredRules", &compliance.required_rules);
    }

    for (metric, filter) in &filters.custom_metrics {
        params = params
            .set(format!("metric_{metric}_operator"), filter.operator.as_str())
            .set(format!("metric_{metric}_value"), filter.value.as_str());
    }
    params
}

/// Inverse of [`filter_params`], used by the in-memory remote.
#[cfg_attr(not(any(test, feature = "test-support")), allow(dead_code))]
pub(crate) fn filters_from_params(params: &Params) -> RemoteFilters {
    let parse_f64 = |name: &str| params.get(name).and_then(|v| v.parse::<f64>().ok());

    let compliance = RemoteCompliance {
        min_quality_gate_status: params.get("minQualityGateStatus").map(str::to_string),
        min_coverage: parse_f64("minCoverage"),
        max_duplications: parse_f64("maxDuplications"),
        max_issues: params.get("maxIssues").and_then(|v| v.parse().ok()),
        required_rules: split_list(params.get("requiredRules")).into_iter().collect(),
    };

    let mut metrics = BTreeMap::new();
    for (name, operator) in params.iter() {
        let Some(metric) = name
            .strip_prefix("metric_")
            .and_then(|rest| rest.strip_suffix("_operator"))
        else {
            continue;
        };
        if let Some(value) = params.get(&format!("metric_{metric}_value")) {
            metrics.insert(
                metric.to_string(),
                MetricFilter {
                    operator: operator.to_string(),
                    value: value.to_string(),
                },
            );
        }
    }

    RemoteFilters {
        languages: split_list(params.get("languages")).into_iter().collect(),
        tags: split_list(params.get("tags")).into_iter().collect(),
        quality_gates: split_list(params.get("qualityGates")).into_iter().collect(),
        compliance: (compliance != RemoteCompliance::default()).then_some(compliance),
        metrics,
    }
}
