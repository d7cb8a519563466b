//! In-memory SonarQube for tests.
//!
//! [`FakeSonar`] implements [`HttpBackend`] and emulates every endpoint the
//! resource clients call. It records each attempt it receives and can be
//! told to fail selected calls with an HTTP status or a network error.
//! Ids are assigned from a counter and returned as JSON numbers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use sonarsync_core::{
    Comparator, Condition, ConditionId, GateId, Project, ProjectKey, QualityGate, SelectionMode,
};

use crate::client::SonarClient;
use crate::error::NetworkError;
use crate::retry::RetryPolicy;
use crate::telemetry::Telemetry;
use crate::transport::{Credential, HttpBackend, HttpRequest, HttpResponse, Method, Transport};
use crate::wire::{filters_from_params, split_list, Params, RemotePortfolio, RemoteProject};

pub const FAKE_HOST: &str = "http://sonar.test";
pub const FAKE_TOKEN: &str = "fake-token";

/// One request as received by the fake.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub params: Params,
}

impl RecordedRequest {
    pub fn is_mutation(&self) -> bool {
        self.method == Method::Post
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Status(u16),
    Network,
}

#[derive(Debug)]
struct Injection {
    path: String,
    skip: usize,
    remaining: Option<usize>,
    failure: Failure,
}

#[derive(Debug, Clone)]
struct FakeCondition {
    id: u64,
    metric: String,
    op: Comparator,
    error: String,
    warning: Option<String>,
}

#[derive(Debug, Clone)]
struct FakeGate {
    id: u64,
    name: String,
    conditions: Vec<FakeCondition>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    projects: BTreeMap<String, RemoteProject>,
    gates: BTreeMap<u64, FakeGate>,
    portfolios: BTreeMap<String, RemotePortfolio>,
    requests: Vec<RecordedRequest>,
    injections: Vec<Injection>,
    retain_stale_selection: bool,
}

impl FakeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn gate_by_name(&self, name: &str) -> Option<&FakeGate> {
        self.gates.values().find(|gate| gate.name == name)
    }

    fn take_failure(&mut self, path: &str) -> Option<Failure> {
        for injection in self.injections.iter_mut().filter(|i| i.path == path) {
            if injection.skip > 0 {
                injection.skip -= 1;
                return None;
            }
            match injection.remaining.as_mut() {
                Some(0) => continue,
                Some(remaining) => {
                    *remaining -= 1;
                    return Some(injection.failure);
                }
                None => return Some(injection.failure),
            }
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct FakeSonar {
    state: Mutex<FakeState>,
}

type Reply = (u16, Value);

fn ok(body: Value) -> Reply {
    (200, body)
}

fn no_content() -> Reply {
    (204, Value::Null)
}

fn reject(status: u16, msg: impl Into<String>) -> Reply {
    (status, json!({ "errors": [{ "msg": msg.into() }] }))
}

fn required<'a>(params: &'a Params, name: &str) -> Result<&'a str, Reply> {
    params
        .get(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| reject(400, format!("The '{name}' parameter is missing")))
}

fn parse_comparator(op: &str) -> Option<Comparator> {
    match op {
        "LT" => Some(Comparator::Lt),
        "GT" => Some(Comparator::Gt),
        "EQ" => Some(Comparator::Eq),
        "NE" => Some(Comparator::Ne),
        _ => None,
    }
}

fn parse_mode(mode: &str) -> Option<SelectionMode> {
    match mode {
        "MANUAL" => Some(SelectionMode::Manual),
        "REGEXP" => Some(SelectionMode::Regexp),
        "FILTER" => Some(SelectionMode::Filter),
        _ => None,
    }
}

fn gate_json(gate: &FakeGate) -> Value {
    let conditions: Vec<_> = gate
        .conditions
        .iter()
        .map(condition_json)
        .collect();
    json!({ "id": gate.id, "name": gate.name, "conditions": conditions, "isDefault": false })
}

fn condition_json(condition: &FakeCondition) -> Value {
    let mut value = json!({
        "id": condition.id,
        "metric": condition.metric,
        "op": condition.op.as_str(),
        "error": condition.error,
    });
    if let (Some(warning), Some(map)) = (&condition.warning, value.as_object_mut()) {
        map.insert("warning".to_string(), json!(warning));
    }
    value
}

fn to_json<T: serde::Serialize>(value: &T) -> Reply {
    match serde_json::to_value(value) {
        Ok(value) => ok(value),
        Err(err) => reject(500, err.to_string()),
    }
}

impl FakeSonar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Client without retries, so injected failures surface immediately.
    pub fn client(self: &Arc<Self>) -> SonarClient {
        self.client_with(RetryPolicy::disabled(), None)
    }

    pub fn client_with(
        self: &Arc<Self>,
        retry: RetryPolicy,
        telemetry: Option<Arc<dyn Telemetry>>,
    ) -> SonarClient {
        let mut builder = Transport::builder(Credential::new(FAKE_HOST, FAKE_TOKEN))
            .retry(retry)
            .backend(self.clone());
        if let Some(telemetry) = telemetry {
            builder = builder.telemetry(telemetry);
        }
        match builder.build() {
            Ok(transport) => SonarClient::new(transport),
            Err(err) => panic!("fake transport: {err}"),
        }
    }

    // -- seeding ------------------------------------------------------------

    pub fn insert_project(&self, project: &Project) {
        self.state()
            .projects
            .insert(project.key.0.clone(), RemoteProject::from(project));
    }

    /// Seed a gate; the returned value carries the assigned ids.
    pub fn insert_gate(&self, name: &str, conditions: &[Condition]) -> QualityGate {
        let mut state = self.state();
        let id = state.next_id();
        let conditions = conditions
            .iter()
            .map(|c| FakeCondition {
                id: state.next_id(),
                metric: c.metric.clone(),
                op: c.op,
                error: c.error.clone(),
                warning: c.warning.clone(),
            })
            .collect();
        let gate = FakeGate {
            id,
            name: name.to_string(),
            conditions,
        };
        let snapshot = Self::gate_value(&gate);
        state.gates.insert(id, gate);
        snapshot
    }

    pub fn insert_portfolio(&self, portfolio: RemotePortfolio) {
        self.state()
            .portfolios
            .insert(portfolio.key.clone(), portfolio);
    }

    // -- inspection ---------------------------------------------------------

    pub fn project(&self, key: &ProjectKey) -> Option<Project> {
        self.state()
            .projects
            .get(key.as_str())
            .cloned()
            .map(Project::from)
    }

    pub fn gate(&self, id: &GateId) -> Option<QualityGate> {
        let id: u64 = id.as_str().parse().ok()?;
        self.state().gates.get(&id).map(Self::gate_value)
    }

    pub fn gate_by_name(&self, name: &str) -> Option<QualityGate> {
        self.state().gate_by_name(name).map(Self::gate_value)
    }

    pub fn portfolio(&self, key: &str) -> Option<RemotePortfolio> {
        self.state().portfolios.get(key).cloned()
    }

    fn gate_value(gate: &FakeGate) -> QualityGate {
        QualityGate {
            id: GateId::from(gate.id.to_string()),
            name: gate.name.clone(),
            conditions: gate
                .conditions
                .iter()
                .map(|c| Condition {
                    id: Some(ConditionId::from(c.id.to_string())),
                    metric: c.metric.clone(),
                    op: c.op,
                    error: c.error.clone(),
                    warning: c.warning.clone(),
                })
                .collect(),
            is_default: false,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    pub fn mutations(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(RecordedRequest::is_mutation)
            .collect()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    // -- behaviour ----------------------------------------------------------

    /// Fail the next call to `path` once.
    pub fn fail_next(&self, path: &str, failure: Failure) {
        self.fail_nth(path, 0, failure);
    }

    /// Let `skip` calls to `path` through, then fail the next one.
    pub fn fail_nth(&self, path: &str, skip: usize, failure: Failure) {
        self.state().injections.push(Injection {
            path: path.to_string(),
            skip,
            remaining: Some(1),
            failure,
        });
    }

    pub fn fail_always(&self, path: &str, failure: Failure) {
        self.state().injections.push(Injection {
            path: path.to_string(),
            skip: 0,
            remaining: None,
            failure,
        });
    }

    /// When set, `configure_selection` keeps the fields of the previous mode.
    pub fn retain_stale_selection(&self, retain: bool) {
        self.state().retain_stale_selection = retain;
    }

    // -- dispatch -----------------------------------------------------------

    fn handle(state: &mut FakeState, method: Method, path: &str, params: &Params) -> Reply {
        let result = match (method, path) {
            (Method::Post, "projects/create") => Self::create_project(state, params),
            (Method::Get, "projects/search") => Ok(Self::search_projects(state, params)),
            (Method::Post, "projects/update") => Self::update_project(state, params),
            (Method::Post, "projects/delete") => Self::delete_project(state, params),
            (Method::Post, "qualitygates/create") => Self::create_gate(state, params),
            (Method::Get, "qualitygates/show") => Self::show_gate(state, params),
            (Method::Post, "qualitygates/update") => Self::update_gate(state, params),
            (Method::Post, "qualitygates/delete") => Self::delete_gate(state, params),
            (Method::Post, "qualitygates/create_condition") => Self::create_condition(state, params),
            (Method::Post, "qualitygates/delete_condition") => Self::delete_condition(state, params),
            (Method::Post, "portfolios/create") => Self::create_portfolio(state, params),
            (Method::Get, "portfolios/show") => Self::show_portfolio(state, params),
            (Method::Post, "portfolios/update") => Self::update_portfolio(state, params),
            (Method::Post, "portfolios/delete") => Self::delete_portfolio(state, params),
            (Method::Post, "portfolios/configure_selection") => {
                Self::configure_selection(state, params)
            }
            (Method::Post, "portfolios/configure_filters") => Self::configure_filters(state, params),
            _ => Err(reject(404, format!("Unknown url: /api/{path}"))),
        };
        result.unwrap_or_else(|reply| reply)
    }

    fn create_project(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let key = required(params, "project")?;
        let name = required(params, "name")?;
        if state.projects.contains_key(key) {
            return Err(reject(
                400,
                format!("Could not create Project, key already exists: {key}"),
            ));
        }
        let project = RemoteProject {
            key: key.to_string(),
            name: name.to_string(),
            visibility: Some(params.get("visibility").unwrap_or("private").to_string()),
            main_branch: Some(params.get("mainBranch").unwrap_or("main").to_string()),
            tags: split_list(params.get("tags")).into_iter().collect(),
        };
        let reply = json!({ "project": {
            "key": project.key,
            "name": project.name,
            "qualifier": "TRK",
            "visibility": project.visibility,
        }});
        state.projects.insert(project.key.clone(), project);
        Ok(ok(reply))
    }

    /// Substring match on the key, like the remote's search.
    fn search_projects(state: &FakeState, params: &Params) -> Reply {
        let needle = params.get("projects").unwrap_or_default();
        let components: Vec<_> = state
            .projects
            .values()
            .filter(|p| p.key.contains(needle))
            .cloned()
            .collect();
        to_json(&json!({
            "paging": { "pageIndex": 1, "pageSize": 100, "total": components.len() },
            "components": components,
        }))
    }

    fn update_project(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let key = required(params, "project")?;
        let project = state
            .projects
            .get_mut(key)
            .ok_or_else(|| reject(404, format!("Project '{key}' not found")))?;
        if let Some(name) = params.get("name") {
            project.name = name.to_string();
        }
        if let Some(visibility) = params.get("visibility") {
            project.visibility = Some(visibility.to_string());
        }
        if params.contains("tags") {
            project.tags = split_list(params.get("tags")).into_iter().collect();
        }
        Ok(no_content())
    }

    fn delete_project(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let key = required(params, "project")?;
        state
            .projects
            .remove(key)
            .map(|_| no_content())
            .ok_or_else(|| reject(404, format!("Project '{key}' not found")))
    }

    fn create_gate(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let name = required(params, "name")?;
        if state.gate_by_name(name).is_some() {
            return Err(reject(400, "Name has already been taken"));
        }
        let id = state.next_id();
        let gate = FakeGate {
            id,
            name: name.to_string(),
            conditions: Vec::new(),
        };
        let reply = json!({ "id": id, "name": name });
        state.gates.insert(id, gate);
        Ok(ok(reply))
    }

    fn find_gate_id(state: &FakeState, params: &Params) -> Result<u64, Reply> {
        let found = if let Some(id) = params.get("id") {
            id.parse().ok().filter(|id| state.gates.contains_key(id))
        } else if let Some(name) = params.get("name") {
            state.gate_by_name(name).map(|g| g.id)
        } else {
            return Err(reject(400, "Either 'id' or 'name' must be provided"));
        };
        found.ok_or_else(|| reject(404, "No quality gate has been found"))
    }

    fn show_gate(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let id = Self::find_gate_id(state, params)?;
        let gate = state
            .gates
            .get(&id)
            .ok_or_else(|| reject(404, "No quality gate has been found"))?;
        Ok(ok(gate_json(gate)))
    }

    fn update_gate(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let id = Self::find_gate_id(state, params)?;
        let name = required(params, "name")?;
        if state.gate_by_name(name).is_some_and(|g| g.id != id) {
            return Err(reject(400, "Name has already been taken"));
        }
        if let Some(gate) = state.gates.get_mut(&id) {
            gate.name = name.to_string();
        }
        Ok(no_content())
    }

    fn delete_gate(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let id = Self::find_gate_id(state, params)?;
        state.gates.remove(&id);
        Ok(no_content())
    }

    fn create_condition(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let gate_id: u64 = required(params, "gateId")?
            .parse()
            .map_err(|_| reject(400, "gateId must be numeric"))?;
        let metric = required(params, "metric")?.to_string();
        let op = parse_comparator(required(params, "op")?)
            .ok_or_else(|| reject(400, "Value of parameter 'op' is not valid"))?;
        let error = required(params, "error")?.to_string();
        let warning = params.get("warning").map(str::to_string);

        if !state.gates.contains_key(&gate_id) {
            return Err(reject(404, format!("No quality gate has been found for id {gate_id}")));
        }
        let id = state.next_id();
        let condition = FakeCondition {
            id,
            metric,
            op,
            error,
            warning,
        };
        let reply = condition_json(&condition);
        let gate = state
            .gates
            .get_mut(&gate_id)
            .ok_or_else(|| reject(404, "No quality gate has been found"))?;
        if gate.conditions.iter().any(|c| c.metric == condition.metric) {
            return Err(reject(
                400,
                format!("Condition on metric '{}' already exists.", condition.metric),
            ));
        }
        gate.conditions.push(condition);
        Ok(ok(reply))
    }

    fn delete_condition(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let id: u64 = required(params, "id")?
            .parse()
            .map_err(|_| reject(400, "id must be numeric"))?;
        for gate in state.gates.values_mut() {
            if let Some(pos) = gate.conditions.iter().position(|c| c.id == id) {
                gate.conditions.remove(pos);
                return Ok(no_content());
            }
        }
        Err(reject(404, format!("No quality gate condition with id '{id}'")))
    }

    fn create_portfolio(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let key = required(params, "key")?;
        let name = required(params, "name")?;
        if state.portfolios.contains_key(key) {
            return Err(reject(400, format!("Component key '{key}' already exists")));
        }
        let portfolio = RemotePortfolio {
            key: key.to_string(),
            name: name.to_string(),
            description: params.get("description").map(str::to_string),
            ..RemotePortfolio::default()
        };
        let reply = to_json(&portfolio);
        state.portfolios.insert(key.to_string(), portfolio);
        Ok(reply)
    }

    fn portfolio_mut<'a>(
        state: &'a mut FakeState,
        params: &Params,
    ) -> Result<&'a mut RemotePortfolio, Reply> {
        let key = required(params, "key")?;
        state
            .portfolios
            .get_mut(key)
            .ok_or_else(|| reject(404, format!("Portfolio '{key}' not found")))
    }

    fn show_portfolio(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let portfolio = Self::portfolio_mut(state, params)?;
        Ok(to_json(portfolio))
    }

    fn update_portfolio(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let portfolio = Self::portfolio_mut(state, params)?;
        if let Some(name) = params.get("name") {
            portfolio.name = name.to_string();
        }
        portfolio.description = params.get("description").map(str::to_string);
        Ok(no_content())
    }

    fn delete_portfolio(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let key = required(params, "key")?.to_string();
        state
            .portfolios
            .remove(&key)
            .map(|_| no_content())
            .ok_or_else(|| reject(404, format!("Portfolio '{key}' not found")))
    }

    fn configure_selection(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let mode = parse_mode(required(params, "mode")?)
            .ok_or_else(|| reject(400, "Value of parameter 'mode' is not valid"))?;
        if mode == SelectionMode::Regexp {
            required(params, "projectPattern")?;
        }
        let retain = state.retain_stale_selection;
        let portfolio = Self::portfolio_mut(state, params)?;
        let selection = &mut portfolio.selection;
        if !retain {
            selection.projects.clear();
            selection.project_pattern = None;
            selection.branch_pattern = None;
            portfolio.filters = None;
        }
        selection.mode = Some(mode);
        if params.contains("projects") || mode == SelectionMode::Manual {
            selection.projects = split_list(params.get("projects")).into_iter().collect();
        }
        if let Some(pattern) = params.get("projectPattern") {
            selection.project_pattern = Some(pattern.to_string());
        }
        if let Some(pattern) = params.get("branchPattern") {
            selection.branch_pattern = Some(pattern.to_string());
        }
        Ok(no_content())
    }

    fn configure_filters(state: &mut FakeState, params: &Params) -> Result<Reply, Reply> {
        let portfolio = Self::portfolio_mut(state, params)?;
        if portfolio.selection.mode != Some(SelectionMode::Filter) {
            return Err(reject(400, "Filters can only be set in FILTER mode"));
        }
        portfolio.filters = Some(filters_from_params(params));
        Ok(no_content())
    }
}

#[async_trait]
impl HttpBackend for FakeSonar {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let path = request.api_path().to_string();
        let params = request.query();
        let mut state = self.state();
        state.requests.push(RecordedRequest {
            method: request.method,
            path: path.clone(),
            params: params.clone(),
        });

        match state.take_failure(&path) {
            Some(Failure::Network) => return Err(NetworkError::new("injected network failure")),
            Some(Failure::Status(status)) => {
                return Ok(reply_to_response(reject(status, "injected failure")))
            }
            None => {}
        }

        let expected = format!("Bearer {FAKE_TOKEN}");
        if request.header("authorization") != Some(expected.as_str()) {
            return Ok(reply_to_response(reject(401, "Authentication required")));
        }

        Ok(reply_to_response(Self::handle(
            &mut state,
            request.method,
            &path,
            &params,
        )))
    }
}

fn reply_to_response((status, body): Reply) -> HttpResponse {
    let body = if body.is_null() {
        Vec::new()
    } else {
        body.to_string().into_bytes()
    };
    HttpResponse { status, body }
}
