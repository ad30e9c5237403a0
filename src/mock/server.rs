//! In-process mock Azkaban server.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use azkaban_protocol::{Method, RawResponse, RemoteRequest, Resource, LOGIN_PAGE_MARKER};
use serde_json::{json, Value};

use super::failure::{FailureConfig, FailureInjector, FailureKind};
use super::state::{read_archive, MockExecution, MockProject, MockSchedule, MockState};
use crate::alias::Endpoint;
use crate::session::{Transport, TransportError};

/// Mock server answering the AJAX API from in-memory state
///
/// Clones share state, so a test can keep a handle for inspection while the
/// client owns another as its transport.
#[derive(Clone)]
pub struct MockAzkaban {
    state: Arc<Mutex<MockState>>,
    failures: Arc<Mutex<FailureInjector>>,
}

impl Default for MockAzkaban {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAzkaban {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new())),
            failures: Arc::new(Mutex::new(FailureInjector::new())),
        }
    }

    /// Register a user
    pub fn with_user(self, user: &str, password: &str) -> Self {
        self.state()
            .users
            .insert(user.to_string(), password.to_string());
        self
    }

    /// Number of status polls before a new execution finishes
    pub fn with_polls_per_execution(self, polls: u32) -> Self {
        self.state().polls_per_execution = polls;
        self
    }

    /// Inject a failure for an operation
    pub fn inject_failure(&self, op: &str, config: FailureConfig) {
        self.failures().inject(op, config);
    }

    pub fn clear_failures(&self) {
        self.failures().clear();
    }

    /// Invalidate every session, as a server restart would.
    pub fn expire_sessions(&self) {
        self.state().sessions.clear();
    }

    /// Accept `token` as a valid session.
    pub fn add_session(&self, token: &str) {
        self.state().sessions.insert(token.to_string());
    }

    pub fn login_count(&self) -> u32 {
        self.state().login_count
    }

    /// Operation names received so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.state().requests.clone()
    }

    pub fn project(&self, name: &str) -> Option<MockProject> {
        self.state().projects.get(name).cloned()
    }

    pub fn execution(&self, exec_id: u64) -> Option<MockExecution> {
        self.state().executions.get(&exec_id).cloned()
    }

    /// Append output to a running execution's flow log.
    pub fn append_log(&self, exec_id: u64, text: &str) {
        if let Some(execution) = self.state().executions.get_mut(&exec_id) {
            execution.log.push_str(text);
        }
    }

    pub fn schedules(&self) -> Vec<MockSchedule> {
        self.state().schedules.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn failures(&self) -> MutexGuard<'_, FailureInjector> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer one request.
    pub fn handle(&self, request: &RemoteRequest) -> Result<RawResponse, TransportError> {
        let op = operation_name(request);
        self.state().requests.push(op.to_string());

        if let Some(kind) = self.failures().check(op) {
            return match kind {
                FailureKind::Transport => Err(TransportError::ConnectionFailed {
                    url: request.resource.path().to_string(),
                    reason: "connection refused (injected)".to_string(),
                }),
                FailureKind::Status(status) => Ok(RawResponse::new(status, "Server Error")),
                FailureKind::Malformed => Ok(RawResponse::new(200, "<html>oops</html>")),
                FailureKind::Expired => Ok(login_page()),
                FailureKind::Rejected(message) => Ok(error(&message)),
            };
        }

        if op == "login" {
            return Ok(self.handle_login(request));
        }

        let mut state = self.state();
        let authenticated = request
            .session()
            .map(|token| state.sessions.contains(token))
            .unwrap_or(false);
        if !authenticated {
            return Ok(login_page());
        }

        Ok(match op {
            "create_project" => handle_create(&mut state, request),
            "delete_project" => handle_delete(&mut state, request),
            "upload_archive" => handle_upload(&mut state, request),
            "fetch_project_flows" => handle_project_flows(&state, request),
            "fetch_flow_jobs" => handle_flow_jobs(&state, request),
            "execute_flow" => handle_execute(&mut state, request),
            "schedule_flow" => handle_schedule(&mut state, request),
            "fetch_execution" => handle_fetch_execution(&mut state, request),
            "fetch_logs" => handle_logs(&state, request),
            "cancel_execution" => handle_cancel(&mut state, request),
            _ => RawResponse::new(404, "Not Found"),
        })
    }

    fn handle_login(&self, request: &RemoteRequest) -> RawResponse {
        let mut state = self.state();
        let user = request.get("username").unwrap_or_default();
        let password = request.get("password").unwrap_or_default();
        if state.users.get(user).map(String::as_str) != Some(password) {
            return error("Incorrect Login. Username/Password not found.");
        }
        let token = format!("session-{}-{}", user, state.next_id());
        state.sessions.insert(token.clone());
        state.login_count += 1;
        RawResponse::json(&json!({"status": "success", "session.id": token}))
    }
}

impl Transport for MockAzkaban {
    fn execute(
        &self,
        _endpoint: &Endpoint,
        request: &RemoteRequest,
    ) -> Result<RawResponse, TransportError> {
        self.handle(request)
    }
}

/// Map a request back to the name of the operation that built it.
fn operation_name(request: &RemoteRequest) -> &'static str {
    match (request.resource, request.method) {
        (Resource::Root, Method::Post) if request.get("action") == Some("login") => "login",
        (Resource::Manager, _) => {
            if request.get("action") == Some("create") {
                "create_project"
            } else if request.get("delete") == Some("true") {
                "delete_project"
            } else {
                match request.get("ajax") {
                    Some("upload") => "upload_archive",
                    Some("fetchprojectflows") => "fetch_project_flows",
                    Some("fetchflowjobs") => "fetch_flow_jobs",
                    _ => "unknown",
                }
            }
        }
        (Resource::Executor, _) => match request.get("ajax") {
            Some("executeFlow") => "execute_flow",
            Some("fetchexecflow") => "fetch_execution",
            Some("fetchExecFlowLogs") | Some("fetchExecJobLogs") => "fetch_logs",
            Some("cancelFlow") => "cancel_execution",
            _ => "unknown",
        },
        (Resource::Schedule, _) if request.get("ajax") == Some("scheduleFlow") => "schedule_flow",
        _ => "unknown",
    }
}

fn login_page() -> RawResponse {
    RawResponse::new(
        200,
        format!("<html><body>{}<form>login</form></body></html>", LOGIN_PAGE_MARKER),
    )
}

fn error(message: &str) -> RawResponse {
    RawResponse::json(&json!({ "error": message }))
}

fn param<'a>(request: &'a RemoteRequest, key: &str) -> &'a str {
    request.get(key).unwrap_or_default()
}

fn exec_id(request: &RemoteRequest) -> u64 {
    param(request, "execid").parse().unwrap_or_default()
}

fn handle_create(state: &mut MockState, request: &RemoteRequest) -> RawResponse {
    let name = param(request, "name");
    if name.is_empty() {
        return RawResponse::json(&json!({"status": "error", "message": "Project name is empty."}));
    }
    if state.projects.contains_key(name) {
        return RawResponse::json(
            &json!({"status": "error", "message": "Project already exists."}),
        );
    }
    let id = state.next_id();
    state.projects.insert(
        name.to_string(),
        MockProject {
            id,
            name: name.to_string(),
            description: param(request, "description").to_string(),
            version: 0,
            jobs: BTreeMap::new(),
            files: Vec::new(),
        },
    );
    RawResponse::json(&json!({"status": "success", "path": format!("manager?project={}", name)}))
}

fn handle_delete(state: &mut MockState, request: &RemoteRequest) -> RawResponse {
    let name = param(request, "project");
    if state.projects.remove(name).is_some() {
        RawResponse::new(
            200,
            format!("<html>Project '{}' was successfully deleted</html>", name),
        )
    } else {
        RawResponse::new(200, format!("<html>Project {} doesn't exist.</html>", name))
    }
}

fn handle_upload(state: &mut MockState, request: &RemoteRequest) -> RawResponse {
    let name = param(request, "project");
    let upload = match &request.upload {
        Some(upload) => upload,
        None => return error("Missing file."),
    };
    let (jobs, files) = match read_archive(&upload.bytes) {
        Ok(contents) => contents,
        Err(reason) => return error(&format!("Installation Failed.\n{}", reason)),
    };
    let project = match state.projects.get_mut(name) {
        Some(project) => project,
        None => {
            return error(&format!(
                "Installation Failed. Project '{}' doesn't exist.",
                name
            ))
        }
    };
    project.version += 1;
    project.jobs = jobs;
    project.files = files;
    RawResponse::json(&json!({
        "projectId": project.id.to_string(),
        "version": project.version.to_string(),
    }))
}

fn handle_project_flows(state: &MockState, request: &RemoteRequest) -> RawResponse {
    let name = param(request, "project");
    match state.projects.get(name) {
        Some(project) => {
            let flows: Vec<Value> = project
                .flows()
                .into_iter()
                .map(|flow| json!({ "flowId": flow }))
                .collect();
            RawResponse::json(&json!({
                "project": name,
                "projectId": project.id,
                "flows": flows,
            }))
        }
        None => error(&format!("Project {} doesn't exist.", name)),
    }
}

fn handle_flow_jobs(state: &MockState, request: &RemoteRequest) -> RawResponse {
    let name = param(request, "project");
    let flow = param(request, "flow");
    let jobs = match state.projects.get(name).and_then(|p| p.flow_jobs(flow)) {
        Some(jobs) => jobs,
        None => return error(&format!("Flow {} not found.", flow)),
    };
    let nodes: Vec<Value> = jobs
        .iter()
        .map(|(id, job)| json!({"id": id, "type": job.job_type, "in": job.dependencies}))
        .collect();
    RawResponse::json(&json!({"project": name, "flow": flow, "nodes": nodes}))
}

fn handle_execute(state: &mut MockState, request: &RemoteRequest) -> RawResponse {
    let name = param(request, "project");
    let flow = param(request, "flow");
    let jobs = match state.projects.get(name).and_then(|p| p.flow_jobs(flow)) {
        Some(jobs) => jobs,
        None => return error(&format!("Flow {} not found.", flow)),
    };
    let disabled: Vec<String> = serde_json::from_str(param(request, "disabled")).unwrap_or_default();

    if param(request, "concurrentOption") == "skip"
        && state
            .executions
            .values()
            .any(|e| e.project == name && e.flow == flow && e.is_running())
    {
        return error(&format!("Flow {} is already running. Skipping execution.", flow));
    }

    let id = state.next_id();
    let remaining_polls = state.polls_per_execution;
    let mut nodes = BTreeMap::new();
    let mut job_logs = BTreeMap::new();
    let mut log = format!("Flow {} of project {} started\n", flow, name);
    for job in jobs.keys() {
        if disabled.contains(job) {
            nodes.insert(job.clone(), "DISABLED".to_string());
        } else {
            nodes.insert(job.clone(), "RUNNING".to_string());
            let line = format!("Running job {}\n", job);
            log.push_str(&line);
            job_logs.insert(job.clone(), line);
        }
    }
    state.executions.insert(
        id,
        MockExecution {
            id,
            project: name.to_string(),
            flow: flow.to_string(),
            status: "RUNNING".to_string(),
            nodes,
            remaining_polls,
            log,
            job_logs,
        },
    );
    RawResponse::json(&json!({"project": name, "flow": flow, "execid": id}))
}

fn handle_schedule(state: &mut MockState, request: &RemoteRequest) -> RawResponse {
    let name = param(request, "projectName");
    let flow = param(request, "flow");
    let known = state
        .projects
        .get(name)
        .map(|p| p.id.to_string() == param(request, "projectId") && p.flows().iter().any(|f| f == flow))
        .unwrap_or(false);
    if !known {
        return RawResponse::json(
            &json!({"status": "error", "message": format!("Flow {} not found.", flow)}),
        );
    }
    let id = state.next_id();
    let period = match param(request, "is_recurring") {
        "on" => Some(param(request, "period").to_string()),
        _ => None,
    };
    state.schedules.push(MockSchedule {
        id,
        project: name.to_string(),
        flow: flow.to_string(),
        date: param(request, "scheduleDate").to_string(),
        time: param(request, "scheduleTime").to_string(),
        period,
    });
    RawResponse::json(&json!({
        "status": "success",
        "message": format!("{}.{} scheduled.", name, flow),
        "scheduleId": id,
    }))
}

fn handle_fetch_execution(state: &mut MockState, request: &RemoteRequest) -> RawResponse {
    let id = exec_id(request);
    let execution = match state.executions.get_mut(&id) {
        Some(execution) => execution,
        None => return error(&format!("Cannot find execution '{}'", id)),
    };
    if execution.is_running() {
        if execution.remaining_polls == 0 {
            execution.finish("SUCCEEDED");
        } else {
            execution.remaining_polls -= 1;
        }
    }
    let nodes: Vec<Value> = execution
        .nodes
        .iter()
        .map(|(id, status)| json!({"id": id, "status": status}))
        .collect();
    RawResponse::json(&json!({
        "execid": execution.id,
        "project": execution.project,
        "flow": execution.flow,
        "status": execution.status,
        "nodes": nodes,
    }))
}

fn handle_logs(state: &MockState, request: &RemoteRequest) -> RawResponse {
    let id = exec_id(request);
    let execution = match state.executions.get(&id) {
        Some(execution) => execution,
        None => return error(&format!("Cannot find execution '{}'", id)),
    };
    let text = match request.get("jobId") {
        Some(job) => match execution.job_logs.get(job) {
            Some(text) => text.as_str(),
            None => return error(&format!("Job {} not found in execution {}", job, id)),
        },
        None => execution.log.as_str(),
    };
    let offset: usize = param(request, "offset").parse().unwrap_or_default();
    let length: usize = param(request, "length").parse().unwrap_or_default();
    let start = offset.min(text.len());
    let end = start.saturating_add(length).min(text.len());
    let data = text.get(start..end).unwrap_or_default();
    RawResponse::json(&json!({"data": data, "offset": start, "length": data.len()}))
}

fn handle_cancel(state: &mut MockState, request: &RemoteRequest) -> RawResponse {
    let id = exec_id(request);
    match state.executions.get_mut(&id) {
        Some(execution) if execution.is_running() => {
            execution.finish("KILLED");
            RawResponse::json(&json!({}))
        }
        Some(_) => error(&format!("Execution {} is not running.", id)),
        None => error(&format!("Cannot find execution '{}'", id)),
    }
}
