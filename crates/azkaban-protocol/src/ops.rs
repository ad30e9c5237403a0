//! Remote operations and their typed replies.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::request::{Method, RemoteRequest, Resource, Upload};
use crate::response::Expect;

/// Concurrency policy when a flow is already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Concurrency {
    /// Run alongside the existing execution.
    #[default]
    Concurrent,
    /// Do not start if the flow is already running.
    Skip,
    /// Run after the existing execution finishes.
    Pipeline,
}

impl Concurrency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concurrent => "concurrent",
            Self::Skip => "skip",
            Self::Pipeline => "pipeline",
        }
    }
}

/// A remote operation with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Login {
        user: String,
        password: String,
    },
    CreateProject {
        name: String,
        description: String,
    },
    DeleteProject {
        name: String,
    },
    UploadArchive {
        project: String,
        archive: Vec<u8>,
    },
    FetchFlowJobs {
        project: String,
        flow: String,
    },
    FetchProjectFlows {
        project: String,
    },
    ExecuteFlow {
        project: String,
        flow: String,
        disabled: Vec<String>,
        concurrency: Concurrency,
    },
    ScheduleFlow {
        project: String,
        project_id: String,
        flow: String,
        date: NaiveDate,
        time: NaiveTime,
        period: Option<String>,
    },
    FetchExecution {
        exec_id: u64,
    },
    FetchLogs {
        exec_id: u64,
        job: Option<String>,
        offset: u64,
        length: u64,
    },
    CancelExecution {
        exec_id: u64,
    },
}

impl Operation {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::CreateProject { .. } => "create_project",
            Self::DeleteProject { .. } => "delete_project",
            Self::UploadArchive { .. } => "upload_archive",
            Self::FetchFlowJobs { .. } => "fetch_flow_jobs",
            Self::FetchProjectFlows { .. } => "fetch_project_flows",
            Self::ExecuteFlow { .. } => "execute_flow",
            Self::ScheduleFlow { .. } => "schedule_flow",
            Self::FetchExecution { .. } => "fetch_execution",
            Self::FetchLogs { .. } => "fetch_logs",
            Self::CancelExecution { .. } => "cancel_execution",
        }
    }

    /// Whether the request must carry a session token.
    pub fn requires_session(&self) -> bool {
        !matches!(self, Self::Login { .. })
    }

    /// Shape of a successful reply.
    pub fn expect(&self) -> Expect {
        match self {
            Self::DeleteProject { name } => Expect::Text {
                marker: format!("Project '{}' was successfully deleted", name),
            },
            _ => Expect::Json,
        }
    }

    /// Build the HTTP request for this operation, without session token.
    pub fn request(&self) -> RemoteRequest {
        match self {
            Self::Login { user, password } => RemoteRequest::new(Method::Post, Resource::Root)
                .param("action", "login")
                .param("username", user)
                .param("password", password),
            Self::CreateProject { name, description } => {
                RemoteRequest::new(Method::Post, Resource::Manager)
                    .param("action", "create")
                    .param("name", name)
                    .param("description", description)
            }
            Self::DeleteProject { name } => RemoteRequest::new(Method::Get, Resource::Manager)
                .param("project", name)
                .param("delete", "true"),
            Self::UploadArchive { project, archive } => {
                RemoteRequest::new(Method::Post, Resource::Manager)
                    .param("ajax", "upload")
                    .param("project", project)
                    .upload(Upload {
                        field: "file".to_string(),
                        file_name: "file.zip".to_string(),
                        content_type: "application/zip".to_string(),
                        bytes: archive.clone(),
                    })
            }
            Self::FetchFlowJobs { project, flow } => {
                RemoteRequest::new(Method::Get, Resource::Manager)
                    .param("ajax", "fetchflowjobs")
                    .param("project", project)
                    .param("flow", flow)
            }
            Self::FetchProjectFlows { project } => {
                RemoteRequest::new(Method::Get, Resource::Manager)
                    .param("ajax", "fetchprojectflows")
                    .param("project", project)
            }
            Self::ExecuteFlow {
                project,
                flow,
                disabled,
                concurrency,
            } => RemoteRequest::new(Method::Post, Resource::Executor)
                .param("ajax", "executeFlow")
                .param("project", project)
                .param("flow", flow)
                .param("disabled", disabled_list(disabled))
                .param("concurrentOption", concurrency.as_str()),
            Self::ScheduleFlow {
                project,
                project_id,
                flow,
                date,
                time,
                period,
            } => {
                let request = RemoteRequest::new(Method::Post, Resource::Schedule)
                    .param("ajax", "scheduleFlow")
                    .param("projectName", project)
                    .param("projectId", project_id)
                    .param("flow", flow)
                    .param("scheduleTime", schedule_time(time))
                    .param("scheduleDate", date.format("%m/%d/%Y").to_string());
                match period {
                    Some(period) => request.param("is_recurring", "on").param("period", period),
                    None => request.param("is_recurring", "off"),
                }
            }
            Self::FetchExecution { exec_id } => RemoteRequest::new(Method::Get, Resource::Executor)
                .param("ajax", "fetchexecflow")
                .param("execid", exec_id.to_string()),
            Self::FetchLogs {
                exec_id,
                job,
                offset,
                length,
            } => {
                let request = RemoteRequest::new(Method::Get, Resource::Executor);
                let request = match job {
                    Some(job) => request
                        .param("ajax", "fetchExecJobLogs")
                        .param("jobId", job),
                    None => request.param("ajax", "fetchExecFlowLogs"),
                };
                request
                    .param("execid", exec_id.to_string())
                    .param("offset", offset.to_string())
                    .param("length", length.to_string())
            }
            Self::CancelExecution { exec_id } => {
                RemoteRequest::new(Method::Get, Resource::Executor)
                    .param("ajax", "cancelFlow")
                    .param("execid", exec_id.to_string())
            }
        }
    }
}

/// `["a","b"]` as the executor expects it.
fn disabled_list(jobs: &[String]) -> String {
    Value::from(jobs.to_vec()).to_string()
}

/// `hh,mm,AM,UTC`
fn schedule_time(time: &NaiveTime) -> String {
    format!("{},{},UTC", time.format("%I,%M"), time.format("%p"))
}

/// Read a field that the server sends either as a string or a number.
fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Token returned by a successful login.
pub fn parse_login(value: &Value) -> Result<String, ProtocolError> {
    text_field(value, "session.id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProtocolError::payload("login", "missing session.id"))
}

/// Reply to a project creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedProject {
    pub name: String,
    /// Server-side location of the new project page.
    pub path: Option<String>,
}

impl CreatedProject {
    pub fn parse(name: &str, value: &Value) -> Self {
        Self {
            name: name.to_string(),
            path: text_field(value, "path"),
        }
    }
}

/// Reply to an archive upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub project_id: String,
    pub version: String,
}

impl UploadReceipt {
    pub fn parse(value: &Value) -> Result<Self, ProtocolError> {
        Ok(Self {
            project_id: text_field(value, "projectId")
                .ok_or_else(|| ProtocolError::payload("upload_archive", "missing projectId"))?,
            version: text_field(value, "version")
                .ok_or_else(|| ProtocolError::payload("upload_archive", "missing version"))?,
        })
    }
}

/// One job node of a remote flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type", default)]
    pub job_type: Option<String>,
    #[serde(rename = "in", default)]
    pub dependencies: Vec<String>,
}

/// Jobs of a remote flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowJobs {
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
}

impl FlowJobs {
    pub fn parse(value: &Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ProtocolError::payload("fetch_flow_jobs", e.to_string()))
    }

    /// Names of all jobs in the flow.
    pub fn job_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }
}

/// Flows of a remote project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFlows {
    pub project_id: String,
    pub flows: Vec<String>,
}

impl ProjectFlows {
    pub fn parse(value: &Value) -> Result<Self, ProtocolError> {
        let project_id = text_field(value, "projectId")
            .ok_or_else(|| ProtocolError::payload("fetch_project_flows", "missing projectId"))?;
        let flows = value
            .get("flows")
            .and_then(Value::as_array)
            .map(|flows| {
                flows
                    .iter()
                    .filter_map(|f| text_field(f, "flowId"))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self { project_id, flows })
    }
}

/// Reply to a flow execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStarted {
    pub exec_id: u64,
}

impl ExecutionStarted {
    pub fn parse(value: &Value) -> Result<Self, ProtocolError> {
        let exec_id = text_field(value, "execid")
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| ProtocolError::payload("execute_flow", "missing execid"))?;
        Ok(Self { exec_id })
    }
}

/// Reply to a schedule request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReceipt {
    /// Only reported by recent server versions.
    pub schedule_id: Option<String>,
    pub message: Option<String>,
}

impl ScheduleReceipt {
    pub fn parse(value: &Value) -> Self {
        Self {
            schedule_id: text_field(value, "scheduleId"),
            message: text_field(value, "message"),
        }
    }
}

/// Status of one job inside an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: String,
    pub status: String,
}

/// Status of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub status: String,
    #[serde(default)]
    pub nodes: Vec<NodeStatus>,
}

/// Execution states after which no more log output is produced.
const TERMINAL_STATES: &[&str] = &["SUCCEEDED", "FAILED", "KILLED", "CANCELLED", "SKIPPED"];

impl ExecutionStatus {
    pub fn parse(value: &Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ProtocolError::payload("fetch_execution", e.to_string()))
    }

    /// Whether the execution (or the given job) may still produce output.
    pub fn is_running(&self, job: Option<&str>) -> bool {
        let status = match job {
            Some(job) => match self.nodes.iter().find(|n| n.id == job) {
                Some(node) => node.status.as_str(),
                None => return false,
            },
            None => self.status.as_str(),
        };
        !TERMINAL_STATES.contains(&status)
    }
}

/// A slice of an execution log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub length: u64,
}

impl LogChunk {
    pub fn parse(value: &Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ProtocolError::payload("fetch_logs", e.to_string()))
    }
}
