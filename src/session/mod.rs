//! Remote session client
//!
//! Wraps every remote call with the server's session handling:
//! - log in on demand and cache the token per `user@host:port`
//! - on an expired session, drop the token, log in again and replay the
//!   call exactly once
//! - retry transport failures and malformed replies with exponential backoff
//!
//! Typed helpers (`create_project`, `run_workflow`, ...) sit on top of
//! [`SessionClient::call`].

mod credentials;
mod store;
mod transport;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use azkaban_protocol::ops::{
    parse_login, Concurrency, CreatedProject, ExecutionStarted, ExecutionStatus, FlowJobs,
    LogChunk, ProjectFlows, ScheduleReceipt, UploadReceipt,
};
use azkaban_protocol::response::interpret;
use azkaban_protocol::{Operation, Outcome, ProtocolError, DEFAULT_LOG_CHUNK};
use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;

use crate::alias::Endpoint;
use crate::config::ClientSettings;

pub use credentials::{CredentialSource, PromptCredentials, StaticCredentials, PASSWORD_ENV};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use transport::{HttpTransport, Transport, TransportError};

/// Session client errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("authentication failed for {endpoint}: {reason}")]
    Authentication { endpoint: String, reason: String },

    #[error("session expired for {0}")]
    SessionExpired(String),

    #[error("{operation} failed after {attempts} attempt(s): {reason}")]
    RemoteCall {
        operation: &'static str,
        attempts: u32,
        reason: String,
    },

    #[error("{operation} rejected by server: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    #[error("unknown job(s) in flow '{flow}': {}", .jobs.join(", "))]
    UnknownJobs { flow: String, jobs: Vec<String> },

    #[error("unable to read password: {0}")]
    Credentials(String),

    #[error("interrupted")]
    Cancelled,

    #[error("session store {path}: {reason}")]
    Store {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Delays used between retries and polls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for RetryPolicy {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.retry_initial_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }
}

impl RetryPolicy {
    /// No waiting at all (tests).
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): doubles each time.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Client for one or more Azkaban endpoints
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    store: Box<dyn SessionStore>,
    credentials: Box<dyn CredentialSource>,
    policy: RetryPolicy,
    cancel: Arc<AtomicBool>,
}

impl SessionClient {
    /// Create a client with an in-memory token cache and an interactive
    /// password prompt.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            store: Box::new(MemorySessionStore::new()),
            credentials: Box::new(PromptCredentials),
            policy: RetryPolicy::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_store(mut self, store: Box<dyn SessionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_credentials(mut self, credentials: Box<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Flag checked between retries and polls; once set, calls return
    /// `SessionError::Cancelled`.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cached token for `endpoint`, if any.
    pub fn cached_token(&self, endpoint: &Endpoint) -> Option<String> {
        self.store.get(&endpoint.session_key())
    }

    /// Log in to `endpoint` and cache the new token.
    pub fn login(&mut self, endpoint: &Endpoint) -> Result<String, SessionError> {
        let password = self.credentials.password(endpoint)?;
        let op = Operation::Login {
            user: endpoint.user.clone(),
            password,
        };
        log::info!("logging in to {}", endpoint);

        let auth_error = |reason: String| SessionError::Authentication {
            endpoint: endpoint.to_string(),
            reason,
        };
        let token = match self.send(endpoint, &op, None)? {
            Outcome::Json(value) => parse_login(&value).map_err(|e| auth_error(e.to_string()))?,
            Outcome::Rejected(message) => return Err(auth_error(message)),
            Outcome::Expired => return Err(auth_error("login refused".to_string())),
            Outcome::Text(_) => return Err(auth_error("unexpected login reply".to_string())),
        };

        self.store.put(&endpoint.session_key(), &token)?;
        Ok(token)
    }

    /// Issue `op` against `endpoint` and return the decoded payload.
    ///
    /// Text replies are returned as a JSON string.
    pub fn call(&mut self, endpoint: &Endpoint, op: &Operation) -> Result<Value, SessionError> {
        if !op.requires_session() {
            return self.finish(op, self.send(endpoint, op, None)?);
        }

        let key = endpoint.session_key();
        let mut relogged = false;
        loop {
            let token = match self.store.get(&key) {
                Some(token) => token,
                None => self.login(endpoint)?,
            };
            match self.send(endpoint, op, Some(&token))? {
                Outcome::Expired => {
                    self.store.remove(&key)?;
                    if relogged {
                        return Err(SessionError::Authentication {
                            endpoint: endpoint.to_string(),
                            reason: "session expired again right after logging in".to_string(),
                        });
                    }
                    log::info!("session for {} expired, logging in again", endpoint);
                    relogged = true;
                }
                outcome => return self.finish(op, outcome),
            }
        }
    }

    fn finish(&self, op: &Operation, outcome: Outcome) -> Result<Value, SessionError> {
        match outcome {
            Outcome::Json(value) => Ok(value),
            Outcome::Text(body) => Ok(Value::String(body)),
            Outcome::Rejected(message) => Err(SessionError::Rejected {
                operation: op.name(),
                message,
            }),
            Outcome::Expired => Err(SessionError::SessionExpired(op.name().to_string())),
        }
    }

    /// Send one request, retrying transport failures and malformed replies.
    fn send(
        &self,
        endpoint: &Endpoint,
        op: &Operation,
        token: Option<&str>,
    ) -> Result<Outcome, SessionError> {
        let mut request = op.request();
        if let Some(token) = token {
            request = request.with_session(token);
        }
        let expect = op.expect();
        let attempts = endpoint.attempts.max(1);

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.policy.backoff(attempt - 1);
                log::warn!(
                    "{} failed ({}), retrying in {:?} [{}/{}]",
                    op.name(),
                    last_error,
                    delay,
                    attempt,
                    attempts
                );
                self.pause(delay)?;
            }
            self.check_cancelled()?;

            let result = self
                .transport
                .execute(endpoint, &request)
                .map_err(|e| e.to_string())
                .and_then(|raw| interpret(&raw, &expect).map_err(|e| e.to_string()));
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) => last_error = e,
            }
        }

        Err(SessionError::RemoteCall {
            operation: op.name(),
            attempts,
            reason: last_error,
        })
    }

    fn check_cancelled(&self) -> Result<(), SessionError> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(SessionError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn pause(&self, delay: Duration) -> Result<(), SessionError> {
        self.check_cancelled()?;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.check_cancelled()
    }

    // === Typed operations ===

    pub fn create_project(
        &mut self,
        endpoint: &Endpoint,
        name: &str,
        description: &str,
    ) -> Result<CreatedProject, SessionError> {
        let value = self.call(
            endpoint,
            &Operation::CreateProject {
                name: name.to_string(),
                description: description.to_string(),
            },
        )?;
        Ok(CreatedProject::parse(name, &value))
    }

    pub fn delete_project(&mut self, endpoint: &Endpoint, name: &str) -> Result<(), SessionError> {
        self.call(
            endpoint,
            &Operation::DeleteProject {
                name: name.to_string(),
            },
        )?;
        Ok(())
    }

    /// Upload archive bytes as the new version of `project`.
    pub fn upload_archive(
        &mut self,
        endpoint: &Endpoint,
        project: &str,
        archive: Vec<u8>,
    ) -> Result<UploadReceipt, SessionError> {
        log::info!("uploading {} bytes to project '{}'", archive.len(), project);
        let value = self.call(
            endpoint,
            &Operation::UploadArchive {
                project: project.to_string(),
                archive,
            },
        )?;
        Ok(UploadReceipt::parse(&value)?)
    }

    pub fn project_flows(
        &mut self,
        endpoint: &Endpoint,
        project: &str,
    ) -> Result<ProjectFlows, SessionError> {
        let value = self.call(
            endpoint,
            &Operation::FetchProjectFlows {
                project: project.to_string(),
            },
        )?;
        Ok(ProjectFlows::parse(&value)?)
    }

    pub fn workflow_jobs(
        &mut self,
        endpoint: &Endpoint,
        project: &str,
        flow: &str,
    ) -> Result<FlowJobs, SessionError> {
        let value = self.call(
            endpoint,
            &Operation::FetchFlowJobs {
                project: project.to_string(),
                flow: flow.to_string(),
            },
        )?;
        Ok(FlowJobs::parse(&value)?)
    }

    /// Start `flow`. With `jobs`, only those jobs run: every other job of the
    /// flow is disabled.
    pub fn run_workflow(
        &mut self,
        endpoint: &Endpoint,
        project: &str,
        flow: &str,
        jobs: Option<&[String]>,
        concurrency: Concurrency,
    ) -> Result<ExecutionStarted, SessionError> {
        let disabled = match jobs {
            Some(selected) if !selected.is_empty() => {
                let all: BTreeSet<String> =
                    self.workflow_jobs(endpoint, project, flow)?.job_names().into_iter().collect();
                let unknown: Vec<String> = selected
                    .iter()
                    .filter(|job| !all.contains(*job))
                    .cloned()
                    .collect();
                if !unknown.is_empty() {
                    return Err(SessionError::UnknownJobs {
                        flow: flow.to_string(),
                        jobs: unknown,
                    });
                }
                let selected: BTreeSet<&String> = selected.iter().collect();
                all.iter().filter(|job| !selected.contains(job)).cloned().collect()
            }
            _ => Vec::new(),
        };

        log::info!(
            "running flow '{}' of project '{}' ({} job(s) disabled)",
            flow,
            project,
            disabled.len()
        );
        let value = self.call(
            endpoint,
            &Operation::ExecuteFlow {
                project: project.to_string(),
                flow: flow.to_string(),
                disabled,
                concurrency,
            },
        )?;
        Ok(ExecutionStarted::parse(&value)?)
    }

    /// Schedule `flow` at `date` `time` (UTC), optionally recurring every
    /// `period` (e.g. `1d`).
    pub fn schedule_workflow(
        &mut self,
        endpoint: &Endpoint,
        project: &str,
        flow: &str,
        date: NaiveDate,
        time: NaiveTime,
        period: Option<String>,
    ) -> Result<ScheduleReceipt, SessionError> {
        let project_id = self.project_flows(endpoint, project)?.project_id;
        let value = self.call(
            endpoint,
            &Operation::ScheduleFlow {
                project: project.to_string(),
                project_id,
                flow: flow.to_string(),
                date,
                time,
                period,
            },
        )?;
        Ok(ScheduleReceipt::parse(&value))
    }

    pub fn execution_status(
        &mut self,
        endpoint: &Endpoint,
        exec_id: u64,
    ) -> Result<ExecutionStatus, SessionError> {
        let value = self.call(endpoint, &Operation::FetchExecution { exec_id })?;
        Ok(ExecutionStatus::parse(&value)?)
    }

    pub fn cancel_execution(&mut self, endpoint: &Endpoint, exec_id: u64) -> Result<(), SessionError> {
        self.call(endpoint, &Operation::CancelExecution { exec_id })?;
        Ok(())
    }

    /// Stream the log of an execution (or of one of its jobs) to `on_chunk`
    /// until it stops running. Returns the final status.
    pub fn fetch_execution_log(
        &mut self,
        endpoint: &Endpoint,
        exec_id: u64,
        job: Option<&str>,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<ExecutionStatus, SessionError> {
        let mut offset = 0;
        loop {
            let status = self.execution_status(endpoint, exec_id)?;
            let running = status.is_running(job);
            offset = self.drain_log(endpoint, exec_id, job, offset, &mut on_chunk)?;
            if !running {
                log::debug!("execution {} finished with {}", exec_id, status.status);
                return Ok(status);
            }
            self.pause(self.policy.poll_interval)?;
        }
    }

    fn drain_log(
        &mut self,
        endpoint: &Endpoint,
        exec_id: u64,
        job: Option<&str>,
        mut offset: u64,
        on_chunk: &mut impl FnMut(&str),
    ) -> Result<u64, SessionError> {
        loop {
            self.check_cancelled()?;
            let value = self.call(
                endpoint,
                &Operation::FetchLogs {
                    exec_id,
                    job: job.map(str::to_string),
                    offset,
                    length: DEFAULT_LOG_CHUNK,
                },
            )?;
            let chunk = LogChunk::parse(&value)?;
            if chunk.length == 0 || chunk.data.is_empty() {
                return Ok(offset);
            }
            on_chunk(&chunk.data);
            offset = chunk.offset + chunk.length;
        }
    }
}
