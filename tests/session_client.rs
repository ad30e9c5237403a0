//! Session Client Tests
//!
//! Drives `SessionClient` against the in-process mock server: login caching,
//! re-authentication on expiry, transport retries and the typed operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use azkaban_cli::alias::Endpoint;
use azkaban_cli::archive::ArchiveBuilder;
use azkaban_cli::job::Job;
use azkaban_cli::mock::{FailureConfig, MockAzkaban};
use azkaban_cli::project::Project;
use azkaban_cli::session::{
    FileSessionStore, MemorySessionStore, RetryPolicy, SessionClient, SessionError,
    SessionStore, StaticCredentials,
};
use azkaban_protocol::ops::Concurrency;
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use tempfile::TempDir;

const PASSWORD: &str = "s3cret";

fn endpoint() -> Endpoint {
    Endpoint::parse("etl@http://azkaban.test:8081", None).unwrap()
}

fn server() -> MockAzkaban {
    MockAzkaban::new().with_user("etl", PASSWORD)
}

fn client(server: &MockAzkaban) -> SessionClient {
    SessionClient::new(Arc::new(server.clone()))
        .with_credentials(Box::new(StaticCredentials::new(PASSWORD)))
        .with_policy(RetryPolicy::immediate())
}

/// extract <- transform <- load, plus a standalone report job
fn archive() -> Vec<u8> {
    let mut project = Project::new("etl");
    let jobs = [
        ("extract", json!({"type": "command", "command": "echo extract"})),
        (
            "transform",
            json!({"type": "command", "command": "echo transform", "dependencies": "extract"}),
        ),
        (
            "load",
            json!({"type": "command", "command": "echo load", "dependencies": "transform"}),
        ),
        ("report", json!({"type": "command", "command": "echo report"})),
    ];
    for (name, options) in jobs {
        project
            .add_job(name, Job::from_options(options).unwrap())
            .unwrap();
    }
    let compiled = project.build().unwrap();
    ArchiveBuilder::new(&compiled).build_bytes().unwrap()
}

fn deployed(server: &MockAzkaban, client: &mut SessionClient) {
    client.create_project(&endpoint(), "etl", "nightly etl").unwrap();
    client.upload_archive(&endpoint(), "etl", archive()).unwrap();
    assert!(server.project("etl").is_some());
}

// =============================================================================
// Sessions
// =============================================================================

#[test]
fn test_one_login_serves_two_calls() {
    let server = server();
    let mut client = client(&server);

    client.create_project(&endpoint(), "first", "").unwrap();
    client.create_project(&endpoint(), "second", "").unwrap();

    assert_eq!(server.login_count(), 1, "token should be reused");
    assert!(client.cached_token(&endpoint()).is_some());
}

#[test]
fn test_expired_session_relogs_exactly_once() {
    let server = server();
    let mut client = client(&server);
    client.create_project(&endpoint(), "first", "").unwrap();
    let old_token = client.cached_token(&endpoint()).unwrap();

    server.expire_sessions();
    client.create_project(&endpoint(), "second", "").unwrap();

    assert_eq!(server.login_count(), 2);
    assert_ne!(client.cached_token(&endpoint()).unwrap(), old_token);
    assert_eq!(
        server.requests(),
        vec!["login", "create_project", "create_project", "login", "create_project"]
    );
}

#[test]
fn test_second_expiry_is_authentication_error() {
    let server = server();
    let mut client = client(&server);
    server.inject_failure("create_project", FailureConfig::expired());

    let err = client.create_project(&endpoint(), "etl", "").unwrap_err();

    assert!(
        matches!(err, SessionError::Authentication { .. }),
        "expected Authentication, got {:?}",
        err
    );
    assert_eq!(server.login_count(), 2);
    assert!(client.cached_token(&endpoint()).is_none());
}

#[test]
fn test_wrong_password_is_not_cached() {
    let server = server();
    let mut client = SessionClient::new(Arc::new(server.clone()))
        .with_credentials(Box::new(StaticCredentials::new("wrong")))
        .with_policy(RetryPolicy::immediate());

    let err = client.create_project(&endpoint(), "etl", "").unwrap_err();

    assert!(matches!(err, SessionError::Authentication { .. }));
    assert!(client.cached_token(&endpoint()).is_none());
    assert!(server.project("etl").is_none());
}

#[test]
fn test_file_store_shares_token_between_clients() {
    let dir = TempDir::new().unwrap();
    let server = server();

    let mut first = client(&server).with_store(Box::new(FileSessionStore::open_in_dir(dir.path())));
    first.create_project(&endpoint(), "etl", "").unwrap();

    let mut second =
        client(&server).with_store(Box::new(FileSessionStore::open_in_dir(dir.path())));
    second.delete_project(&endpoint(), "etl").unwrap();

    assert_eq!(server.login_count(), 1, "second client should reuse the stored token");
}

#[test]
fn test_stored_token_skips_login() {
    let server = server();
    server.add_session("tok-preloaded");
    let mut store = MemorySessionStore::new();
    store
        .put(&endpoint().session_key(), "tok-preloaded")
        .unwrap();
    let mut client = client(&server).with_store(Box::new(store));

    client.create_project(&endpoint(), "etl", "").unwrap();

    assert_eq!(server.login_count(), 0);
    assert_eq!(server.requests(), vec!["create_project"]);
}

// =============================================================================
// Retries
// =============================================================================

#[test]
fn test_transport_failure_is_retried() {
    let server = server();
    let mut client = client(&server);
    server.inject_failure("create_project", FailureConfig::transport().with_fail_count(2));

    client.create_project(&endpoint(), "etl", "").unwrap();

    assert!(server.project("etl").is_some());
    assert_eq!(server.login_count(), 1, "retries must not drop the session");
}

#[test]
fn test_retries_are_bounded_by_attempts() {
    let server = server();
    let mut client = client(&server);
    server.inject_failure("fetch_project_flows", FailureConfig::malformed());

    let err = client.project_flows(&endpoint(), "etl").unwrap_err();

    match err {
        SessionError::RemoteCall {
            operation,
            attempts,
            ..
        } => {
            assert_eq!(operation, "fetch_project_flows");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected RemoteCall, got {:?}", other),
    }
    let calls = server
        .requests()
        .iter()
        .filter(|op| *op == "fetch_project_flows")
        .count();
    assert_eq!(calls, 3);
}

#[test]
fn test_server_error_status_is_retried() {
    let server = server();
    let mut client = client(&server);
    server.inject_failure("create_project", FailureConfig::status(503).with_fail_count(1));

    assert!(client.create_project(&endpoint(), "etl", "").is_ok());
}

#[test]
fn test_cleared_failures_no_longer_fire() {
    let server = server();
    let mut client = client(&server);
    server.inject_failure("create_project", FailureConfig::malformed());
    server.clear_failures();

    client.create_project(&endpoint(), "etl", "").unwrap();

    assert_eq!(
        server.requests(),
        vec!["login", "create_project"],
        "no retry after clearing"
    );
}

#[test]
fn test_rejection_is_not_retried() {
    let server = server();
    let mut client = client(&server);
    client.create_project(&endpoint(), "etl", "").unwrap();

    let err = client.create_project(&endpoint(), "etl", "").unwrap_err();

    match err {
        SessionError::Rejected { operation, message } => {
            assert_eq!(operation, "create_project");
            assert!(message.contains("already exists"));
        }
        other => panic!("expected Rejected, got {:?}", other),
    }
    let creates = server
        .requests()
        .iter()
        .filter(|op| *op == "create_project")
        .count();
    assert_eq!(creates, 2);
}

#[test]
fn test_cancel_flag_stops_calls() {
    let server = server();
    let cancel = Arc::new(AtomicBool::new(false));
    let mut client = client(&server).with_cancel_flag(Arc::clone(&cancel));

    cancel.store(true, Ordering::SeqCst);
    let err = client.create_project(&endpoint(), "etl", "").unwrap_err();

    assert!(matches!(err, SessionError::Cancelled));
    assert!(server.project("etl").is_none());
}

// =============================================================================
// Typed operations
// =============================================================================

#[test]
fn test_upload_then_list_flows() {
    let server = server();
    let mut client = client(&server);
    deployed(&server, &mut client);

    let flows = client.project_flows(&endpoint(), "etl").unwrap();
    assert_eq!(flows.flows, vec!["load", "report"]);

    let jobs = client.workflow_jobs(&endpoint(), "etl", "load").unwrap();
    let mut names = jobs.job_names();
    names.sort();
    assert_eq!(names, vec!["extract", "load", "transform"]);
}

#[test]
fn test_upload_bumps_version() {
    let server = server();
    let mut client = client(&server);
    deployed(&server, &mut client);

    let receipt = client.upload_archive(&endpoint(), "etl", archive()).unwrap();

    assert_eq!(receipt.version, "2");
    assert_eq!(server.project("etl").unwrap().version, 2);
}

#[test]
fn test_upload_of_invalid_archive_is_rejected() {
    let server = server();
    let mut client = client(&server);
    client.create_project(&endpoint(), "etl", "").unwrap();

    let err = client
        .upload_archive(&endpoint(), "etl", b"not a zip".to_vec())
        .unwrap_err();

    assert!(matches!(err, SessionError::Rejected { .. }));
}

#[test]
fn test_run_subset_disables_other_jobs() {
    let server = server();
    let mut client = client(&server);
    deployed(&server, &mut client);

    let selected = vec!["transform".to_string()];
    let started = client
        .run_workflow(&endpoint(), "etl", "load", Some(&selected), Concurrency::Concurrent)
        .unwrap();

    let execution = server.execution(started.exec_id).unwrap();
    assert_eq!(execution.nodes["transform"], "RUNNING");
    assert_eq!(execution.nodes["extract"], "DISABLED");
    assert_eq!(execution.nodes["load"], "DISABLED");
}

#[test]
fn test_run_unknown_job_fails_before_executing() {
    let server = server();
    let mut client = client(&server);
    deployed(&server, &mut client);

    let selected = vec!["transform".to_string(), "report".to_string()];
    let err = client
        .run_workflow(&endpoint(), "etl", "load", Some(&selected), Concurrency::Concurrent)
        .unwrap_err();

    match err {
        SessionError::UnknownJobs { flow, jobs } => {
            assert_eq!(flow, "load");
            assert_eq!(jobs, vec!["report"]);
        }
        other => panic!("expected UnknownJobs, got {:?}", other),
    }
    assert!(!server.requests().iter().any(|op| op == "execute_flow"));
}

#[test]
fn test_fetch_execution_log_until_finished() {
    let server = server().with_polls_per_execution(2);
    let mut client = client(&server);
    deployed(&server, &mut client);

    let started = client
        .run_workflow(&endpoint(), "etl", "load", None, Concurrency::Concurrent)
        .unwrap();

    let mut log = String::new();
    let status = client
        .fetch_execution_log(&endpoint(), started.exec_id, None, |chunk| log.push_str(chunk))
        .unwrap();

    assert_eq!(status.status, "SUCCEEDED");
    assert!(log.contains("Running job extract"));
    assert!(log.contains("finished: SUCCEEDED"));
    assert_eq!(log.matches("Running job load").count(), 1, "no chunk twice");
}

#[test]
fn test_log_quoting_login_error_is_not_expiry() {
    let server = server().with_polls_per_execution(1);
    let mut client = client(&server);
    deployed(&server, &mut client);
    let started = client
        .run_workflow(&endpoint(), "etl", "report", None, Concurrency::Concurrent)
        .unwrap();
    server.append_log(
        started.exec_id,
        "db: Login error for user etl\n<!-- /.login -->\n",
    );

    let mut log = String::new();
    let status = client
        .fetch_execution_log(&endpoint(), started.exec_id, None, |chunk| log.push_str(chunk))
        .unwrap();

    assert_eq!(status.status, "SUCCEEDED");
    assert!(log.contains("db: Login error for user etl"));
    assert_eq!(server.login_count(), 1, "log text must not trigger a re-login");
}

#[test]
fn test_cancel_execution() {
    let server = server().with_polls_per_execution(10);
    let mut client = client(&server);
    deployed(&server, &mut client);
    let started = client
        .run_workflow(&endpoint(), "etl", "report", None, Concurrency::Concurrent)
        .unwrap();

    client.cancel_execution(&endpoint(), started.exec_id).unwrap();

    let status = client.execution_status(&endpoint(), started.exec_id).unwrap();
    assert_eq!(status.status, "KILLED");
    assert!(client.cancel_execution(&endpoint(), started.exec_id).is_err());
}

#[test]
fn test_schedule_workflow() {
    let server = server();
    let mut client = client(&server);
    deployed(&server, &mut client);

    let receipt = client
        .schedule_workflow(
            &endpoint(),
            "etl",
            "load",
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
            Some("1d".to_string()),
        )
        .unwrap();

    assert!(receipt.schedule_id.is_some());
    let schedules = server.schedules();
    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0].flow, "load");
    assert_eq!(schedules[0].date, "03/01/2026");
    assert_eq!(schedules[0].time, "02,30,PM,UTC");
    assert_eq!(schedules[0].period.as_deref(), Some("1d"));
}

#[test]
fn test_delete_project() {
    let server = server();
    let mut client = client(&server);
    deployed(&server, &mut client);

    client.delete_project(&endpoint(), "etl").unwrap();
    assert!(server.project("etl").is_none());

    let err = client.delete_project(&endpoint(), "etl").unwrap_err();
    assert!(matches!(err, SessionError::Rejected { .. }));
}
