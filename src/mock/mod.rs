//! Mock Azkaban server
//!
//! An in-process implementation of the AJAX endpoints the client uses, for
//! tests that exercise the session client without a network. It implements
//! [`Transport`](crate::session::Transport) directly.
//!
//! # Behaviour
//!
//! - `login`: checks registered users, hands out session tokens
//! - requests without a known token get the HTML login page
//! - `upload_archive`: unpacks the zip and records its jobs
//! - `execute_flow`: starts an execution that finishes after a configurable
//!   number of status polls
//! - `fetch_logs`: serves slices of the execution log
//!
//! Failures can be injected per operation name with [`FailureConfig`].

mod failure;
mod server;
mod state;

pub use failure::{FailureConfig, FailureInjector, FailureKind};
pub use server::MockAzkaban;
pub use state::{read_archive, MockExecution, MockJob, MockProject, MockSchedule, MockState};
