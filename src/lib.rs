//! Azkaban project compiler and client
//!
//! Builds Azkaban projects from layered job options, checks their dependency
//! graph, packages them into a reproducible zip archive and talks to an
//! Azkaban server to upload, run and schedule the resulting flows.

pub mod alias;
pub mod archive;
pub mod config;
pub mod job;
pub mod mock;
pub mod options;
pub mod project;
pub mod session;
pub mod signal;

pub use alias::{AliasResolver, Endpoint};
pub use archive::{ArchiveBuilder, ArchiveError, ArchiveSummary};
pub use config::{ConfigError, Settings};
pub use job::{Job, JobHooks};
pub use options::{OptionMerger, Options, OptionsError};
pub use project::{CompiledProject, JobKind, Project, ProjectError};
pub use session::{RetryPolicy, SessionClient, SessionError};
