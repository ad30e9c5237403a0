//! Failure injection for the mock server
//!
//! Failures are keyed by operation name (as reported by
//! `Operation::name()`, e.g. `"upload_archive"`).

use std::collections::HashMap;

/// How a request fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The connection cannot be established.
    Transport,
    /// The server answers with this HTTP status.
    Status(u16),
    /// The server answers 200 with a body that is not JSON.
    Malformed,
    /// The server answers with its login page, as for a stale session.
    Expired,
    /// The server answers with a JSON `error`.
    Rejected(String),
}

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    pub kind: FailureKind,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            fail_count: None,
        }
    }

    pub fn transport() -> Self {
        Self::new(FailureKind::Transport)
    }

    pub fn status(status: u16) -> Self {
        Self::new(FailureKind::Status(status))
    }

    pub fn malformed() -> Self {
        Self::new(FailureKind::Malformed)
    }

    pub fn expired() -> Self {
        Self::new(FailureKind::Expired)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected(message.into()))
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Failure injector for the mock server
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<String, FailureConfig>,
    call_counts: HashMap<String, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for an operation
    pub fn inject(&mut self, op: &str, config: FailureConfig) {
        self.configs.insert(op.to_string(), config);
        self.call_counts.insert(op.to_string(), 0);
    }

    /// Clear all failure injections
    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    /// The failure to apply to this call of `op`, if any.
    pub fn check(&mut self, op: &str) -> Option<FailureKind> {
        let config = self.configs.get(op)?;
        let count = self.call_counts.entry(op.to_string()).or_insert(0);
        *count += 1;
        match config.fail_count {
            Some(limit) if *count > limit => None,
            _ => Some(config.kind.clone()),
        }
    }
}
