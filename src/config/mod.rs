//! Client configuration
//!
//! Everything the CLI keeps between runs lives in one directory
//! (`$AZKABAN_CONFIG_DIR`, or `~/.config/azkaban`):
//! - `aliases.toml`: named endpoints (see [`crate::alias`])
//! - `sessions.toml`: cached session tokens (see [`crate::session`])
//! - `config.toml`: client settings (this module)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "AZKABAN_CONFIG_DIR";

pub const ALIASES_FILE: &str = "aliases.toml";
pub const SESSIONS_FILE: &str = "sessions.toml";
pub const SETTINGS_FILE: &str = "config.toml";

/// Errors raised while reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no endpoint: pass --url or --alias, or mark an alias as default")]
    NoEndpoint,

    #[error("alias not found: '{0}'")]
    UnknownAlias(String),

    #[error("aliases '{first}' and '{second}' are both marked as default")]
    MultipleDefaults { first: String, second: String },

    #[error("malformed url '{url}': {reason}")]
    MalformedUrl { url: String, reason: String },

    #[error("{context}: invalid value for '{field}': {reason}")]
    InvalidValue {
        context: String,
        field: String,
        reason: String,
    },

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Locate the configuration directory.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var_os("HOME").ok_or_else(|| ConfigError::Io {
        path: PathBuf::from("~"),
        source: std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "HOME environment variable not set",
        ),
    })?;
    Ok(PathBuf::from(home).join(".config").join("azkaban"))
}

/// Read a TOML file, treating a missing file as absent.
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Client settings from `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub client: ClientSettings,
}

/// `[client]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSettings {
    /// Delay between two polls of a running execution
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before the first transport retry (doubles each attempt)
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// HTTP request timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_retry_initial_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    8000
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Settings {
    /// Load settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match read_optional(path)? {
            Some(content) => Self::parse(&content).map_err(|e| match e {
                ConfigError::Parse { source, .. } => ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                },
                other => other,
            }),
            None => Ok(Self::default()),
        }
    }

    /// Load `config.toml` from the configuration directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Self::load(&dir.join(SETTINGS_FILE))
    }

    /// Parse settings from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from(SETTINGS_FILE),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let client = &self.client;
        if client.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                context: "[client]".to_string(),
                field: "timeout_seconds".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if client.retry_max_delay_ms < client.retry_initial_delay_ms {
            return Err(ConfigError::InvalidValue {
                context: "[client]".to_string(),
                field: "retry_max_delay_ms".to_string(),
                reason: "must not be lower than retry_initial_delay_ms".to_string(),
            });
        }
        Ok(())
    }
}
