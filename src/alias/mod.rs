//! Endpoint aliases
//!
//! Parses the alias store at `~/.config/azkaban/aliases.toml` and resolves
//! the endpoint a command talks to:
//!
//! ```toml
//! [alias.prod]
//! url = "https://azkaban.example.com:8443"
//! user = "etl"
//! verify = true
//! attempts = 3
//! default = true
//! ```
//!
//! An explicit URL wins over a named alias, which wins over the default
//! alias.

use std::collections::BTreeMap;
use std::path::Path;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::{self, ConfigError, ALIASES_FILE};

/// Alias store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasFile {
    #[serde(default, rename = "alias")]
    pub aliases: BTreeMap<String, AliasEntry>,
}

/// A single alias
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AliasEntry {
    /// Server URL, optionally prefixed with `user@`
    pub url: String,

    /// User to log in as (overridden by a user embedded in `url`)
    pub user: Option<String>,

    /// Verify the server's TLS certificate (default: true)
    #[serde(default = "default_verify")]
    pub verify: bool,

    /// Attempts per remote call before giving up (default: 3)
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Use this alias when neither a URL nor an alias is given
    #[serde(default)]
    pub default: bool,
}

fn default_verify() -> bool {
    true
}

fn default_attempts() -> u32 {
    3
}

/// A resolved server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Base URL without trailing slash
    pub url: String,
    pub user: String,
    pub verify: bool,
    pub attempts: u32,
}

impl Endpoint {
    /// Parse `[user@]url`. Without an embedded user, `fallback_user` is used.
    pub fn parse(raw: &str, fallback_user: Option<&str>) -> Result<Self, ConfigError> {
        let malformed = |reason: &str| ConfigError::MalformedUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim().trim_end_matches('/');
        let parts: Vec<&str> = trimmed.split('@').collect();
        let (user, url) = match parts.as_slice() {
            [url] => (fallback_user.map(str::to_string), *url),
            [user, url] if !user.is_empty() => (Some(user.to_string()), *url),
            [_, _] => return Err(malformed("empty user")),
            _ => return Err(malformed("more than one '@'")),
        };

        let parsed = Url::parse(url).map_err(|e| malformed(&e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(malformed("scheme must be http or https"));
        }
        if parsed.host_str().is_none() {
            return Err(malformed("missing host"));
        }

        let user = user.or_else(current_user).ok_or_else(|| ConfigError::InvalidValue {
            context: format!("endpoint '{}'", raw),
            field: "user".to_string(),
            reason: "no user in url and none could be determined".to_string(),
        })?;

        Ok(Self {
            url: url.to_string(),
            user,
            verify: true,
            attempts: default_attempts(),
        })
    }

    /// Key under which this endpoint's session is cached: `user@host:port`.
    pub fn session_key(&self) -> String {
        match Url::parse(&self.url) {
            Ok(url) => {
                let host = url.host_str().unwrap_or_default();
                let path = url.path().trim_end_matches('/');
                match url.port_or_known_default() {
                    Some(port) => format!("{}@{}:{}{}", self.user, host, port, path),
                    None => format!("{}@{}{}", self.user, host, path),
                }
            }
            Err(_) => format!("{}@{}", self.user, self.url),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.url)
    }
}

/// The user running the CLI.
pub fn current_user() -> Option<String> {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|user| !user.is_empty())
}

/// Resolves endpoints from the alias store
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    aliases: BTreeMap<String, AliasEntry>,
    fallback_user: Option<String>,
}

impl AliasResolver {
    /// Load the alias store at `path`; a missing file means no aliases.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match config::read_optional(path)? {
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

    /// Load `aliases.toml` from the configuration directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Self::load(&dir.join(ALIASES_FILE))
    }

    /// Parse the alias store from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: AliasFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: ALIASES_FILE.into(),
            source,
        })?;
        Self::from_aliases(file.aliases)
    }

    /// Build a resolver from entries, validating them.
    pub fn from_aliases(aliases: BTreeMap<String, AliasEntry>) -> Result<Self, ConfigError> {
        let mut default: Option<&String> = None;
        for (name, entry) in &aliases {
            if entry.default {
                if let Some(first) = default {
                    return Err(ConfigError::MultipleDefaults {
                        first: first.clone(),
                        second: name.clone(),
                    });
                }
                default = Some(name);
            }
            entry.validate(name)?;
        }
        Ok(Self {
            aliases,
            fallback_user: None,
        })
    }

    /// User for endpoints that do not name one (defaults to the OS user).
    pub fn with_fallback_user(mut self, user: impl Into<String>) -> Self {
        self.fallback_user = Some(user.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&AliasEntry> {
        self.aliases.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.aliases.keys().map(String::as_str)
    }

    /// Name of the alias marked default, if any.
    pub fn default_alias(&self) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(_, entry)| entry.default)
            .map(|(name, _)| name.as_str())
    }

    /// Resolve the endpoint for a command.
    pub fn resolve(&self, url: Option<&str>, alias: Option<&str>) -> Result<Endpoint, ConfigError> {
        if let Some(url) = url {
            log::debug!("using explicit endpoint {}", url);
            return Endpoint::parse(url, self.fallback_user.as_deref());
        }

        let name = match alias {
            Some(name) => name,
            None => self.default_alias().ok_or(ConfigError::NoEndpoint)?,
        };
        let entry = self
            .aliases
            .get(name)
            .ok_or_else(|| ConfigError::UnknownAlias(name.to_string()))?;
        log::debug!("using alias '{}' ({})", name, entry.url);

        let fallback = entry.user.as_deref().or(self.fallback_user.as_deref());
        let mut endpoint = Endpoint::parse(&entry.url, fallback)?;
        endpoint.verify = entry.verify;
        endpoint.attempts = entry.attempts;
        Ok(endpoint)
    }
}

impl AliasEntry {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.attempts == 0 {
            return Err(ConfigError::InvalidValue {
                context: format!("alias '{}'", name),
                field: "attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Endpoint::parse(&self.url, Some(self.user.as_deref().unwrap_or("-")))?;
        Ok(())
    }
}
