//! Session token storage
//!
//! Tokens are keyed by [`Endpoint::session_key`](crate::alias::Endpoint::session_key).
//! The file store keeps them in `sessions.toml` so later invocations of the
//! CLI can reuse a session:
//!
//! ```toml
//! [sessions]
//! "etl@azkaban.example.com:8443" = "c2f3..."
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::SessionError;
use crate::config::{self, SESSIONS_FILE};

/// Storage for session tokens
pub trait SessionStore {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&mut self, key: &str, token: &str) -> Result<(), SessionError>;
    fn remove(&mut self, key: &str) -> Result<(), SessionError>;
}

/// Tokens kept for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    tokens: HashMap<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.tokens.get(key).cloned()
    }

    fn put(&mut self, key: &str, token: &str) -> Result<(), SessionError> {
        self.tokens.insert(key.to_string(), token.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), SessionError> {
        self.tokens.remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    sessions: BTreeMap<String, String>,
}

/// Tokens persisted in a TOML file
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    file: SessionFile,
}

impl FileSessionStore {
    /// Open the store at `path`. A missing or unreadable file starts empty:
    /// losing cached tokens only costs a new login.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = match config::read_optional(&path) {
            Ok(Some(content)) => toml::from_str(&content).unwrap_or_else(|e| {
                log::warn!("ignoring unreadable session file {}: {}", path.display(), e);
                SessionFile::default()
            }),
            Ok(None) => SessionFile::default(),
            Err(e) => {
                log::warn!("{}", e);
                SessionFile::default()
            }
        };
        Self { path, file }
    }

    /// Open `sessions.toml` in the configuration directory.
    pub fn open_in_dir(dir: &Path) -> Self {
        Self::open(dir.join(SESSIONS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), SessionError> {
        let store_error = |reason: String| SessionError::Store {
            path: self.path.clone(),
            reason,
        };
        let content =
            toml::to_string_pretty(&self.file).map_err(|e| store_error(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| store_error(e.to_string()))?;

        let mut staged = NamedTempFile::new_in(dir).map_err(|e| store_error(e.to_string()))?;
        staged
            .write_all(content.as_bytes())
            .map_err(|e| store_error(e.to_string()))?;
        staged
            .persist(&self.path)
            .map_err(|e| store_error(e.error.to_string()))?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.file.sessions.get(key).cloned()
    }

    fn put(&mut self, key: &str, token: &str) -> Result<(), SessionError> {
        self.file
            .sessions
            .insert(key.to_string(), token.to_string());
        self.save()
    }

    fn remove(&mut self, key: &str) -> Result<(), SessionError> {
        if self.file.sessions.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store() {
        let mut store = MemorySessionStore::new();
        assert!(store.get("a@h:80").is_none());
        store.put("a@h:80", "t1").unwrap();
        assert_eq!(store.get("a@h:80").as_deref(), Some("t1"));
        store.remove("a@h:80").unwrap();
        assert!(store.get("a@h:80").is_none());
    }

    #[test]
    fn test_file_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(SESSIONS_FILE);

        let mut store = FileSessionStore::open(&path);
        store.put("etl@host:8443", "token-1").unwrap();

        let reopened = FileSessionStore::open(&path);
        assert_eq!(reopened.get("etl@host:8443").as_deref(), Some("token-1"));

        let mut reopened = reopened;
        reopened.remove("etl@host:8443").unwrap();
        assert!(FileSessionStore::open(&path).get("etl@host:8443").is_none());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SESSIONS_FILE);
        std::fs::write(&path, "not = [valid").unwrap();
        let store = FileSessionStore::open(&path);
        assert!(store.get("anything").is_none());
    }
}
