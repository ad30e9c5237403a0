//! Where login passwords come from.

use dialoguer::{theme::ColorfulTheme, Password};

use super::SessionError;
use crate::alias::Endpoint;

/// Environment variable read before prompting.
pub const PASSWORD_ENV: &str = "AZKABAN_PASSWORD";

/// Supplies the password for a login.
pub trait CredentialSource {
    fn password(&self, endpoint: &Endpoint) -> Result<String, SessionError>;
}

/// Reads `$AZKABAN_PASSWORD`, or asks on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptCredentials;

impl CredentialSource for PromptCredentials {
    fn password(&self, endpoint: &Endpoint) -> Result<String, SessionError> {
        if let Some(password) = std::env::var(PASSWORD_ENV).ok().filter(|p| !p.is_empty()) {
            log::debug!("using password from {}", PASSWORD_ENV);
            return Ok(password);
        }
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Azkaban password for {}", endpoint))
            .interact()
            .map_err(|e| SessionError::Credentials(e.to_string()))
    }
}

/// A fixed password.
#[derive(Clone)]
pub struct StaticCredentials {
    password: String,
}

impl StaticCredentials {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticCredentials(***)")
    }
}

impl CredentialSource for StaticCredentials {
    fn password(&self, _endpoint: &Endpoint) -> Result<String, SessionError> {
        Ok(self.password.clone())
    }
}
