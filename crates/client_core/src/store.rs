//! Persisted login state. A missing file means "logged out".

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::domain::UserId;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token: String,
    pub username: String,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

impl StoredSession {
    pub fn new(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
            user_id: None,
        }
    }

    /// Both the token and the username must be present to count as logged in.
    pub fn is_authenticated(&self) -> bool {
        !self.token.is_empty() && !self.username.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<StoredSession>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read session file '{}'", self.path.display())
                })
            }
        };
        let session: StoredSession = serde_json::from_str(&raw).with_context(|| {
            format!("session file '{}' is not valid", self.path.display())
        })?;
        Ok(session.is_authenticated().then_some(session))
    }

    pub fn save(&self, session: &StoredSession) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create session directory '{}'", parent.display())
            })?;
        }
        let body = serde_json::to_string_pretty(session)?;
        fs::write(&self.path, body)
            .with_context(|| format!("failed to write session file '{}'", self.path.display()))?;
        debug!(path = %self.path.display(), username = %session.username, "session saved");
        Ok(())
    }

    /// Caches the resolved identity next to the token. No-op when logged out.
    pub fn remember_user_id(&self, user_id: UserId) -> Result<()> {
        let Some(mut session) = self.load()? else {
            return Ok(());
        };
        if session.user_id == Some(user_id) {
            return Ok(());
        }
        session.user_id = Some(user_id);
        self.save(&session)
    }

    /// Logout: removes every stored credential.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "stored session cleared");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove session file '{}'", self.path.display())
            }),
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
