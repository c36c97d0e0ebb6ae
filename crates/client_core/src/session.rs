//! Authenticated identity, held in an explicit context value and persisted
//! between runs as a small JSON file.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::domain::User;
use tracing::{info, warn};

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted session. Unreadable contents are deleted and
    /// treated as logged out.
    pub async fn read(&self) -> Result<Option<Session>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read session file '{}'", self.path.display())
                })
            }
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) if !session.token.trim().is_empty() => Ok(Some(session)),
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "session: discarding invalid session file");
                self.remove().await?;
                Ok(None)
            }
        }
    }

    pub async fn write(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!(
                    "failed to create session directory '{}'",
                    parent.display()
                )
            })?;
        }
        let raw = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&self.path, raw)
            .await
            .with_context(|| format!("failed to write session file '{}'", self.path.display()))
    }

    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove session file '{}'", self.path.display())
            }),
        }
    }
}

/// The acting identity, passed to whatever needs it.
#[derive(Debug)]
pub struct SessionContext {
    store: SessionStore,
    current: Option<Session>,
}

impl SessionContext {
    pub async fn load(store: SessionStore) -> Result<Self> {
        let current = store.read().await?;
        if let Some(session) = &current {
            info!(user_id = session.user.id.0, "session: restored");
        }
        Ok(Self { store, current })
    }

    /// A context that starts logged out and persists to `store` on `set`.
    pub fn empty(store: SessionStore) -> Self {
        Self {
            store,
            current: None,
        }
    }

    pub async fn set(&mut self, user: User, token: impl Into<String>) -> Result<()> {
        let session = Session {
            token: token.into(),
            user,
        };
        self.store.write(&session).await?;
        info!(user_id = session.user.id.0, "session: stored");
        self.current = Some(session);
        Ok(())
    }

    pub async fn clear(&mut self) -> Result<()> {
        self.store.remove().await?;
        if let Some(session) = self.current.take() {
            info!(user_id = session.user.id.0, "session: cleared");
        }
        Ok(())
    }

    pub fn session(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn user(&self) -> Option<&User> {
        self.current.as_ref().map(|session| &session.user)
    }

    pub fn token(&self) -> Option<&str> {
        self.current.as_ref().map(|session| session.token.as_str())
    }

    pub fn is_logged_in(&self) -> bool {
        self.current.is_some()
    }

    pub fn require_user(&self) -> Result<&User, ClientError> {
        self.user().ok_or(ClientError::NotLoggedIn)
    }

    pub fn require_teacher(&self) -> Result<&User, ClientError> {
        let user = self.require_user()?;
        if !user.is_teacher() {
            return Err(ClientError::Forbidden(
                "this action is only available to teachers".to_string(),
            ));
        }
        Ok(user)
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
