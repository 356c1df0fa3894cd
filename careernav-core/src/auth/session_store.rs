//! Persisted session snapshot.
//!
//! Only the user identity and the authenticated flag are written, so a
//! restart can show who was signed in before `/auth/me` answers. Tokens live
//! in the token store and never pass through here.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::SharedDatabase;
use crate::types::User;

/// Namespaced key the snapshot is stored under.
pub const SESSION_KEY: &str = "auth-storage";

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Session store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub is_authenticated: bool,
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionSnapshot>, SessionStoreError>;
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SessionStoreError>;
    fn clear(&self) -> Result<(), SessionStoreError>;
}

/// Snapshot store backed by the `session_state` table.
pub struct SqliteSessionStore {
    db: SharedDatabase,
}

impl SqliteSessionStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

impl SessionStore for SqliteSessionStore {
    fn load(&self) -> Result<Option<SessionSnapshot>, SessionStoreError> {
        let json = {
            let db = self.db.lock().map_err(|_| SessionStoreError::Poisoned)?;
            db.load_session(SESSION_KEY)?
        };
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SessionStoreError> {
        let json = serde_json::to_string(snapshot)?;
        let db = self.db.lock().map_err(|_| SessionStoreError::Poisoned)?;
        db.save_session(SESSION_KEY, &json)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        let db = self.db.lock().map_err(|_| SessionStoreError::Poisoned)?;
        db.delete_session(SESSION_KEY)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    snapshot: Mutex<Option<SessionSnapshot>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SessionSnapshot>, SessionStoreError> {
        Ok(self
            .snapshot
            .lock()
            .map_err(|_| SessionStoreError::Poisoned)?
            .clone())
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SessionStoreError> {
        *self.snapshot.lock().map_err(|_| SessionStoreError::Poisoned)? = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        *self.snapshot.lock().map_err(|_| SessionStoreError::Poisoned)? = None;
        Ok(())
    }
}
