//! Token storage: the access/refresh pair behind a small trait.
//!
//! `SqliteTokenStore` persists the pair as a single row so `set` is one
//! statement. `MemoryTokenStore` keeps it in process for tests and
//! throwaway sessions.

use crate::db::SharedDatabase;
use crate::types::TokenPair;
use chrono::Utc;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenStorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Token store lock poisoned")]
    Poisoned,
}

/// Stored tokens plus bookkeeping.
#[derive(Clone)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: Option<i64>,
    pub updated_at: i64,
}

impl std::fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTokens")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

impl StoredTokens {
    fn from_pair(pair: &TokenPair) -> Self {
        let now = Utc::now().timestamp();
        Self {
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            token_type: pair.token_type.clone(),
            expires_at: i64::try_from(pair.expires_in)
                .ok()
                .and_then(|secs| now.checked_add(secs)),
            updated_at: now,
        }
    }

    /// Check if the access token is expired.
    pub fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at {
            Utc::now().timestamp() >= expires_at
        } else {
            false
        }
    }
}

/// Persisted holder for the access/refresh token pair.
///
/// Reads never touch the network. `set` replaces both tokens at once;
/// `clear` removes both.
pub trait TokenStore: Send + Sync {
    /// Load the full stored record.
    fn load(&self) -> Result<Option<StoredTokens>, TokenStorageError>;

    /// Replace both tokens.
    fn set(&self, pair: &TokenPair) -> Result<(), TokenStorageError>;

    /// Remove both tokens.
    fn clear(&self) -> Result<(), TokenStorageError>;

    fn get_access(&self) -> Result<Option<String>, TokenStorageError> {
        Ok(self.load()?.map(|t| t.access_token))
    }

    fn get_refresh(&self) -> Result<Option<String>, TokenStorageError> {
        Ok(self.load()?.map(|t| t.refresh_token))
    }

    /// Whether an access token is present and not known to be expired.
    fn has_valid_access(&self) -> bool {
        self.load()
            .map(|t| t.is_some_and(|tokens| !tokens.is_expired()))
            .unwrap_or(false)
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// Token store backed by the `auth_tokens` table.
pub struct SqliteTokenStore {
    db: SharedDatabase,
}

impl SqliteTokenStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

impl TokenStore for SqliteTokenStore {
    fn load(&self) -> Result<Option<StoredTokens>, TokenStorageError> {
        let db = self.db.lock().map_err(|_| TokenStorageError::Poisoned)?;
        let result = db.conn().query_row(
            "SELECT access_token, refresh_token, token_type, expires_at, updated_at
             FROM auth_tokens WHERE id = 1",
            [],
            |row| {
                Ok(StoredTokens {
                    access_token: row.get(0)?,
                    refresh_token: row.get(1)?,
                    token_type: row.get(2)?,
                    expires_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        );

        match result {
            Ok(tokens) => Ok(Some(tokens)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TokenStorageError::Database(e)),
        }
    }

    fn set(&self, pair: &TokenPair) -> Result<(), TokenStorageError> {
        let stored = StoredTokens::from_pair(pair);
        let db = self.db.lock().map_err(|_| TokenStorageError::Poisoned)?;
        db.conn().execute(
            "INSERT INTO auth_tokens (id, access_token, refresh_token, token_type, expires_at, updated_at)
             VALUES (1, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_type = excluded.token_type,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            rusqlite::params![
                stored.access_token,
                stored.refresh_token,
                stored.token_type,
                stored.expires_at,
                stored.updated_at,
            ],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStorageError> {
        let db = self.db.lock().map_err(|_| TokenStorageError::Poisoned)?;
        db.conn().execute("DELETE FROM auth_tokens", [])?;
        Ok(())
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Token store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<StoredTokens>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a pair already stored.
    pub fn with_pair(pair: &TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(StoredTokens::from_pair(pair))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<StoredTokens>, TokenStorageError> {
        let tokens = self.tokens.read().map_err(|_| TokenStorageError::Poisoned)?;
        Ok(tokens.clone())
    }

    fn set(&self, pair: &TokenPair) -> Result<(), TokenStorageError> {
        let mut tokens = self.tokens.write().map_err(|_| TokenStorageError::Poisoned)?;
        *tokens = Some(StoredTokens::from_pair(pair));
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStorageError> {
        let mut tokens = self.tokens.write().map_err(|_| TokenStorageError::Poisoned)?;
        *tokens = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    fn pair(access: &str, refresh: &str, expires_in: u64) -> TokenPair {
        TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            token_type: "bearer".to_string(),
            expires_in,
        }
    }

    fn setup_store() -> (TempDir, SqliteTokenStore) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_at(temp_dir.path().join("test.db")).unwrap();
        db.migrate().unwrap();
        (temp_dir, SqliteTokenStore::new(db.into_shared()))
    }

    fn stored_with_expiry(expires_at: i64) -> StoredTokens {
        StoredTokens {
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            token_type: "bearer".to_string(),
            expires_at: Some(expires_at),
            updated_at: Utc::now().timestamp(),
        }
    }

    #[test]
    fn test_stored_tokens_expiry() {
        assert!(!stored_with_expiry(Utc::now().timestamp() + 3600).is_expired());
        assert!(stored_with_expiry(Utc::now().timestamp() - 3600).is_expired());
    }

    #[test]
    fn test_huge_expires_in_has_no_expiry() {
        let store = MemoryTokenStore::with_pair(&pair("a", "r", u64::MAX));
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.expires_at, None);
        assert!(!stored.is_expired());

        let store = MemoryTokenStore::with_pair(&pair("a", "r", i64::MAX as u64));
        assert_eq!(store.load().unwrap().unwrap().expires_at, None);
    }

    #[test]
    fn test_sqlite_set_then_get_round_trips() {
        let (_temp, store) = setup_store();

        store.set(&pair("access123", "refresh456", 3600)).unwrap();

        assert_eq!(store.get_access().unwrap().as_deref(), Some("access123"));
        assert_eq!(store.get_refresh().unwrap().as_deref(), Some("refresh456"));
        assert!(store.has_valid_access());
    }

    #[test]
    fn test_sqlite_set_overwrites_both_tokens() {
        let (_temp, store) = setup_store();

        store.set(&pair("a1", "r1", 3600)).unwrap();
        store.set(&pair("a2", "r2", 3600)).unwrap();

        assert_eq!(store.get_access().unwrap().as_deref(), Some("a2"));
        assert_eq!(store.get_refresh().unwrap().as_deref(), Some("r2"));
    }

    #[test]
    fn test_sqlite_clear_removes_both() {
        let (_temp, store) = setup_store();

        store.set(&pair("a", "r", 3600)).unwrap();
        store.clear().unwrap();

        assert!(store.get_access().unwrap().is_none());
        assert!(store.get_refresh().unwrap().is_none());
        assert!(!store.has_valid_access());
    }

    #[test]
    fn test_sqlite_empty_store_reads_absent() {
        let (_temp, store) = setup_store();
        assert!(store.get_access().unwrap().is_none());
        assert!(store.get_refresh().unwrap().is_none());
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.db");

        {
            let db = Database::open_at(path.clone()).unwrap();
            db.migrate().unwrap();
            SqliteTokenStore::new(db.into_shared())
                .set(&pair("a", "r", 3600))
                .unwrap();
        }

        let db = Database::open_at(path).unwrap();
        let store = SqliteTokenStore::new(db.into_shared());
        assert_eq!(store.get_refresh().unwrap().as_deref(), Some("r"));
    }

    #[test]
    fn test_expired_pair_is_not_valid_access() {
        let (_temp, store) = setup_store();
        store.set(&pair("a", "r", 0)).unwrap();

        assert_eq!(store.get_access().unwrap().as_deref(), Some("a"));
        assert!(!store.has_valid_access());
    }

    #[test]
    fn test_memory_store_round_trip_and_clear() {
        let store = MemoryTokenStore::new();
        assert!(store.get_access().unwrap().is_none());

        store.set(&pair("a", "r", 60)).unwrap();
        assert_eq!(store.get_access().unwrap().as_deref(), Some("a"));
        assert_eq!(store.get_refresh().unwrap().as_deref(), Some("r"));

        store.clear().unwrap();
        assert!(store.get_refresh().unwrap().is_none());
    }

    #[test]
    fn test_stored_tokens_debug_hides_values() {
        let store = MemoryTokenStore::with_pair(&pair("secret-a", "secret-r", 60));
        let printed = format!("{:?}", store.load().unwrap().unwrap());
        assert!(!printed.contains("secret"));
    }
}
