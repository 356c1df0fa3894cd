//! Authentication state for the CareerNavigator client.
//!
//! This module provides:
//! - Token storage (SQLite or in-memory), kept apart from session data
//! - Session snapshot storage (user identity + authenticated flag)
//! - The `AuthSession` context object driving sign-in, sign-out and identity

pub mod session;
pub mod session_store;
pub mod storage;

pub use session::{AuthSession, Session, SessionStatus};
pub use session_store::{
    MemorySessionStore, SessionSnapshot, SessionStore, SessionStoreError, SqliteSessionStore,
    SESSION_KEY,
};
pub use storage::{MemoryTokenStore, SqliteTokenStore, StoredTokens, TokenStorageError, TokenStore};
