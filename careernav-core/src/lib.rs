//! CareerNavigator Core Library
//!
//! Client-side access to the CareerNavigator backend. It includes:
//!
//! - An authenticated request pipeline with single-flight token refresh
//! - Token and session-snapshot storage in SQLite
//! - The auth session context (login, signup, OAuth, logout, identity)
//! - Typed wrappers for profile, skills, career history, education and resume
//! - Job contribution submission with a local points ledger
//! - Client settings

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod types;

use std::sync::Arc;

// Re-exports for convenience
pub use api::{ApiClient, ApiError, ApiRequest, SessionEvent};
pub use auth::{
    AuthSession, MemorySessionStore, MemoryTokenStore, Session, SessionStatus, SessionStore,
    SqliteSessionStore, SqliteTokenStore, TokenStore,
};
pub use config::ClientSettings;
pub use db::{Database, SharedDatabase};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire up a client and session over one database.
///
/// Loads settings, builds the SQLite-backed token and session stores, and
/// restores the persisted session. Call [`AuthSession::check_auth`] next.
pub fn open_session(db: Database) -> Result<AuthSession, ApiError> {
    let settings = ClientSettings::load(&db);
    let db = db.into_shared();
    let tokens = Arc::new(SqliteTokenStore::new(db.clone()));
    let client = Arc::new(ApiClient::new(&settings, tokens)?);
    let store = Arc::new(SqliteSessionStore::new(db));
    Ok(AuthSession::init(client, store))
}
