//! Auth session: the single source of truth for who is signed in.
//!
//! `AuthSession` is an explicit context object. Create it with
//! [`AuthSession::init`] at startup (restores the persisted snapshot), call
//! [`AuthSession::check_auth`], and hand it to whatever needs identity.
//! [`AuthSession::logout`] returns it to anonymous and wipes the snapshot.
//!
//! Status moves `Anonymous -> Authenticating -> Authenticated`, and back to
//! `Anonymous` on logout, failed sign-in or an invalidation raised by the
//! request pipeline. Overlapping sign-in attempts are not serialized here.

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use super::session_store::{SessionSnapshot, SessionStore};
use crate::api::{ApiClient, ApiError, SessionEvent};
use crate::types::{
    LoginRequest, OAuthRequest, PasswordChangeRequest, SignupRequest, TokenPair, User,
    UserProfile, UserUpdate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Anonymous,
    Authenticating,
    Authenticated,
}

/// In-memory session state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub user: Option<User>,
    pub profile: Option<UserProfile>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        if self.is_authenticated {
            SessionStatus::Authenticated
        } else if self.is_loading {
            SessionStatus::Authenticating
        } else {
            SessionStatus::Anonymous
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user: self.user.clone(),
            is_authenticated: self.is_authenticated,
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

pub struct AuthSession {
    client: Arc<ApiClient>,
    store: Arc<dyn SessionStore>,
    state: RwLock<Session>,
    events: Mutex<broadcast::Receiver<SessionEvent>>,
}

impl AuthSession {
    /// Build the session and restore the persisted snapshot, if any.
    pub fn init(client: Arc<ApiClient>, store: Arc<dyn SessionStore>) -> Self {
        let mut session = Session::default();
        match store.load() {
            Ok(Some(snapshot)) => {
                debug!(
                    is_authenticated = snapshot.is_authenticated,
                    "Restored session snapshot"
                );
                session.user = snapshot.user;
                session.is_authenticated = snapshot.is_authenticated;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to restore session snapshot"),
        }

        let events = Mutex::new(client.subscribe());
        Self {
            client,
            store,
            state: RwLock::new(session),
            events,
        }
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Current state, after applying any invalidation raised by the pipeline.
    pub fn state(&self) -> Session {
        self.apply_pending_events();
        self.read(Session::clone)
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated
    }

    pub fn user(&self) -> Option<User> {
        self.state().user
    }

    // =========================================================================
    // Sign-in
    // =========================================================================

    pub async fn login(&self, request: &LoginRequest) -> Result<User, ApiError> {
        self.authenticate(self.client.login(request)).await
    }

    pub async fn signup(&self, request: &SignupRequest) -> Result<User, ApiError> {
        self.authenticate(self.client.signup(request)).await
    }

    pub async fn oauth_login(&self, request: &OAuthRequest) -> Result<User, ApiError> {
        self.authenticate(self.client.oauth(request)).await
    }

    /// Obtain tokens, then fetch identity. On failure `error` is set,
    /// `is_authenticated` is left as it was, and the error is returned.
    async fn authenticate<F>(&self, obtain_tokens: F) -> Result<User, ApiError>
    where
        F: Future<Output = Result<TokenPair, ApiError>>,
    {
        self.apply_pending_events();
        self.write(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let result = match obtain_tokens.await {
            Ok(_) => self.client.current_user().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(user) => {
                info!(user_id = %user.id, "Session authenticated");
                self.write(|s| {
                    s.user = Some(user.clone());
                    s.is_authenticated = true;
                    s.is_loading = false;
                });
                self.persist();
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "Sign-in failed");
                self.write(|s| {
                    s.error = Some(e.to_string());
                    s.is_loading = false;
                });
                Err(e)
            }
        }
    }

    /// Best-effort backend logout, then clear tokens, state and snapshot.
    pub async fn logout(&self) {
        self.write(|s| s.is_loading = true);
        self.client.logout().await;
        self.invalidate();
        info!("Session cleared");
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Reconcile state with the token store on startup.
    ///
    /// No access token: anonymous. A token but no cached user (or a token
    /// known to be expired): fetch identity, which refreshes if needed.
    pub async fn check_auth(&self) {
        self.apply_pending_events();

        let stored = match self.client.tokens().load() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read tokens");
                None
            }
        };

        match stored {
            None => {
                if self.read(|s| s.is_authenticated || s.user.is_some()) {
                    debug!("No access token, resetting session");
                }
                self.invalidate_local();
            }
            Some(_) => {
                if !self.client.tokens().has_valid_access()
                    || self.read(|s| s.user.is_none())
                {
                    self.fetch_user().await;
                }
            }
        }
    }

    /// Fetch `/auth/me`. Any failure clears the session.
    pub async fn fetch_user(&self) -> Option<User> {
        self.apply_pending_events();

        let has_token = matches!(self.client.tokens().get_access(), Ok(Some(_)));
        if !has_token {
            self.invalidate_local();
            return None;
        }

        self.write(|s| s.is_loading = true);
        match self.client.current_user().await {
            Ok(user) => {
                self.write(|s| {
                    s.user = Some(user.clone());
                    s.is_authenticated = true;
                    s.is_loading = false;
                });
                self.persist();
                Some(user)
            }
            Err(e) => {
                debug!(error = %e, "Identity fetch failed, clearing session");
                self.apply_pending_events();
                self.invalidate_local();
                None
            }
        }
    }

    /// Fetch the full profile. Failures set `error` and are returned.
    pub async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        self.apply_pending_events();
        self.write(|s| s.is_loading = true);

        match self.client.profile().await {
            Ok(profile) => {
                self.write(|s| {
                    s.user = Some(profile.user.clone());
                    s.profile = Some(profile.clone());
                    s.is_loading = false;
                });
                self.persist();
                Ok(profile)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Update the profile and merge the result into the cached profile.
    pub async fn update_profile(&self, update: &UserUpdate) -> Result<User, ApiError> {
        self.apply_pending_events();
        self.write(|s| {
            s.is_loading = true;
            s.error = None;
        });

        match self.client.update_profile(update).await {
            Ok(user) => {
                self.write(|s| {
                    if let Some(profile) = s.profile.as_mut() {
                        profile.user = user.clone();
                    }
                    s.user = Some(user.clone());
                    s.is_loading = false;
                });
                self.persist();
                Ok(user)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    pub async fn change_password(&self, request: &PasswordChangeRequest) -> Result<(), ApiError> {
        self.apply_pending_events();
        self.write(|s| s.error = None);
        let result = self.client.change_password(request).await;
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    pub fn clear_error(&self) {
        self.write(|s| s.error = None);
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn read<T>(&self, f: impl FnOnce(&Session) -> T) -> T {
        let guard = self
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&*guard)
    }

    fn write(&self, f: impl FnOnce(&mut Session)) {
        let mut guard = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut *guard)
    }

    fn fail(&self, error: &ApiError) {
        self.write(|s| {
            s.error = Some(error.to_string());
            s.is_loading = false;
        });
        self.apply_pending_events();
    }

    fn persist(&self) {
        let snapshot = self.read(Session::snapshot);
        if let Err(e) = self.store.save(&snapshot) {
            warn!(error = %e, "Failed to persist session snapshot");
        }
    }

    /// Reset state and drop the snapshot. Tokens are left alone.
    fn invalidate_local(&self) {
        self.write(Session::reset);
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear session snapshot");
        }
    }

    /// Reset state, snapshot and tokens.
    fn invalidate(&self) {
        if let Err(e) = self.client.clear_tokens() {
            warn!(error = %e, "Failed to clear tokens");
        }
        self.invalidate_local();
    }

    /// Drain pipeline events. Any invalidation (or a lagged receiver, which
    /// can only have missed invalidations) resets the session.
    fn apply_pending_events(&self) {
        let mut invalidated = false;
        if let Ok(mut events) = self.events.lock() {
            loop {
                match events.try_recv() {
                    Ok(SessionEvent::Invalidated { reason }) => {
                        debug!(%reason, "Session invalidated by request pipeline");
                        invalidated = true;
                    }
                    Err(TryRecvError::Lagged(_)) => invalidated = true,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }
        if invalidated {
            self.invalidate_local();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemorySessionStore, MemoryTokenStore, TokenStore};
    use crate::config::ClientSettings;
    use crate::types::user_json;
    use mockito::Matcher;

    const PAIR_BODY: &str =
        r#"{"access_token":"a1","refresh_token":"r1","token_type":"bearer","expires_in":900}"#;

    struct Fixture {
        tokens: Arc<MemoryTokenStore>,
        store: Arc<MemorySessionStore>,
        session: AuthSession,
    }

    fn fixture(url: &str) -> Fixture {
        let tokens = Arc::new(MemoryTokenStore::new());
        let store = Arc::new(MemorySessionStore::new());
        let settings = ClientSettings {
            api_url: url.to_string(),
            ..Default::default()
        };
        let client = Arc::new(ApiClient::new(&settings, tokens.clone()).unwrap());
        let session = AuthSession::init(client, store.clone());
        Fixture {
            tokens,
            store,
            session,
        }
    }

    fn login_request() -> LoginRequest {
        LoginRequest {
            email: "ada@example.com".to_string(),
            password: "Password1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_authenticates_and_persists_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/api/v1/auth/login")
            .with_status(200)
            .with_body(PAIR_BODY)
            .create_async()
            .await;
        let _me = server
            .mock("GET", "/api/v1/auth/me")
            .match_header("authorization", "Bearer a1")
            .with_status(200)
            .with_body(user_json("ada@example.com").to_string())
            .create_async()
            .await;

        let f = fixture(&server.url());
        assert_eq!(f.session.status(), SessionStatus::Anonymous);

        let user = f.session.login(&login_request()).await.unwrap();

        assert_eq!(user.email, "ada@example.com");
        assert_eq!(f.session.status(), SessionStatus::Authenticated);
        let snapshot = f.store.load().unwrap().unwrap();
        assert!(snapshot.is_authenticated);
        assert_eq!(snapshot.user.unwrap().email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_failed_login_sets_error_and_keeps_flag() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/api/v1/auth/login")
            .with_status(401)
            .with_body(r#"{"detail": "Incorrect email or password"}"#)
            .create_async()
            .await;

        let f = fixture(&server.url());
        let err = f.session.login(&login_request()).await.unwrap_err();

        assert!(matches!(err, ApiError::Unauthorized { .. }));
        let state = f.session.state();
        assert!(!state.is_authenticated);
        assert!(!state.is_loading);
        assert_eq!(
            state.error.as_deref(),
            Some("Unauthorized: Incorrect email or password")
        );

        f.session.clear_error();
        assert!(f.session.state().error.is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_everything_even_if_backend_fails() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/api/v1/auth/login")
            .with_status(200)
            .with_body(PAIR_BODY)
            .create_async()
            .await;
        let _me = server
            .mock("GET", "/api/v1/auth/me")
            .with_status(200)
            .with_body(user_json("ada@example.com").to_string())
            .create_async()
            .await;
        let _logout = server
            .mock("POST", "/api/v1/auth/logout")
            .with_status(503)
            .create_async()
            .await;

        let f = fixture(&server.url());
        f.session.login(&login_request()).await.unwrap();

        f.session.logout().await;

        assert_eq!(f.session.status(), SessionStatus::Anonymous);
        assert!(f.session.user().is_none());
        assert!(f.tokens.get_access().unwrap().is_none());
        assert!(f.tokens.get_refresh().unwrap().is_none());
        assert!(f.store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_check_auth_without_token_resets_restored_snapshot() {
        let store = Arc::new(MemorySessionStore::new());
        store
            .save(&SessionSnapshot {
                user: Some(serde_json::from_value(user_json("ada@example.com")).unwrap()),
                is_authenticated: true,
            })
            .unwrap();
        let settings = ClientSettings::default();
        let client =
            Arc::new(ApiClient::new(&settings, Arc::new(MemoryTokenStore::new())).unwrap());

        let session = AuthSession::init(client, store.clone());
        assert!(session.is_authenticated());

        session.check_auth().await;

        assert!(!session.is_authenticated());
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_check_auth_fetches_identity_when_user_missing() {
        let mut server = mockito::Server::new_async().await;
        let me = server
            .mock("GET", "/api/v1/auth/me")
            .with_status(200)
            .with_body(user_json("ada@example.com").to_string())
            .expect(1)
            .create_async()
            .await;

        let f = fixture(&server.url());
        f.tokens.set(&serde_json::from_str(PAIR_BODY).unwrap()).unwrap();

        f.session.check_auth().await;
        // User is cached now; a second check makes no request.
        f.session.check_auth().await;

        assert!(f.session.is_authenticated());
        me.assert_async().await;
    }

    #[tokio::test]
    async fn test_check_auth_revalidates_expired_token_with_cached_user() {
        let mut server = mockito::Server::new_async().await;
        let me = server
            .mock("GET", "/api/v1/auth/me")
            .with_status(200)
            .with_body(user_json("ada@example.com").to_string())
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemorySessionStore::new());
        store
            .save(&SessionSnapshot {
                user: Some(serde_json::from_value(user_json("ada@example.com")).unwrap()),
                is_authenticated: true,
            })
            .unwrap();
        let tokens = Arc::new(MemoryTokenStore::with_pair(&TokenPair {
            access_token: "a1".to_string(),
            refresh_token: "r1".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 0,
        }));
        let settings = ClientSettings {
            api_url: server.url(),
            ..Default::default()
        };
        let client = Arc::new(ApiClient::new(&settings, tokens).unwrap());
        let session = AuthSession::init(client, store);

        session.check_auth().await;

        assert!(session.is_authenticated());
        me.assert_async().await;
    }

    #[tokio::test]
    async fn test_check_auth_with_rejected_token_clears_session() {
        let mut server = mockito::Server::new_async().await;
        let _me = server
            .mock("GET", "/api/v1/auth/me")
            .with_status(401)
            .create_async()
            .await;
        let _refresh = server
            .mock("POST", "/api/v1/auth/refresh")
            .with_status(401)
            .with_body(r#"{"detail": "Invalid or expired refresh token"}"#)
            .create_async()
            .await;

        let f = fixture(&server.url());
        f.tokens.set(&serde_json::from_str(PAIR_BODY).unwrap()).unwrap();

        f.session.check_auth().await;

        assert_eq!(f.session.status(), SessionStatus::Anonymous);
        assert!(f.tokens.get_access().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pipeline_invalidation_resets_session() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/api/v1/auth/login")
            .with_status(200)
            .with_body(PAIR_BODY)
            .create_async()
            .await;
        let _me = server
            .mock("GET", "/api/v1/auth/me")
            .with_status(200)
            .with_body(user_json("ada@example.com").to_string())
            .create_async()
            .await;
        let _skills = server
            .mock("GET", "/api/v1/users/me/skills")
            .with_status(401)
            .create_async()
            .await;
        let _refresh = server
            .mock("POST", "/api/v1/auth/refresh")
            .with_status(401)
            .create_async()
            .await;

        let f = fixture(&server.url());
        f.session.login(&login_request()).await.unwrap();
        assert!(f.session.is_authenticated());

        let err = f.session.client().list_skills().await.unwrap_err();
        assert!(matches!(err, ApiError::RefreshFailed(_)));

        assert_eq!(f.session.status(), SessionStatus::Anonymous);
        assert!(f.store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_profile_merges_into_profile() {
        let mut server = mockito::Server::new_async().await;
        let mut profile = user_json("ada@example.com");
        profile["skills"] = serde_json::json!([]);
        let _profile = server
            .mock("GET", "/api/v1/users/me")
            .with_status(200)
            .with_body(profile.to_string())
            .create_async()
            .await;
        let mut updated = user_json("ada@example.com");
        updated["bio"] = serde_json::json!("Analyst");
        let _update = server
            .mock("PUT", "/api/v1/users/me")
            .match_body(Matcher::Json(serde_json::json!({"bio": "Analyst"})))
            .with_status(200)
            .with_body(updated.to_string())
            .create_async()
            .await;

        let f = fixture(&server.url());
        f.tokens.set(&serde_json::from_str(PAIR_BODY).unwrap()).unwrap();

        f.session.fetch_profile().await.unwrap();
        f.session
            .update_profile(&UserUpdate {
                bio: Some("Analyst".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let state = f.session.state();
        assert_eq!(state.user.unwrap().bio.as_deref(), Some("Analyst"));
        assert_eq!(state.profile.unwrap().user.bio.as_deref(), Some("Analyst"));
    }
}
