//! `/auth` endpoints.

use tracing::{debug, info, warn};

use super::client::{ApiClient, ApiRequest};
use super::error::ApiError;
use crate::types::{
    LoginRequest, OAuthRequest, PasswordChangeRequest, RefreshTokenRequest, SignupRequest,
    TokenPair, User,
};

impl ApiClient {
    /// Register a new account and store the issued tokens.
    pub async fn signup(&self, request: &SignupRequest) -> Result<TokenPair, ApiError> {
        request.validate().map_err(ApiError::invalid)?;
        let pair: TokenPair = self
            .send_json(ApiRequest::post("/auth/signup").json(request)?.public())
            .await?;
        self.store_tokens(&pair)?;
        info!("Signed up");
        Ok(pair)
    }

    /// Sign in with email and password and store the issued tokens.
    pub async fn login(&self, request: &LoginRequest) -> Result<TokenPair, ApiError> {
        let pair: TokenPair = self
            .send_json(ApiRequest::post("/auth/login").json(request)?.public())
            .await?;
        self.store_tokens(&pair)?;
        info!("Logged in");
        Ok(pair)
    }

    /// Exchange an OAuth provider token for our own token pair.
    pub async fn oauth(&self, request: &OAuthRequest) -> Result<TokenPair, ApiError> {
        let pair: TokenPair = self
            .send_json(ApiRequest::post("/auth/oauth").json(request)?.public())
            .await?;
        self.store_tokens(&pair)?;
        info!(provider = ?request.provider, "Logged in via OAuth");
        Ok(pair)
    }

    /// Force a refresh of the stored token pair.
    pub async fn refresh(&self) -> Result<TokenPair, ApiError> {
        self.refresh_now().await
    }

    /// Revoke the refresh token server-side (best effort) and clear local tokens.
    ///
    /// Never fails: backend and storage errors are logged and swallowed.
    pub async fn logout(&self) {
        match self.tokens().get_refresh() {
            Ok(Some(refresh_token)) => {
                let request = ApiRequest::post("/auth/logout")
                    .json(&RefreshTokenRequest { refresh_token })
                    .map(ApiRequest::public);
                let result = match request {
                    Ok(request) => self.send_empty(request).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!(error = %e, "Backend logout failed, clearing local tokens anyway");
                }
            }
            Ok(None) => debug!("No refresh token, skipping backend logout"),
            Err(e) => warn!(error = %e, "Could not read refresh token for logout"),
        }

        if let Err(e) = self.clear_tokens() {
            warn!(error = %e, "Failed to clear tokens on logout");
        }
        info!("Logged out");
    }

    /// Revoke every refresh token of the account, then clear local tokens.
    pub async fn logout_all(&self) -> Result<(), ApiError> {
        self.send_empty(ApiRequest::post("/auth/logout-all")).await?;
        self.clear_tokens()?;
        info!("Logged out of all devices");
        Ok(())
    }

    /// Identity of the signed-in user.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get_json("/auth/me").await
    }

    pub async fn change_password(&self, request: &PasswordChangeRequest) -> Result<(), ApiError> {
        request.validate().map_err(ApiError::invalid)?;
        self.send_empty(ApiRequest::post("/auth/change-password").json(request)?)
            .await?;
        info!("Password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryTokenStore, TokenStore};
    use crate::config::ClientSettings;
    use crate::types::OAuthProvider;
    use mockito::Matcher;
    use std::sync::Arc;

    const PAIR_BODY: &str =
        r#"{"access_token":"a1","refresh_token":"r1","token_type":"bearer","expires_in":900}"#;

    fn client_for(url: &str, tokens: Arc<MemoryTokenStore>) -> ApiClient {
        let settings = ClientSettings {
            api_url: url.to_string(),
            ..Default::default()
        };
        ApiClient::new(&settings, tokens).unwrap()
    }

    #[tokio::test]
    async fn test_login_stores_tokens() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/auth/login")
            .match_body(Matcher::Json(
                serde_json::json!({"email": "ada@example.com", "password": "Password1"}),
            ))
            .with_status(200)
            .with_body(PAIR_BODY)
            .create_async()
            .await;

        let tokens = Arc::new(MemoryTokenStore::new());
        let client = client_for(&server.url(), tokens.clone());
        client
            .login(&LoginRequest {
                email: "ada@example.com".to_string(),
                password: "Password1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(tokens.get_access().unwrap().as_deref(), Some("a1"));
        assert_eq!(tokens.get_refresh().unwrap().as_deref(), Some("r1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_signup_rejects_weak_password_without_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/auth/signup")
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server.url(), Arc::new(MemoryTokenStore::new()));
        let err = client
            .signup(&SignupRequest {
                email: "ada@example.com".to_string(),
                password: "password".to_string(),
                full_name: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(422));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_oauth_posts_provider() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/auth/oauth")
            .match_body(Matcher::PartialJson(serde_json::json!({"provider": "google"})))
            .with_status(200)
            .with_body(PAIR_BODY)
            .create_async()
            .await;

        let tokens = Arc::new(MemoryTokenStore::new());
        let client = client_for(&server.url(), tokens.clone());
        client
            .oauth(&OAuthRequest {
                provider: OAuthProvider::Google,
                access_token: "google-token".to_string(),
                id_token: None,
            })
            .await
            .unwrap();

        assert!(tokens.get_access().unwrap().is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_logout_clears_tokens_when_backend_fails() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/auth/logout")
            .match_body(Matcher::Json(serde_json::json!({"refresh_token": "r1"})))
            .with_status(500)
            .create_async()
            .await;

        let tokens = Arc::new(MemoryTokenStore::new());
        tokens
            .set(&serde_json::from_str(PAIR_BODY).unwrap())
            .unwrap();
        let client = client_for(&server.url(), tokens.clone());

        client.logout().await;

        assert!(tokens.get_access().unwrap().is_none());
        assert!(tokens.get_refresh().unwrap().is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_logout_without_refresh_token_skips_backend() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/auth/logout")
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server.url(), Arc::new(MemoryTokenStore::new()));
        client.logout().await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_change_password_sends_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/auth/change-password")
            .match_header("authorization", "Bearer a1")
            .with_status(204)
            .create_async()
            .await;

        let tokens = Arc::new(MemoryTokenStore::new());
        tokens
            .set(&serde_json::from_str(PAIR_BODY).unwrap())
            .unwrap();
        let client = client_for(&server.url(), tokens);
        client
            .change_password(&PasswordChangeRequest {
                current_password: "Password1".to_string(),
                new_password: "Password2".to_string(),
            })
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_logout_all_clears_tokens() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/auth/logout-all")
            .match_header("authorization", "Bearer a1")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let tokens = Arc::new(MemoryTokenStore::new());
        tokens
            .set(&serde_json::from_str(PAIR_BODY).unwrap())
            .unwrap();
        let client = client_for(&server.url(), tokens.clone());
        client.logout_all().await.unwrap();

        assert!(tokens.get_access().unwrap().is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_explicit_refresh_failure_keeps_tokens() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/auth/refresh")
            .with_status(401)
            .create_async()
            .await;

        let tokens = Arc::new(MemoryTokenStore::new());
        tokens
            .set(&serde_json::from_str(PAIR_BODY).unwrap())
            .unwrap();
        let client = client_for(&server.url(), tokens.clone());
        let mut events = client.subscribe();

        assert!(client.refresh().await.is_err());
        assert_eq!(tokens.get_refresh().unwrap().as_deref(), Some("r1"));
        assert!(events.try_recv().is_err());
    }
}
