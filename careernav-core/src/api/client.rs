//! Authenticated request pipeline.
//!
//! Every request goes through [`ApiClient::execute`], which attaches the
//! stored access token, and on a 401 refreshes the token pair once and
//! replays the request. Refreshes are single-flight: concurrent requests
//! that were rejected with the same token share one refresh call.

use std::sync::Arc;

use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use super::error::ApiError;
use crate::auth::{TokenStorageError, TokenStore};
use crate::config::ClientSettings;
use crate::types::{RefreshTokenRequest, TokenPair};

// =============================================================================
// Events
// =============================================================================

/// Signals the pipeline raises for whoever owns the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Refresh failed; tokens were cleared and the user must sign in again.
    Invalidated { reason: String },
}

const EVENT_CAPACITY: usize = 16;

// =============================================================================
// Requests
// =============================================================================

/// File sent as a multipart form field.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl FilePart {
    fn to_form(&self) -> Result<reqwest::multipart::Form, ApiError> {
        let part = reqwest::multipart::Part::bytes(self.bytes.clone())
            .file_name(self.file_name.clone())
            .mime_str(&self.mime)?;
        Ok(reqwest::multipart::Form::new().part(self.field.clone(), part))
    }
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(FilePart),
}

/// An outbound request, kept in a replayable form.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: RequestBody,
    public: bool,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            public: false,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn multipart(mut self, file: FilePart) -> Self {
        self.body = RequestBody::Multipart(file);
        self
    }

    /// Send without credentials and without 401 recovery. Used for the
    /// endpoints that establish or tear down a session.
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

// =============================================================================
// Client
// =============================================================================

/// Outcome of the last failed refresh, keyed by the access token that was
/// rejected. Late waiters on the same token get this instead of a new refresh.
struct FailedRefresh {
    rejected: Option<String>,
    message: String,
}

#[derive(Default)]
struct RefreshGate {
    failed: Option<FailedRefresh>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenStore>,
    /// Moves on every sign-in or sign-out write. Held while writing, so a
    /// refresh can compare and write in one step.
    token_epoch: std::sync::Mutex<u64>,
    refresh_gate: Mutex<RefreshGate>,
    events: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    pub fn new(settings: &ClientSettings, tokens: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            http,
            base_url: settings.api_base(),
            tokens,
            token_epoch: std::sync::Mutex::new(0),
            refresh_gate: Mutex::new(RefreshGate::default()),
            events,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Replace the stored pair after a sign-in. A refresh already in flight
    /// will not overwrite it.
    pub fn store_tokens(&self, pair: &TokenPair) -> Result<(), ApiError> {
        let mut epoch = self.lock_epoch()?;
        *epoch += 1;
        self.tokens.set(pair)?;
        Ok(())
    }

    /// Drop the stored pair. A refresh already in flight will not bring it back.
    pub fn clear_tokens(&self) -> Result<(), ApiError> {
        let mut epoch = self.lock_epoch()?;
        *epoch += 1;
        self.tokens.clear()?;
        Ok(())
    }

    fn lock_epoch(&self) -> Result<std::sync::MutexGuard<'_, u64>, ApiError> {
        self.token_epoch
            .lock()
            .map_err(|_| ApiError::Storage(TokenStorageError::Poisoned))
    }

    fn current_epoch(&self) -> Result<u64, ApiError> {
        Ok(*self.lock_epoch()?)
    }

    /// Write a refresh outcome (new pair, or clear on failure) unless the
    /// tokens were replaced or cleared since `epoch`. Returns whether it wrote.
    fn commit_refresh(&self, epoch: u64, pair: Option<&TokenPair>) -> Result<bool, ApiError> {
        let current = self.lock_epoch()?;
        if *current != epoch {
            return Ok(false);
        }
        match pair {
            Some(pair) => self.tokens.set(pair)?,
            None => self.tokens.clear()?,
        }
        Ok(true)
    }

    /// Receive session events raised from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Execute a request with credentials and one refresh-and-retry on 401.
    ///
    /// Non-401 responses, and any response to an already retried request, are
    /// returned as they are. A 401 with no refresh token available is also
    /// returned unchanged. A failed refresh clears the tokens (unless a sign-in
    /// or sign-out replaced them meanwhile), raises
    /// [`SessionEvent::Invalidated`] and yields [`ApiError::RefreshFailed`].
    pub async fn execute(&self, mut request: ApiRequest) -> Result<Response, ApiError> {
        if request.public {
            return self.send(&request, None).await;
        }

        let sent_token = self.tokens.get_access()?;
        let response = self.send(&request, sent_token.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED || request.retried {
            return Ok(response);
        }

        debug!(path = %request.path, "Received 401, attempting token refresh");

        let Some(fresh_token) = self.refresh_access(sent_token.as_deref()).await? else {
            return Ok(response);
        };

        request.retried = true;
        self.send(&request, Some(&fresh_token)).await
    }

    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, ApiError> {
        let mut builder = self.http.request(request.method.clone(), self.url(&request.path));
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(file) => builder.multipart(file.to_form()?),
        };

        debug!(
            method = %request.method,
            path = %request.path,
            authenticated = token.is_some(),
            retried = request.retried,
            "Sending request"
        );

        Ok(builder.send().await?)
    }

    /// Obtain an access token to replace `rejected`.
    ///
    /// Returns `Ok(None)` when there is no refresh token to use.
    async fn refresh_access(&self, rejected: Option<&str>) -> Result<Option<String>, ApiError> {
        let mut gate = self.refresh_gate.lock().await;
        let epoch = self.current_epoch()?;

        // Another request already rotated the token while we waited.
        if let Some(current) = self.tokens.get_access()? {
            if rejected != Some(current.as_str()) {
                debug!("Access token already refreshed, reusing it");
                return Ok(Some(current));
            }
        }

        if let Some(failed) = gate.failed.as_ref() {
            if failed.rejected.as_deref() == rejected {
                return Err(ApiError::RefreshFailed(failed.message.clone()));
            }
        }

        let Some(refresh_token) = self.tokens.get_refresh()? else {
            debug!("No refresh token available");
            return Ok(None);
        };

        match self.request_refresh(&refresh_token).await {
            Ok(pair) => {
                if !self.commit_refresh(epoch, Some(&pair))? {
                    info!("Tokens changed during refresh, discarding refreshed pair");
                    return Ok(self.tokens.get_access()?);
                }
                gate.failed = None;
                info!(expires_in = pair.expires_in, "Access token refreshed");
                Ok(Some(pair.access_token))
            }
            Err(e) => {
                let message = e.to_string();
                let committed = self.commit_refresh(epoch, None).unwrap_or_else(|clear_err| {
                    warn!(error = %clear_err, "Failed to clear tokens after refresh failure");
                    true
                });
                if !committed {
                    warn!(error = %e, "Refresh for replaced tokens failed, leaving store alone");
                    return Err(ApiError::RefreshFailed(message));
                }
                error!(error = %e, "Token refresh failed, invalidating session");
                gate.failed = Some(FailedRefresh {
                    rejected: rejected.map(str::to_string),
                    message: message.clone(),
                });
                // No subscribers is fine.
                let _ = self.events.send(SessionEvent::Invalidated {
                    reason: message.clone(),
                });
                Err(ApiError::RefreshFailed(message))
            }
        }
    }

    /// Call the refresh endpoint directly, bypassing the pipeline.
    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let response = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&RefreshTokenRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await?;

        let response = ApiError::check(response).await?;
        response
            .json::<TokenPair>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Refresh the token pair on demand, sharing the single-flight gate.
    ///
    /// Unlike a refresh triggered by a 401, a failure here is only returned;
    /// tokens and session are left alone.
    pub async fn refresh_now(&self) -> Result<TokenPair, ApiError> {
        let _gate = self.refresh_gate.lock().await;
        let epoch = self.current_epoch()?;
        let refresh_token = self
            .tokens
            .get_refresh()?
            .ok_or_else(|| ApiError::Unauthorized {
                detail: "No refresh token".to_string(),
            })?;
        let pair = self.request_refresh(&refresh_token).await?;
        if !self.commit_refresh(epoch, Some(&pair))? {
            return Err(ApiError::RefreshFailed(
                "Tokens changed during refresh".to_string(),
            ));
        }
        info!("Access token refreshed on request");
        Ok(pair)
    }

    // =========================================================================
    // Typed helpers
    // =========================================================================

    /// Execute and decode a JSON body from a successful response.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = ApiError::check(self.execute(request).await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Execute and discard the body of a successful response.
    pub async fn send_empty(&self, request: ApiRequest) -> Result<(), ApiError> {
        ApiError::check(self.execute(request).await?).await?;
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send_empty(ApiRequest::delete(path)).await
    }
}
