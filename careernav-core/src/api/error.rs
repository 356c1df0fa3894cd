//! Error kinds surfaced by the API client.

use reqwest::{Response, StatusCode};
use thiserror::Error;

use crate::auth::TokenStorageError;
use crate::types::{FieldError, ProblemDetails};

#[derive(Debug, Error)]
pub enum ApiError {
    /// No response was received.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// 401 that could not be recovered by a refresh.
    #[error("Unauthorized: {detail}")]
    Unauthorized { detail: String },

    /// The refresh token was rejected. Tokens are gone and the session has
    /// been invalidated.
    #[error("Session expired: {0}")]
    RefreshFailed(String),

    /// 4xx other than 401, or a request rejected before it was sent.
    #[error("Request rejected ({status}): {detail}")]
    Validation {
        status: u16,
        detail: String,
        errors: Vec<FieldError>,
    },

    /// 5xx. Never retried.
    #[error("Server error ({status}): {detail}")]
    Server { status: u16, detail: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Token storage error: {0}")]
    Storage(#[from] TokenStorageError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// Build a 422 from client-side field checks.
    pub fn invalid(errors: Vec<FieldError>) -> Self {
        let detail = errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "Invalid request".to_string());
        Self::Validation {
            status: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
            detail,
            errors,
        }
    }

    /// Classify a non-success status and body.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let problem = ProblemDetails::parse(body);
        let detail = problem
            .detail
            .or(problem.title)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());

        if status == StatusCode::UNAUTHORIZED {
            Self::Unauthorized { detail }
        } else if status.is_server_error() {
            Self::Server {
                status: status.as_u16(),
                detail,
            }
        } else {
            Self::Validation {
                status: status.as_u16(),
                detail,
                errors: problem.errors,
            }
        }
    }

    /// Pass successful responses through; turn everything else into an error.
    pub async fn check(response: Response) -> Result<Response, Self> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), "Request failed");
        Err(Self::from_status(status, &body))
    }

    /// HTTP status behind this error, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED.as_u16()),
            Self::Validation { status, .. } | Self::Server { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True when the user has to sign in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::RefreshFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classifies() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthorized { .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, r#"{"detail": "Skill not found"}"#),
            ApiError::Validation { status: 404, ref detail, .. } if detail == "Skill not found"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, ""),
            ApiError::Server { status: 502, ref detail } if detail == "Bad Gateway"
        ));
    }

    #[test]
    fn test_invalid_uses_first_message() {
        let err = ApiError::invalid(vec![
            FieldError::new("password", "too short"),
            FieldError::new("email", "bad"),
        ]);
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.to_string(), "Request rejected (422): too short");
    }

    #[test]
    fn test_requires_login() {
        assert!(ApiError::RefreshFailed("expired".to_string()).requires_login());
        assert!(!ApiError::Decode("x".to_string()).requires_login());
    }
}
