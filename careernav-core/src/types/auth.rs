//! Authentication wire types.

use serde::{Deserialize, Serialize};

use super::FieldError;

/// Token pair returned by signup, login, oauth and refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Seconds until the access token expires.
    pub expires_in: u64,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

// Tokens must not end up in logs through `{:?}`.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

impl SignupRequest {
    /// Check the password policy the backend enforces on signup.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if !self.email.contains('@') {
            errors.push(FieldError::new("email", "Invalid email address"));
        }
        if let Some(message) = password_policy_violation(&self.password) {
            errors.push(FieldError::new("password", message));
        }
        if self.full_name.as_ref().is_some_and(|n| n.chars().count() > 255) {
            errors.push(FieldError::new(
                "full_name",
                "Full name must be at most 255 characters",
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Supported OAuth identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Linkedin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthRequest {
    pub provider: OAuthProvider,
    /// Access token issued by the OAuth provider.
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
}

impl PasswordChangeRequest {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if self.current_password.is_empty() {
            errors.push(FieldError::new(
                "current_password",
                "Current password is required",
            ));
        }
        if let Some(message) = password_policy_violation(&self.new_password) {
            errors.push(FieldError::new("new_password", message));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Returns the first rule a password breaks, if any.
///
/// 8..=128 characters with at least one uppercase, lowercase and digit.
/// Any Unicode digit counts, as on the backend.
pub fn password_policy_violation(password: &str) -> Option<&'static str> {
    let len = password.chars().count();
    if len < 8 {
        return Some("Password must be at least 8 characters long");
    }
    if len > 128 {
        return Some("Password must be at most 128 characters long");
    }
    if !password.chars().any(char::is_uppercase) {
        return Some("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(char::is_lowercase) {
        return Some("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(char::is_numeric) {
        return Some("Password must contain at least one digit");
    }
    None
}
