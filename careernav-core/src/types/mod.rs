//! Wire types shared with the CareerNavigator backend.

mod auth;
mod contribution;
mod user;

pub use auth::{
    password_policy_violation, LoginRequest, OAuthProvider, OAuthRequest, PasswordChangeRequest,
    RefreshTokenRequest, SignupRequest, TokenPair,
};
pub use contribution::{ContributionMessage, ContributionReceipt, ContributionReply, JobData};
pub use user::{
    CareerHistory, CareerHistoryCreate, CareerHistoryUpdate, Education, EducationCreate,
    EducationUpdate, Location, Skill, SkillCreate, SkillUpdate, User, UserProfile, UserUpdate,
};

#[cfg(test)]
pub(crate) use user::tests::user_json;

use serde::{Deserialize, Serialize};

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error body returned by the backend.
///
/// Accepts RFC 7807 problem details, FastAPI's `{"detail": "..."}`, and
/// FastAPI's request-validation shape `{"detail": [{"loc": [...], "msg": "..."}]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProblemDetails {
    pub title: Option<String>,
    pub detail: Option<String>,
    pub errors: Vec<FieldError>,
}

impl ProblemDetails {
    /// Parse a response body. Never fails: unknown bodies yield an empty value.
    pub fn parse(body: &str) -> Self {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
            return Self::default();
        };

        let title = value
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let mut errors: Vec<FieldError> = value
            .get("errors")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let detail = match value.get("detail") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Array(items)) => {
                errors.extend(items.iter().filter_map(validation_item));
                errors.first().map(|e| e.message.clone())
            }
            _ => None,
        };

        Self {
            title,
            detail,
            errors,
        }
    }
}

fn validation_item(item: &serde_json::Value) -> Option<FieldError> {
    let message = item.get("msg")?.as_str()?;
    let field = item
        .get("loc")
        .and_then(|loc| loc.as_array())
        .and_then(|loc| loc.last())
        .map(|last| match last {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();
    Some(FieldError::new(field, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_problem_details() {
        let body = r#"{
            "type": "https://api.careernavigator.ai/errors/internal-error",
            "title": "Internal Server Error",
            "status": 500,
            "detail": "boom",
            "instance": "/api/v1/users/me",
            "errors": [{"field": "email", "message": "taken"}]
        }"#;
        let problem = ProblemDetails::parse(body);
        assert_eq!(problem.title.as_deref(), Some("Internal Server Error"));
        assert_eq!(problem.detail.as_deref(), Some("boom"));
        assert_eq!(problem.errors, vec![FieldError::new("email", "taken")]);
    }

    #[test]
    fn test_parse_fastapi_validation_detail() {
        let body = r#"{"detail": [{"loc": ["body", "password"], "msg": "too short", "type": "value_error"}]}"#;
        let problem = ProblemDetails::parse(body);
        assert_eq!(problem.detail.as_deref(), Some("too short"));
        assert_eq!(problem.errors, vec![FieldError::new("password", "too short")]);
    }

    #[test]
    fn test_parse_non_json_body() {
        assert_eq!(ProblemDetails::parse("<html>502</html>"), ProblemDetails::default());
    }
}
