//! Client settings for CareerNavigator.
//!
//! Settings are persisted to the SQLite database as JSON.

use serde::{Deserialize, Serialize};

/// Backend used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Environment variable that overrides the stored `api_url`.
pub const API_URL_ENV: &str = "CAREERNAV_API_URL";

const SETTINGS_KEY: &str = "settings";

/// Client settings - persisted to database as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Backend origin, without the `/api/v1` suffix.
    pub api_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,

    /// User-Agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("careernav/{}", crate::VERSION)
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl ClientSettings {
    /// Load settings from database, using defaults for missing values.
    ///
    /// If settings don't exist or can't be parsed, returns defaults. The
    /// `CAREERNAV_API_URL` environment variable wins over the stored URL.
    pub fn load(db: &crate::db::Database) -> Self {
        let mut settings = Self::default();

        if let Ok(Some(json)) = db.get_setting(SETTINGS_KEY) {
            match serde_json::from_str::<ClientSettings>(&json) {
                Ok(loaded) => settings = loaded,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse settings, using defaults");
                }
            }
        }

        if let Ok(url) = std::env::var(API_URL_ENV) {
            settings.api_url = url;
        }

        settings.validate();
        settings
    }

    /// Save settings to database.
    pub fn save(&self, db: &crate::db::Database) -> anyhow::Result<()> {
        let json = serde_json::to_string(self)?;
        db.set_setting(SETTINGS_KEY, &json)?;
        Ok(())
    }

    /// Validate and clamp settings to valid ranges.
    pub fn validate(&mut self) {
        self.request_timeout_secs = self.request_timeout_secs.clamp(1, 300);

        let trimmed = self.api_url.trim().trim_end_matches('/');
        self.api_url = if trimmed.is_empty() {
            DEFAULT_API_URL.to_string()
        } else {
            trimmed.to_string()
        };

        if self.user_agent.trim().is_empty() {
            self.user_agent = default_user_agent();
        }
    }

    /// Base URL for versioned API paths.
    pub fn api_base(&self) -> String {
        format!("{}/api/v1", self.api_url.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Tests
// =============================================================================
