//! Job contribution wire types.
//!
//! Job postings are scraped elsewhere and relayed here as `JobData`. The
//! relay envelope (`ContributionMessage` in, `ContributionReply` out) is the
//! shape exchanged with the browser extension's background worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scraped job posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    /// Site the posting came from, e.g. `linkedin`.
    pub source: String,
    pub source_url: String,
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub posted_date: String,
    pub extracted_at: DateTime<Utc>,
}

/// Backend response to a contribution. Only `points` is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionReceipt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Incoming relay message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ContributionMessage {
    #[serde(rename = "JOB_DATA_EXTRACTED")]
    JobDataExtracted(JobData),
}

/// Relay reply: `{success: true, result}` or `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ContributionReceipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContributionReply {
    pub fn ok(result: ContributionReceipt) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}
