//! Job contributions: submit scraped postings and keep the points tally.

use std::sync::Arc;

use tracing::{info, warn};

use super::client::ApiClient;
use super::error::ApiError;
use crate::db::SharedDatabase;
use crate::types::{ContributionMessage, ContributionReceipt, ContributionReply, JobData};

const POINTS_KEY: &str = "contribution_points";

impl ApiClient {
    /// Submit one scraped job posting.
    pub async fn submit_job(&self, job: &JobData) -> Result<ContributionReceipt, ApiError> {
        self.post_json("/contributions/jobs", job).await
    }
}

/// Running total of points earned by contributions, kept in settings.
#[derive(Clone)]
pub struct ContributionLedger {
    db: SharedDatabase,
}

impl ContributionLedger {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn points(&self) -> i64 {
        match self.db.lock() {
            Ok(db) => db.get_setting_or(POINTS_KEY, "0").parse().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Add points and return the new total.
    pub fn add(&self, points: i64) -> Result<i64, ApiError> {
        let db = self
            .db
            .lock()
            .map_err(|_| ApiError::Storage(crate::auth::TokenStorageError::Poisoned))?;
        let total = db
            .get_setting_or(POINTS_KEY, "0")
            .parse::<i64>()
            .unwrap_or(0)
            + points;
        db.set_setting(POINTS_KEY, &total.to_string())
            .map_err(|e| ApiError::Storage(e.into()))?;
        Ok(total)
    }
}

/// Handles relay messages: submits the job, credits points, replies.
pub struct ContributionRelay {
    client: Arc<ApiClient>,
    ledger: ContributionLedger,
}

impl ContributionRelay {
    pub fn new(client: Arc<ApiClient>, ledger: ContributionLedger) -> Self {
        Self { client, ledger }
    }

    pub fn ledger(&self) -> &ContributionLedger {
        &self.ledger
    }

    pub async fn handle(&self, message: ContributionMessage) -> ContributionReply {
        let ContributionMessage::JobDataExtracted(job) = message;

        match self.client.submit_job(&job).await {
            Ok(receipt) => {
                if let Some(points) = receipt.points.filter(|p| *p != 0) {
                    match self.ledger.add(points) {
                        Ok(total) => info!(points, total, source = %job.source, "Contribution credited"),
                        Err(e) => warn!(error = %e, "Failed to record contribution points"),
                    }
                }
                ContributionReply::ok(receipt)
            }
            Err(e) => {
                warn!(error = %e, source = %job.source, "Failed to submit job data");
                ContributionReply::failed(e.to_string())
            }
        }
    }
}
