//! Release tracker client for reporting releases to an external service
//!
//! ## Configuration
//!
//! Set `RELEASE_TRACKER_URL` environment variable to enable:
//! ```bash
//! export RELEASE_TRACKER_URL=http://release-tracker.internal:8080
//! ```
//!
//! If not set, release tracking is disabled and all operations are no-ops.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{Release, Stage, StageStatus};

/// Release tracker HTTP client
pub struct ReleaseTrackerClient {
    client: Client,
    base_url: String,
}

/// Request to create a release
#[derive(Debug, Clone, Serialize)]
pub struct CreateReleaseRequest {
    pub release_id: Uuid,
    pub revision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    pub services: Vec<String>,
}

/// Response from creating a release
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReleaseResponse {
    pub id: Uuid,
    pub status: String,
}

/// Request to update a stage
#[derive(Debug, Clone, Serialize)]
pub struct UpdateStageRequest {
    pub stage: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request to complete a release
#[derive(Debug, Clone, Serialize)]
pub struct CompleteReleaseRequest {
    pub status: String,
}

impl ReleaseTrackerClient {
    /// Create a new client from environment variable
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("RELEASE_TRACKER_URL").ok()?;
        Self::new(&base_url)
    }

    pub fn new(base_url: &str) -> Option<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .ok()?;

        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn create_release(
        &self,
        request: CreateReleaseRequest,
    ) -> Result<CreateReleaseResponse> {
        let url = format!("{}/api/releases", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send create release request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Create release failed with status {}: {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse create release response")
    }

    pub async fn update_stage(&self, tracker_id: Uuid, request: UpdateStageRequest) -> Result<()> {
        let url = format!("{}/api/releases/{}/stages", self.base_url, tracker_id);
        self.post(&url, &request, "Update stage").await
    }

    pub async fn complete_release(
        &self,
        tracker_id: Uuid,
        request: CompleteReleaseRequest,
    ) -> Result<()> {
        let url = format!("{}/api/releases/{}/complete", self.base_url, tracker_id);
        self.post(&url, &request, "Complete release").await
    }

    async fn post<T: Serialize>(&self, url: &str, body: &T, what: &str) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what.to_lowercase()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} failed with status {}: {}", what, status, body);
        }

        Ok(())
    }
}

/// Release tracking helper that wraps the client with optional behavior
///
/// If the release tracker URL is not configured, all operations are no-ops.
#[derive(Default)]
pub struct ReleaseTracker {
    client: Option<ReleaseTrackerClient>,
}

impl ReleaseTracker {
    pub fn from_env() -> Self {
        Self {
            client: ReleaseTrackerClient::from_env(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Register a release (HARD FAIL if tracker is enabled but unreachable)
    pub async fn start(&self, release: &Release) -> Result<Option<Uuid>> {
        let Some(client) = &self.client else {
            return Ok(None);
        };

        let response = client
            .create_release(CreateReleaseRequest {
                release_id: release.id,
                revision: release.revision_id.clone(),
                git_commit: release.commit_sha.clone(),
                services: release.services.clone(),
            })
            .await
            .with_context(|| format!("Release tracker at {} rejected the release", client.base_url()))?;

        tracing::info!(release_id = %release.id, tracker_id = %response.id, "Started release tracking");
        Ok(Some(response.id))
    }

    /// Report a stage status (best effort, logs errors)
    pub async fn update_stage(
        &self,
        tracker_id: Option<Uuid>,
        stage: Stage,
        status: StageStatus,
        message: Option<String>,
    ) {
        let (Some(client), Some(tracker_id)) = (&self.client, tracker_id) else {
            return;
        };

        let request = UpdateStageRequest {
            stage: stage.name().to_string(),
            status: status.name().to_string(),
            message,
        };

        if let Err(e) = client.update_stage(tracker_id, request).await {
            tracing::warn!(
                tracker_id = %tracker_id,
                stage = %stage,
                error = %e,
                "Failed to update release stage"
            );
        } else {
            tracing::debug!(tracker_id = %tracker_id, stage = %stage, status = status.name(), "Updated release stage");
        }
    }

    /// Complete a tracked release (best effort, logs errors)
    pub async fn complete(&self, tracker_id: Option<Uuid>, succeeded: bool) {
        let (Some(client), Some(tracker_id)) = (&self.client, tracker_id) else {
            return;
        };

        let status = if succeeded { "succeeded" } else { "failed" };
        let request = CompleteReleaseRequest {
            status: status.to_string(),
        };

        if let Err(e) = client.complete_release(tracker_id, request).await {
            tracing::warn!(tracker_id = %tracker_id, status, error = %e, "Failed to complete release");
        } else {
            tracing::info!(tracker_id = %tracker_id, status, "Completed release tracking");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_tracker() {
        let tracker = ReleaseTracker::disabled();
        assert!(!tracker.is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_tracker_is_a_no_op() {
        let tracker = ReleaseTracker::disabled();
        let release = Release::new(vec!["api".into()], "abc123", None);
        assert!(tracker.start(&release).await.unwrap().is_none());
        tracker
            .update_stage(None, Stage::Publish, StageStatus::Running, None)
            .await;
        tracker.complete(None, true).await;
    }

    #[test]
    fn test_base_url_is_normalised() {
        let client = ReleaseTrackerClient::new("http://tracker:8080/").unwrap();
        assert_eq!(client.base_url(), "http://tracker:8080");
    }

    #[test]
    fn test_stage_request_shape() {
        let request = UpdateStageRequest {
            stage: Stage::Migrate.name().to_string(),
            status: StageStatus::Failed.name().to_string(),
            message: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stage"], "migrate");
        assert_eq!(json["status"], "failed");
        assert!(json.get("message").is_none());
    }
}
