//! Service revision domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Health of the active revision of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Rolled out, not yet verified
    Pending,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// The currently active revision of a running compute service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRevision {
    pub service: String,
    pub revision_id: String,
    pub task_count: u32,
    pub health: HealthStatus,
    /// Release that rolled this revision out
    pub release_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRevision {
    pub fn rolled_out(
        service: impl Into<String>,
        revision_id: impl Into<String>,
        task_count: u32,
        release_id: Uuid,
    ) -> Self {
        Self {
            service: service.into(),
            revision_id: revision_id.into(),
            task_count,
            health: HealthStatus::Pending,
            release_id,
            updated_at: Utc::now(),
        }
    }
}
