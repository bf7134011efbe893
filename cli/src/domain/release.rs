//! Release domain types
//!
//! A release is one deploy attempt, modelled as a forward-only state
//! machine over four stages:
//!
//! ```text
//! Pending -> Publishing -> Migrating -> Deploying -> Verifying -> Succeeded
//!    \            \            \             \            \
//!     +------------+------------+-------------+------------+--> Failed
//! ```
//!
//! `advance` refuses any transition that skips a stage or enters
//! `Deploying` without a successful migrate stage, so a release can never
//! touch running services while schema and code disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::artifact::Artifact;
use super::migration::MigrationResult;
use crate::error::{ServiceFailure, TransitionError};

/// Stages of a release, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Publish,
    Migrate,
    Deploy,
    Verify,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Publish, Stage::Migrate, Stage::Deploy, Stage::Verify];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Migrate => "migrate",
            Self::Deploy => "deploy",
            Self::Verify => "verify",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Publish => "📤",
            Self::Migrate => "🗃️",
            Self::Deploy => "🚀",
            Self::Verify => "🩺",
        }
    }

    /// Release state while this stage runs
    pub fn state(&self) -> ReleaseState {
        match self {
            Self::Publish => ReleaseState::Publishing,
            Self::Migrate => ReleaseState::Migrating,
            Self::Deploy => ReleaseState::Deploying,
            Self::Verify => ReleaseState::Verifying,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// Stand-in for stages missing from a stored record
static UNSTARTED: [StageRecord; 4] = [
    StageRecord::pending(Stage::Publish),
    StageRecord::pending(Stage::Migrate),
    StageRecord::pending(Stage::Deploy),
    StageRecord::pending(Stage::Verify),
];

impl StageRecord {
    const fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            message: None,
        }
    }
}

/// Overall state of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseState {
    Pending,
    Publishing,
    Migrating,
    Deploying,
    Verifying,
    Succeeded,
    Failed,
}

impl ReleaseState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Publishing => "publishing",
            Self::Migrating => "migrating",
            Self::Deploying => "deploying",
            Self::Verifying => "verifying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-service progress through deploy and verify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Pending,
    Deploying,
    Verifying,
    Succeeded,
    Failed,
}

impl ServiceStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deploying => "deploying",
            Self::Verifying => "verifying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// One health poll of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSample {
    pub at: DateTime<Utc>,
    pub desired: u32,
    pub running: u32,
    pub healthy: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOutcome {
    pub service: String,
    pub status: ServiceStatus,
    pub failure: Option<ServiceFailure>,
    #[serde(default)]
    pub health_checks: Vec<HealthSample>,
}

impl ServiceOutcome {
    fn pending(service: &str) -> Self {
        Self {
            service: service.to_string(),
            status: ServiceStatus::Pending,
            failure: None,
            health_checks: Vec::new(),
        }
    }

    pub fn fail(&mut self, failure: ServiceFailure) {
        self.status = ServiceStatus::Failed;
        self.failure = Some(failure);
    }
}

/// Most recent successful release covering the same services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackTarget {
    pub release_id: Uuid,
    pub revision_id: String,
}

/// Where and why a release failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFailure {
    pub stage: Stage,
    pub message: String,
}

/// A single deploy attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: Uuid,
    pub revision_id: String,
    pub commit_sha: Option<String>,
    pub services: Vec<String>,
    pub state: ReleaseState,
    pub stages: Vec<StageRecord>,
    /// Exactly one artifact per service once publish succeeds
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,
    #[serde(default)]
    pub outcomes: BTreeMap<String, ServiceOutcome>,
    #[serde(default)]
    pub migration: Option<MigrationResult>,
    #[serde(default)]
    pub rollback_target: Option<RollbackTarget>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub failure: Option<ReleaseFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Release {
    pub fn new(
        services: Vec<String>,
        revision_id: impl Into<String>,
        commit_sha: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let outcomes = services
            .iter()
            .map(|s| (s.clone(), ServiceOutcome::pending(s)))
            .collect();

        Self {
            id: Uuid::new_v4(),
            revision_id: revision_id.into(),
            commit_sha,
            services,
            state: ReleaseState::Pending,
            stages: Stage::ALL.iter().map(|s| StageRecord::pending(*s)).collect(),
            artifacts: BTreeMap::new(),
            outcomes,
            migration: None,
            rollback_target: None,
            cancel_requested: false,
            cancelled: false,
            failure: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Record for `stage`; a stored release missing it reads as pending
    pub fn stage(&self, stage: Stage) -> &StageRecord {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .unwrap_or(&UNSTARTED[stage as usize])
    }

    fn stage_mut(&mut self, stage: Stage) -> &mut StageRecord {
        let index = match self.stages.iter().position(|r| r.stage == stage) {
            Some(index) => index,
            None => {
                self.stages.push(StageRecord::pending(stage));
                self.stages.sort_by_key(|r| r.stage);
                self.stages.iter().position(|r| r.stage == stage).unwrap_or_default()
            }
        };
        &mut self.stages[index]
    }

    pub fn outcome_mut(&mut self, service: &str) -> &mut ServiceOutcome {
        self.outcomes
            .entry(service.to_string())
            .or_insert_with(|| ServiceOutcome::pending(service))
    }

    /// Move to a new state, enforcing the state machine
    pub fn advance(&mut self, to: ReleaseState) -> Result<(), TransitionError> {
        let from = self.state;
        let reject = |reason: &str| TransitionError {
            from: from.name().to_string(),
            to: to.name().to_string(),
            reason: reason.to_string(),
        };

        if from.is_terminal() {
            return Err(reject("release already finished"));
        }

        match (from, to) {
            (_, ReleaseState::Failed) => {}
            (ReleaseState::Pending, ReleaseState::Publishing) => {}
            (ReleaseState::Publishing, ReleaseState::Migrating) => {
                if self.stage(Stage::Publish).status != StageStatus::Succeeded {
                    return Err(reject("publish stage has not succeeded"));
                }
            }
            (ReleaseState::Migrating, ReleaseState::Deploying) => {
                if self.stage(Stage::Migrate).status != StageStatus::Succeeded {
                    return Err(reject("migrate stage has not succeeded"));
                }
            }
            (ReleaseState::Deploying, ReleaseState::Verifying) => {
                if !self.stage(Stage::Deploy).status.is_finished() {
                    return Err(reject("deploy stage has not finished"));
                }
            }
            (ReleaseState::Verifying, ReleaseState::Succeeded) => {
                if let Some(unhealthy) = self
                    .outcomes
                    .values()
                    .find(|o| o.status != ServiceStatus::Succeeded)
                {
                    return Err(reject(&format!("service {} is not healthy", unhealthy.service)));
                }
            }
            _ => return Err(reject("not the next state")),
        }

        self.state = to;
        self.updated_at = Utc::now();
        if to.is_terminal() {
            self.finished_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Enter the state for `stage` and mark the stage running
    pub fn start_stage(&mut self, stage: Stage) -> Result<(), TransitionError> {
        self.advance(stage.state())?;
        let record = self.stage_mut(stage);
        record.status = StageStatus::Running;
        record.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete_stage(&mut self, stage: Stage, message: Option<String>) {
        self.finish_stage(stage, StageStatus::Succeeded, message);
    }

    /// Mark a stage failed without ending the release (per-service failures)
    pub fn degrade_stage(&mut self, stage: Stage, message: impl Into<String>) {
        self.finish_stage(stage, StageStatus::Failed, Some(message.into()));
    }

    fn finish_stage(&mut self, stage: Stage, status: StageStatus, message: Option<String>) {
        let now = Utc::now();
        let record = self.stage_mut(stage);
        record.status = status;
        record.finished_at = Some(now);
        if message.is_some() {
            record.message = message;
        }
        self.updated_at = now;
    }

    /// End the release as failed at `stage`
    pub fn fail(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        if self.stage(stage).status != StageStatus::Pending {
            self.finish_stage(stage, StageStatus::Failed, Some(message.clone()));
        }
        self.failure = Some(ReleaseFailure { stage, message });
        // Failed is reachable from every non-terminal state
        if !self.state.is_terminal() {
            self.state = ReleaseState::Failed;
            self.updated_at = Utc::now();
            self.finished_at = Some(self.updated_at);
        }
    }

    /// End the release before `next` starts because an operator asked to
    pub fn cancel(&mut self, next: Stage) {
        self.cancelled = true;
        self.fail(next, format!("cancelled by operator before {} stage", next));
    }

    pub fn services_with(&self, status: ServiceStatus) -> Vec<&str> {
        self.outcomes
            .values()
            .filter(|o| o.status == status)
            .map(|o| o.service.as_str())
            .collect()
    }

    /// Whether this release touches any of `services`
    pub fn overlaps(&self, services: &[String]) -> bool {
        self.services.iter().any(|s| services.contains(s))
    }

    /// Whether this release covered every one of `services`
    pub fn covers(&self, services: &[String]) -> bool {
        services.iter().all(|s| self.services.contains(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release() -> Release {
        Release::new(vec!["api".into(), "web".into()], "abc123", None)
    }

    #[test]
    fn test_new_release_is_pending() {
        let release = release();
        assert_eq!(release.state, ReleaseState::Pending);
        assert_eq!(release.stages.len(), 4);
        for stage in Stage::ALL {
            assert_eq!(release.stage(stage).stage, stage);
            assert_eq!(release.stage(stage).status, StageStatus::Pending);
        }
        assert_eq!(release.outcomes.len(), 2);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut release = release();
        release.start_stage(Stage::Publish).unwrap();
        release.complete_stage(Stage::Publish, None);
        release.start_stage(Stage::Migrate).unwrap();
        release.complete_stage(Stage::Migrate, None);
        release.start_stage(Stage::Deploy).unwrap();
        release.complete_stage(Stage::Deploy, None);
        release.start_stage(Stage::Verify).unwrap();
        for service in ["api", "web"] {
            release.outcome_mut(service).status = ServiceStatus::Succeeded;
        }
        release.complete_stage(Stage::Verify, None);
        release.advance(ReleaseState::Succeeded).unwrap();

        assert_eq!(release.state, ReleaseState::Succeeded);
        assert!(release.finished_at.is_some());
    }

    #[test]
    fn test_deploy_requires_successful_migration() {
        let mut release = release();
        release.start_stage(Stage::Publish).unwrap();
        release.complete_stage(Stage::Publish, None);
        release.start_stage(Stage::Migrate).unwrap();

        // Still running
        assert!(release.start_stage(Stage::Deploy).is_err());

        release.fail(Stage::Migrate, "migration exited with code 1");
        assert!(release.start_stage(Stage::Deploy).is_err());
        assert_eq!(release.state, ReleaseState::Failed);
        assert_eq!(release.stage(Stage::Deploy).status, StageStatus::Pending);
    }

    #[test]
    fn test_stored_release_with_missing_stages() {
        let mut stored = serde_json::to_value(release()).unwrap();
        stored["stages"] = serde_json::json!([
            { "stage": "migrate", "status": "pending", "started_at": null, "finished_at": null, "message": null },
            { "stage": "publish", "status": "succeeded", "started_at": null, "finished_at": null, "message": null }
        ]);
        let mut release: Release = serde_json::from_value(stored).unwrap();

        assert_eq!(release.stage(Stage::Publish).status, StageStatus::Succeeded);
        assert_eq!(release.stage(Stage::Verify).stage, Stage::Verify);
        assert_eq!(release.stage(Stage::Verify).status, StageStatus::Pending);

        release.start_stage(Stage::Publish).unwrap();
        release.complete_stage(Stage::Publish, None);
        release.start_stage(Stage::Migrate).unwrap();
        release.fail(Stage::Migrate, "migration exited with code 1");
        release.degrade_stage(Stage::Deploy, "never ran");
        assert_eq!(release.stage(Stage::Migrate).status, StageStatus::Failed);
        assert_eq!(release.stage(Stage::Deploy).status, StageStatus::Failed);
        assert_eq!(release.stages.len(), 3);
    }

    #[test]
    fn test_stages_cannot_be_skipped() {
        let mut release = release();
        assert!(release.advance(ReleaseState::Migrating).is_err());
        assert!(release.advance(ReleaseState::Succeeded).is_err());

        release.start_stage(Stage::Publish).unwrap();
        assert!(release.advance(ReleaseState::Migrating).is_err());
    }

    #[test]
    fn test_success_requires_all_services_healthy() {
        let mut release = release();
        for stage in [Stage::Publish, Stage::Migrate, Stage::Deploy] {
            release.start_stage(stage).unwrap();
            release.complete_stage(stage, None);
        }
        release.start_stage(Stage::Verify).unwrap();
        release.outcome_mut("api").status = ServiceStatus::Succeeded;
        release.outcome_mut("web").fail(ServiceFailure::HealthTimeout {
            healthy: 0,
            desired: 1,
            waited_secs: 600,
        });

        assert!(release.advance(ReleaseState::Succeeded).is_err());
        assert_eq!(release.services_with(ServiceStatus::Succeeded), vec!["api"]);
        assert_eq!(release.services_with(ServiceStatus::Failed), vec!["web"]);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut release = release();
        release.fail(Stage::Publish, "build failed");
        assert!(release.advance(ReleaseState::Publishing).is_err());
        assert!(release.advance(ReleaseState::Failed).is_err());
        assert_eq!(release.failure.as_ref().unwrap().stage, Stage::Publish);
    }

    #[test]
    fn test_cancel_marks_release() {
        let mut release = release();
        release.start_stage(Stage::Publish).unwrap();
        release.complete_stage(Stage::Publish, None);
        release.cancel(Stage::Migrate);

        assert!(release.cancelled);
        assert_eq!(release.state, ReleaseState::Failed);
        let failure = release.failure.unwrap();
        assert_eq!(failure.stage, Stage::Migrate);
        assert!(failure.message.contains("cancelled"));
    }

    #[test]
    fn test_overlap_and_cover() {
        let release = release();
        assert!(release.overlaps(&["web".to_string(), "worker".to_string()]));
        assert!(!release.overlaps(&["worker".to_string()]));
        assert!(release.covers(&["api".to_string()]));
        assert!(!release.covers(&["api".to_string(), "worker".to_string()]));
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let mut release = release();
        release.start_stage(Stage::Publish).unwrap();
        let json = serde_json::to_string(&release).unwrap();
        let back: Release = serde_json::from_str(&json).unwrap();
        assert_eq!(back, release);
        assert!(json.contains("\"state\":\"publishing\""));
    }
}
