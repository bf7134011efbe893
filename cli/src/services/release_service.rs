//! Release service - orchestrates the release workflow
//!
//! A release moves through publish -> migrate -> deploy -> verify. Publish
//! and migrate failures stop the whole release; deploy and verify run per
//! service, concurrently, and a failure there only fails that service.
//! The record is saved after every transition so `release status` and
//! `release cancel` always see the current state.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{DeployConfig, ServiceConfig};
use crate::domain::{
    derive_revision, Artifact, HealthStatus, Release, ReleaseState, RollbackTarget,
    ServiceRevision, ServiceStatus, Stage, StageStatus,
};
use crate::error::{ConfigError, OrchestratorError, PublishError, ServiceFailure};
use crate::infrastructure::{ReleaseStore, ReleaseTracker};
use crate::services::migration_service::{DatabaseConnection, MigrationRunner};
use crate::services::publisher::{BuildContext, ImagePublisher};
use crate::services::rollout_service::{ComputePlatform, HealthVerifier, ServiceTarget, Verification};
use crate::ui;

/// Build logs kept in a release failure message
const MAX_FAILURE_LOG_LINES: usize = 40;

/// A CI trigger: which services, at which revision
#[derive(Debug, Clone, Default)]
pub struct ReleaseRequest {
    pub services: Vec<String>,
    pub revision: Option<String>,
    pub commit_sha: Option<String>,
}

/// Everything needed to publish, deploy and verify one service
#[derive(Debug, Clone)]
pub struct DeployTarget {
    pub build: BuildContext,
    pub target: ServiceTarget,
    pub desired_count: u32,
    pub verifier: HealthVerifier,
}

impl DeployTarget {
    pub fn from_config(config: &DeployConfig, service: &ServiceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            build: BuildContext {
                repository: service.repository(&config.registry.base),
                context_dir: config.resolve(&service.build_context()),
                dockerfile: service.dockerfile().map(|d| config.resolve(&d)),
            },
            target: ServiceTarget::from(service),
            desired_count: service.desired_count,
            verifier: HealthVerifier::new(
                service.health.timeout()?,
                service.health.interval()?,
                service.health.max_errors,
            ),
        })
    }
}

/// The migration task and the service whose artifact carries it
#[derive(Clone)]
pub struct MigrationStage {
    pub service: String,
    pub runner: MigrationRunner,
    pub database: DatabaseConnection,
}

/// Service for orchestrating releases
pub struct ReleaseOrchestrator {
    targets: BTreeMap<String, DeployTarget>,
    migration: Option<MigrationStage>,
    publisher: ImagePublisher,
    platform: Arc<dyn ComputePlatform>,
    store: Arc<ReleaseStore>,
    tracker: ReleaseTracker,
}

impl ReleaseOrchestrator {
    pub fn new(
        publisher: ImagePublisher,
        platform: Arc<dyn ComputePlatform>,
        store: Arc<ReleaseStore>,
    ) -> Self {
        Self {
            targets: BTreeMap::new(),
            migration: None,
            publisher,
            platform,
            store,
            tracker: ReleaseTracker::disabled(),
        }
    }

    pub fn with_target(mut self, service: impl Into<String>, target: DeployTarget) -> Self {
        self.targets.insert(service.into(), target);
        self
    }

    pub fn with_migration(mut self, migration: MigrationStage) -> Self {
        self.migration = Some(migration);
        self
    }

    pub fn with_tracker(mut self, tracker: ReleaseTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Create and run a release
    pub async fn start(&self, request: ReleaseRequest) -> Result<Release> {
        let release = self.create(request).await?;
        self.run(release).await
    }

    /// Validate a request and persist a pending release for it
    pub async fn create(&self, request: ReleaseRequest) -> Result<Release, OrchestratorError> {
        let mut services: Vec<String> = Vec::new();
        for service in request.services {
            let service = service.trim().to_string();
            if !service.is_empty() && !services.contains(&service) {
                services.push(service);
            }
        }
        if services.is_empty() {
            return Err(OrchestratorError::NoServices);
        }
        if let Some(unknown) = services.iter().find(|s| !self.targets.contains_key(*s)) {
            return Err(OrchestratorError::UnknownService {
                name: unknown.clone(),
            });
        }

        let revision = derive_revision(request.revision.as_deref(), request.commit_sha.as_deref())?;

        let existing = self.store.list().await?;
        if let Some(active) = existing
            .iter()
            .find(|r| !r.state.is_terminal() && r.overlaps(&services))
        {
            return Err(OrchestratorError::Conflict {
                release_id: active.id,
                services: active
                    .services
                    .iter()
                    .filter(|s| services.contains(s))
                    .cloned()
                    .collect(),
            });
        }

        let mut release = Release::new(services, revision, request.commit_sha);
        release.rollback_target = existing
            .iter()
            .find(|r| r.state == ReleaseState::Succeeded && r.covers(&release.services))
            .map(|r| RollbackTarget {
                release_id: r.id,
                revision_id: r.revision_id.clone(),
            });

        self.store.save(&release).await?;
        info!(
            release_id = %release.id,
            revision = %release.revision_id,
            services = %release.services.join(","),
            "Created release"
        );
        Ok(release)
    }

    /// Drive a pending release to a terminal state.
    ///
    /// Stage failures are recorded on the returned release, not returned as
    /// errors; `Err` means the release could not be tracked or persisted.
    pub async fn run(&self, mut release: Release) -> Result<Release> {
        let tracking = self.tracker.start(&release).await?;
        self.print_header(&release);

        self.drive(&mut release, tracking)
            .await
            .with_context(|| format!("Release {} could not be persisted", release.id))?;

        self.tracker
            .complete(tracking, release.state == ReleaseState::Succeeded)
            .await;
        self.print_summary(&release);
        Ok(release)
    }

    async fn drive(&self, release: &mut Release, tracking: Option<Uuid>) -> Result<(), OrchestratorError> {
        // Publish
        if !self.enter(release, Stage::Publish, tracking).await? {
            return Ok(());
        }
        let start = Instant::now();
        match self.publish(release).await {
            Ok(artifacts) => {
                let reused = artifacts.values().filter(|a| a.reused).count();
                release.artifacts = artifacts;
                let message = format!(
                    "{} artifact(s) at {} ({} reused) in {:.1}s",
                    release.artifacts.len(),
                    release.revision_id,
                    reused,
                    start.elapsed().as_secs_f64()
                );
                self.complete(release, Stage::Publish, Some(message), tracking).await?;
            }
            Err(e) => {
                return self.abort(release, Stage::Publish, describe_publish_error(&e), tracking).await;
            }
        }

        // Migrate
        if !self.enter(release, Stage::Migrate, tracking).await? {
            return Ok(());
        }
        match self.migrate(release).await {
            Ok(message) => self.complete(release, Stage::Migrate, message, tracking).await?,
            Err(message) => return self.abort(release, Stage::Migrate, message, tracking).await,
        }

        // Deploy and verify, one concurrent sequence per service
        if !self.enter(release, Stage::Deploy, tracking).await? {
            return Ok(());
        }
        self.roll_out(release).await?;

        let deploy_failures = release
            .outcomes
            .values()
            .filter(|o| o.failure.as_ref().is_some_and(is_deploy_failure))
            .count();
        if deploy_failures == release.services.len() {
            let message = format!(
                "deploy failed for every service: {}",
                failed_summary(release, is_deploy_failure)
            );
            return self.abort(release, Stage::Deploy, message, tracking).await;
        }
        let deploy_failed = deploy_failures > 0;
        if deploy_failed {
            let message = format!("deploy failed for {}", failed_summary(release, is_deploy_failure));
            release.degrade_stage(Stage::Deploy, message.clone());
            self.save(release, Stage::Deploy, StageStatus::Failed, Some(message), tracking)
                .await?;
        } else {
            self.complete(release, Stage::Deploy, None, tracking).await?;
        }

        // Verification already ran inside each service's sequence; this
        // only records the verdict, so there is no boundary to cancel at
        if !self.begin(release, Stage::Verify, tracking).await? {
            return Ok(());
        }
        let unhealthy = failed_summary(release, |f| !is_deploy_failure(f));
        if unhealthy.is_empty() {
            self.complete(release, Stage::Verify, None, tracking).await?;
        } else {
            let message = format!("unhealthy: {}", unhealthy);
            release.degrade_stage(Stage::Verify, message.clone());
            self.save(release, Stage::Verify, StageStatus::Failed, Some(message), tracking)
                .await?;
        }

        if release.services_with(ServiceStatus::Failed).is_empty() {
            if let Err(e) = release.advance(ReleaseState::Succeeded) {
                release.fail(Stage::Verify, e.to_string());
            }
            self.store.save(release).await?;
            return Ok(());
        }

        let stage = if deploy_failed { Stage::Deploy } else { Stage::Verify };
        let message = format!(
            "{} succeeded, {} failed: {}",
            release.services_with(ServiceStatus::Succeeded).len(),
            release.services_with(ServiceStatus::Failed).len(),
            failed_summary(release, |_| true)
        );
        release.fail(stage, message);
        self.store.save(release).await?;
        Ok(())
    }

    /// Cancel check, then start `stage`. False if the release ended instead.
    async fn enter(
        &self,
        release: &mut Release,
        stage: Stage,
        tracking: Option<Uuid>,
    ) -> Result<bool, OrchestratorError> {
        if self.store.cancel_requested(&release.id).await? {
            warn!(release_id = %release.id, stage = %stage, "Release cancelled by operator");
            release.cancel_requested = true;
            release.cancel(stage);
            self.store.save(release).await?;
            self.tracker
                .update_stage(tracking, stage, StageStatus::Failed, Some("cancelled".to_string()))
                .await;
            return Ok(false);
        }
        self.begin(release, stage, tracking).await
    }

    /// Start `stage`. False if the transition was refused and the release ended.
    async fn begin(
        &self,
        release: &mut Release,
        stage: Stage,
        tracking: Option<Uuid>,
    ) -> Result<bool, OrchestratorError> {
        if let Err(e) = release.start_stage(stage) {
            release.fail(stage, e.to_string());
            self.store.save(release).await?;
            return Ok(false);
        }

        info!(release_id = %release.id, "{} Starting: {}", stage.emoji(), stage);
        self.save(release, stage, StageStatus::Running, None, tracking).await?;
        Ok(true)
    }

    async fn complete(
        &self,
        release: &mut Release,
        stage: Stage,
        message: Option<String>,
        tracking: Option<Uuid>,
    ) -> Result<(), OrchestratorError> {
        info!(release_id = %release.id, "{} {} completed", stage.emoji(), stage);
        release.complete_stage(stage, message.clone());
        self.save(release, stage, StageStatus::Succeeded, message, tracking).await
    }

    /// Fail the whole release at `stage`
    async fn abort(
        &self,
        release: &mut Release,
        stage: Stage,
        message: String,
        tracking: Option<Uuid>,
    ) -> Result<(), OrchestratorError> {
        warn!(release_id = %release.id, stage = %stage, "Release failed");
        release.fail(stage, message.clone());
        self.save(release, stage, StageStatus::Failed, Some(message), tracking).await
    }

    async fn save(
        &self,
        release: &Release,
        stage: Stage,
        status: StageStatus,
        message: Option<String>,
        tracking: Option<Uuid>,
    ) -> Result<(), OrchestratorError> {
        self.store.save(release).await?;
        self.tracker.update_stage(tracking, stage, status, message).await;
        Ok(())
    }

    /// Publish every service; the first failure stops the stage
    async fn publish(&self, release: &Release) -> Result<BTreeMap<String, Artifact>, PublishError> {
        let mut artifacts = BTreeMap::new();
        for service in &release.services {
            let Some(target) = self.targets.get(service) else {
                continue;
            };
            let artifact = self
                .publisher
                .publish(service, &release.revision_id, &target.build)
                .await?;
            artifacts.insert(service.clone(), artifact);
        }
        Ok(artifacts)
    }

    /// Ok(note) when migrations ran or were not needed
    async fn migrate(&self, release: &mut Release) -> Result<Option<String>, String> {
        let Some(migration) = &self.migration else {
            return Ok(Some("no migration configured".to_string()));
        };
        let Some(artifact) = release.artifacts.get(&migration.service) else {
            info!(service = %migration.service, "Migration service not in release, skipping");
            return Ok(Some(format!(
                "skipped: {} is not part of this release",
                migration.service
            )));
        };

        let result = migration.runner.run(artifact, &migration.database).await;
        let summary = result.summary();
        let success = result.success;
        release.migration = Some(result);

        if success {
            Ok(Some(summary))
        } else {
            Err(summary)
        }
    }

    /// Deploy every service and verify each one as soon as its own deploy
    /// is accepted. Services run concurrently and never wait on each other.
    async fn roll_out(&self, release: &mut Release) -> Result<(), OrchestratorError> {
        let mut pending = Vec::new();
        for service in release.services.clone() {
            let (Some(target), Some(artifact)) =
                (self.targets.get(&service), release.artifacts.get(&service))
            else {
                release.outcome_mut(&service).fail(ServiceFailure::NotDeployed {
                    reason: "no artifact published".to_string(),
                });
                continue;
            };
            let image = artifact.pinned_ref();
            release.outcome_mut(&service).status = ServiceStatus::Deploying;
            pending.push((service, target, image));
        }
        self.store.save(release).await?;

        let release_id = release.id;
        let revision_id = release.revision_id.clone();
        let results = join_all(pending.iter().map(|(service, target, image)| {
            self.deploy_and_verify(release_id, &revision_id, service, target, image)
        }))
        .await;

        for ((service, _, _), result) in pending.iter().zip(results) {
            let outcome = release.outcome_mut(service);
            match result? {
                Rollout::DeployFailed(cause) => {
                    outcome.fail(ServiceFailure::DeployFailure { cause });
                }
                Rollout::Verified(verification) => {
                    outcome.health_checks = verification.samples;
                    match verification.result {
                        Ok(_) => outcome.status = ServiceStatus::Succeeded,
                        Err(failure) => outcome.fail(failure),
                    }
                }
            }
        }
        Ok(())
    }

    async fn deploy_and_verify(
        &self,
        release_id: Uuid,
        revision_id: &str,
        service: &str,
        target: &DeployTarget,
        image: &str,
    ) -> Result<Rollout, OrchestratorError> {
        info!(service = %service, image = %image, "Deploying");
        if let Err(e) = self
            .platform
            .update_service(&target.target, image, target.desired_count)
            .await
        {
            warn!(service = %service, error = %e, "Deploy failed");
            return Ok(Rollout::DeployFailed(e.to_string()));
        }

        let mut revision =
            ServiceRevision::rolled_out(service, revision_id, target.desired_count, release_id);
        self.store.record_revision(revision.clone()).await?;

        let verification = target
            .verifier
            .verify(&self.platform, &target.target, target.desired_count)
            .await;
        revision.health = match &verification.result {
            Ok(_) => HealthStatus::Healthy,
            Err(failure) => {
                warn!(service = %service, failure = %failure, "Service did not become healthy");
                HealthStatus::Unhealthy
            }
        };
        self.store.record_revision(revision).await?;
        Ok(Rollout::Verified(verification))
    }

    fn print_header(&self, release: &Release) {
        ui::print_header(&format!("Release {}", release.revision_id));
        ui::print_field("Release", &release.id.to_string());
        ui::print_field("Services", &release.services.join(", "));
        if let Some(commit) = &release.commit_sha {
            ui::print_field("Commit", commit);
        }
        if let Some(target) = &release.rollback_target {
            ui::print_field("Rollback to", &target.revision_id);
        }
        println!();
    }

    fn print_summary(&self, release: &Release) {
        println!();
        match (&release.state, &release.failure) {
            (ReleaseState::Succeeded, _) => {
                ui::print_success(&format!("Release {} succeeded", release.revision_id))
            }
            (_, Some(failure)) => ui::print_error(&format!(
                "Release {} failed at {}: {}",
                release.revision_id,
                failure.stage,
                failure.message.lines().next().unwrap_or_default()
            )),
            _ => {}
        }

        println!();
        for stage in &release.stages {
            println!(
                "   {} {:<8} {}",
                stage.stage.emoji(),
                stage.stage.name(),
                ui::status(stage.status.name())
            );
        }
        println!();
        for outcome in release.outcomes.values() {
            let detail = outcome
                .failure
                .as_ref()
                .map(|f| format!(" ({})", f))
                .unwrap_or_default();
            println!(
                "   {:<16} {}{}",
                outcome.service,
                ui::status(outcome.status.name()),
                detail
            );
        }
        println!();
    }
}

fn describe_publish_error(e: &PublishError) -> String {
    match e {
        PublishError::Build { logs, .. } => {
            let lines: Vec<&str> = logs.lines().collect();
            let tail = &lines[lines.len().saturating_sub(MAX_FAILURE_LOG_LINES)..];
            format!("{}\n{}", e, tail.join("\n"))
        }
        other => other.to_string(),
    }
}

/// How one service's deploy+verify sequence ended
enum Rollout {
    DeployFailed(String),
    Verified(Verification),
}

fn is_deploy_failure(failure: &ServiceFailure) -> bool {
    matches!(
        failure,
        ServiceFailure::DeployFailure { .. } | ServiceFailure::NotDeployed { .. }
    )
}

/// Failed services whose failure matches `keep`
fn failed_summary(release: &Release, keep: impl Fn(&ServiceFailure) -> bool) -> String {
    release
        .outcomes
        .values()
        .filter(|o| o.status == ServiceStatus::Failed)
        .filter_map(|o| {
            let failure = o.failure.as_ref()?;
            keep(failure).then(|| format!("{} ({})", o.service, failure))
        })
        .collect::<Vec<_>>()
        .join(", ")
}
