//! Release commands: start, status, list and cancel.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;

use harbor_provision::{FileSecretRegistry, SecretRegistry, SecretSelector};

use crate::config::DeployConfig;
use crate::domain::{derive_revision, Release, ReleaseState, Stage};
use crate::error::{ConfigError, OrchestratorError};
use crate::infrastructure::{
    DockerBuilder, KubectlJobExecutor, KubernetesPlatform, RegistryCredentials, ReleaseStore,
    ReleaseTracker, SkopeoRegistry,
};
use crate::services::{
    DatabaseConnection, DeployTarget, ImagePublisher, MigrationRunner, MigrationStage,
    ReleaseOrchestrator, ReleaseRequest,
};
use crate::tools::{names, require_tool};
use crate::ui;

/// Health samples shown per service in `status`
const STATUS_HEALTH_SAMPLES: usize = 5;

/// Reject requests that could never start before touching registries or clusters
fn precheck(config: &DeployConfig, request: &ReleaseRequest) -> Result<(), OrchestratorError> {
    if request.services.iter().all(|s| s.trim().is_empty()) {
        return Err(OrchestratorError::NoServices);
    }
    if let Some(unknown) = request
        .services
        .iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty() && config.service(s).is_none())
    {
        return Err(OrchestratorError::UnknownService {
            name: unknown.to_string(),
        });
    }
    derive_revision(request.revision.as_deref(), request.commit_sha.as_deref())?;
    Ok(())
}

async fn orchestrator(config: &DeployConfig, token: Option<String>) -> Result<ReleaseOrchestrator> {
    require_tool(names::DOCKER)?;
    require_tool(names::SKOPEO)?;

    let organization = config
        .registry
        .organization()
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "registry.organization".to_string(),
            value: config.registry.base.clone(),
        })?;
    let token = RegistryCredentials::discover_token(token)?;
    let registry = SkopeoRegistry::new(RegistryCredentials::new(organization, token))
        .with_retries(config.registry.retries);
    let publisher = ImagePublisher::new(Arc::new(DockerBuilder::new()), Arc::new(registry));

    let platform = Arc::new(KubernetesPlatform::connect(&config.namespace).await?);
    let store = Arc::new(ReleaseStore::open(config.state_dir()).await?);

    let mut orchestrator = ReleaseOrchestrator::new(publisher, platform, store)
        .with_tracker(ReleaseTracker::from_env());

    for service in &config.services {
        orchestrator =
            orchestrator.with_target(&service.name, DeployTarget::from_config(config, service)?);
    }

    if let Some(migration) = &config.migration {
        require_tool(names::KUBECTL)?;
        let secrets: Arc<dyn SecretRegistry> = Arc::new(
            FileSecretRegistry::open(config.secrets_path())
                .context("Failed to open secret registry")?,
        );
        let runner = MigrationRunner::new(
            Arc::new(KubectlJobExecutor::new(&config.namespace)),
            secrets,
            migration.command.clone(),
        )
        .with_timeout(migration.timeout()?);

        orchestrator = orchestrator.with_migration(MigrationStage {
            service: migration.service.clone(),
            runner,
            database: DatabaseConnection {
                secret: SecretSelector::parse(&migration.database_secret)?,
                env_var: migration.env_var.clone(),
            },
        });
    }

    Ok(orchestrator)
}

/// Start a release and wait for it to finish
pub async fn start(config: &DeployConfig, request: ReleaseRequest, token: Option<String>) -> Result<()> {
    precheck(config, &request)?;

    let orchestrator = orchestrator(config, token).await?;
    let release = orchestrator.start(request).await?;

    if release.state == ReleaseState::Succeeded {
        return Ok(());
    }

    print_rollback_hint(&release);
    match &release.failure {
        Some(failure) => bail!("Release {} failed at {}", release.id, failure.stage),
        None => bail!("Release {} did not succeed", release.id),
    }
}

async fn open_store(config: &DeployConfig) -> Result<ReleaseStore> {
    Ok(ReleaseStore::open(config.state_dir()).await?)
}

async fn find(store: &ReleaseStore, id: &str) -> Result<Release> {
    Ok(store
        .find(id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound { id: id.to_string() })?)
}

/// Show one release in detail
pub async fn status(config: &DeployConfig, id: &str, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let release = find(&store, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&release)?);
        return Ok(());
    }

    ui::print_header(&format!("Release {}", release.revision_id));
    ui::print_field("Release", &release.id.to_string());
    ui::print_field("State", &ui::status(release.state.name()).to_string());
    ui::print_field("Services", &release.services.join(", "));
    if let Some(commit) = &release.commit_sha {
        ui::print_field("Commit", commit);
    }
    ui::print_field("Created", &release.created_at.to_rfc3339());
    if let Some(finished) = release.finished_at {
        ui::print_field("Finished", &finished.to_rfc3339());
    }
    if release.cancel_requested && !release.cancelled {
        ui::print_warning("Cancellation requested; takes effect at the next stage boundary");
    }

    println!();
    println!("   Stages:");
    for record in Stage::ALL.map(|stage| release.stage(stage)) {
        println!(
            "   {} {:<8} {:<10} {}",
            record.stage.emoji(),
            record.stage.name(),
            ui::status(record.status.name()),
            record.message.as_deref().unwrap_or("").lines().next().unwrap_or("")
        );
    }

    if !release.artifacts.is_empty() {
        println!();
        println!("   Artifacts:");
        for artifact in release.artifacts.values() {
            let note = if artifact.reused { " (reused)" } else { "" };
            println!("   {:<16} {}{}", artifact.service, artifact.pinned_ref(), note);
        }
    }

    println!();
    println!("   Services:");
    for outcome in release.outcomes.values() {
        let detail = outcome
            .failure
            .as_ref()
            .map(|f| format!(" - {}", f))
            .unwrap_or_default();
        println!(
            "   {:<16} {}{}",
            outcome.service,
            ui::status(outcome.status.name()),
            detail
        );
        let skip = outcome.health_checks.len().saturating_sub(STATUS_HEALTH_SAMPLES);
        for sample in &outcome.health_checks[skip..] {
            let error = sample
                .error
                .as_deref()
                .map(|e| format!(" error: {}", e))
                .unwrap_or_default();
            println!(
                "      {} {}/{} healthy, {} running{}",
                sample.at.format("%H:%M:%S"),
                sample.healthy,
                sample.desired,
                sample.running,
                error
            );
        }
    }

    if let Some(migration) = &release.migration {
        println!();
        println!("   Migration: {}", migration.summary());
        if !migration.logs.trim().is_empty() {
            for line in migration.logs.lines() {
                println!("      {}", line);
            }
        }
    }

    if let Some(failure) = &release.failure {
        println!();
        ui::print_error(&format!("Failed at {}: {}", failure.stage, failure.message));
        print_rollback_hint(&release);
    }
    println!();
    Ok(())
}

/// List recent releases and the active revision of each service
pub async fn list(config: &DeployConfig, limit: usize) -> Result<()> {
    let store = open_store(config).await?;
    let releases = store.list().await?;

    ui::print_header(&format!("Releases: {}", config.name));
    if releases.is_empty() {
        ui::print_info("No releases yet");
    }
    for release in releases.iter().take(limit) {
        let id = release.id.to_string();
        println!(
            "   {}  {:<14} {:<10} {:<20} {}",
            &id[..8],
            release.revision_id,
            ui::status(release.state.name()),
            release.services.join(","),
            release.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let revisions = store.revisions().await?;
    if !revisions.is_empty() {
        println!();
        println!("   Active revisions:");
        for revision in revisions.values() {
            println!(
                "   {:<16} {:<14} x{:<3} {}",
                revision.service,
                revision.revision_id,
                revision.task_count,
                ui::status(&revision.health.to_string())
            );
        }
    }
    println!();
    Ok(())
}

/// Request cancellation, or with `force` fail the record immediately
pub async fn cancel(config: &DeployConfig, id: &str, force: bool) -> Result<Release> {
    let store = open_store(config).await?;
    let mut release = find(&store, id).await?;

    if release.state.is_terminal() {
        ui::print_warning(&format!(
            "Release {} already finished ({})",
            release.id, release.state
        ));
        return Ok(release);
    }

    if force {
        let next = Stage::ALL
            .into_iter()
            .find(|stage| !release.stage(*stage).status.is_finished())
            .unwrap_or(Stage::Verify);
        release.cancel_requested = true;
        release.cancel(next);
        store.save(&release).await?;
        info!(release_id = %release.id, "Release marked as cancelled");
        ui::print_success(&format!("Release {} marked as cancelled", release.id));
        return Ok(release);
    }

    let release = store
        .request_cancel(&release.id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound { id: id.to_string() })?;
    ui::print_success(&format!(
        "Cancellation requested for {}; it stops before its next stage",
        release.id
    ));
    Ok(release)
}

fn print_rollback_hint(release: &Release) {
    if let Some(target) = &release.rollback_target {
        ui::print_info(&format!(
            "Last good revision is {} (release {}). To roll back:\n   harbor release start --services={} --revision={}",
            target.revision_id,
            target.release_id,
            release.services.join(","),
            target.revision_id
        ));
    }
}
