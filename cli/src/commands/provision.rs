//! Provision commands: plan, apply and destroy the declared resources.
//!
//! Resources come from the definitions file named in harbor.yaml; live
//! state and secrets are kept under the state directory.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use harbor_provision::{
    ApplyReport, DestroyReport, FileSecretRegistry, LocalStateDriver, PlanAction, PlannedChange,
    Provisioner, ResourceDefinitions, ResourceGraph,
};

use crate::config::DeployConfig;
use crate::ui;

fn load(config: &DeployConfig) -> Result<(ResourceGraph, Provisioner)> {
    let path = config.resources_path();
    let graph = ResourceDefinitions::load(&path)?.into_graph()?;
    info!(path = %path.display(), resources = graph.len(), "Loaded resource definitions");

    let driver = LocalStateDriver::open(config.provision_state_path())
        .context("Failed to open provisioning state")?;
    let secrets =
        FileSecretRegistry::open(config.secrets_path()).context("Failed to open secret registry")?;

    Ok((graph, Provisioner::new(Arc::new(driver), Arc::new(secrets))))
}

/// Show what apply (or destroy) would do
pub async fn plan(config: &DeployConfig, destroy: bool) -> Result<Vec<PlannedChange>> {
    let (graph, provisioner) = load(config)?;

    let changes = if destroy {
        provisioner.plan_destroy(&graph).await?
    } else {
        provisioner.plan(&graph).await?
    };

    ui::print_header(&format!("Plan: {}", config.name));
    for change in &changes {
        println!(
            "   {:<8} {:<16} {}",
            ui::status(&change.action.to_string()),
            change.kind.name(),
            change.resource
        );
    }

    let pending = changes
        .iter()
        .filter(|c| c.action != PlanAction::NoOp)
        .count();
    println!();
    if pending == 0 {
        ui::print_success("Infrastructure is up to date");
    } else {
        ui::print_info(&format!("{} of {} resources would change", pending, changes.len()));
    }

    Ok(changes)
}

/// Converge every resource, dependencies first
pub async fn apply(config: &DeployConfig) -> Result<ApplyReport> {
    let (mut graph, provisioner) = load(config)?;
    ui::print_header(&format!("Provision: {}", config.name));

    let result = provisioner.apply(&mut graph).await;
    print_states(&graph);
    let report = result.context("Provisioning halted; fix the cause and re-run apply")?;

    if report.is_converged() {
        ui::print_success("Already converged, nothing to do");
    } else {
        ui::print_success(&format!(
            "Applied {} resource(s), {} unchanged",
            report.applied.len(),
            report.unchanged.len()
        ));
    }
    Ok(report)
}

/// Tear down every resource, dependents first
pub async fn destroy(config: &DeployConfig) -> Result<DestroyReport> {
    let (mut graph, provisioner) = load(config)?;
    ui::print_header(&format!("Destroy: {}", config.name));

    let result = provisioner.destroy(&mut graph).await;
    print_states(&graph);
    let report = result.context("Destroy halted; fix the cause and re-run destroy")?;

    ui::print_success(&format!(
        "Destroyed {} resource(s), {} already absent",
        report.destroyed.len(),
        report.absent.len()
    ));
    Ok(report)
}

fn print_states(graph: &ResourceGraph) {
    for resource in graph.resolve_order().unwrap_or_default() {
        println!(
            "   {:<10} {:<16} {}",
            ui::status(&resource.state().to_string()),
            resource.kind.name(),
            resource.name
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_provision::{ProvisionError, SecretRegistry};

    const HARBOR_YAML: &str = r#"
name: shop
registry:
  base: ghcr.io/myorg/shop
services:
  - name: api
"#;

    fn workspace(resources: &str) -> (tempfile::TempDir, DeployConfig) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("infra")).unwrap();
        std::fs::write(dir.path().join("harbor.yaml"), HARBOR_YAML).unwrap();
        std::fs::write(dir.path().join("infra/resources.yaml"), resources).unwrap();
        let config = DeployConfig::load(dir.path().join("harbor.yaml")).unwrap();
        (dir, config)
    }

    const RESOURCES: &str = r#"
resources:
  - name: network
    kind: network
  - name: database
    kind: database
    depends_on: [network]
  - name: api
    kind: compute-service
    depends_on: [database]
    secrets:
      DATABASE_URL: shop/database-url
  - name: database-url
    kind: secret
    secret_name: shop/database-url
    value_env: HARBOR_TEST_CMD_DATABASE_URL
"#;

    #[tokio::test]
    async fn test_apply_then_plan_is_up_to_date() {
        std::env::set_var("HARBOR_TEST_CMD_DATABASE_URL", "postgres://db/shop");
        let (_dir, config) = workspace(RESOURCES);

        let before = plan(&config, false).await.unwrap();
        assert!(before.iter().all(|c| c.action == PlanAction::Create));

        let report = apply(&config).await.unwrap();
        assert_eq!(report.applied.len(), 4);
        let position = |name: &str| report.applied.iter().position(|r| r == name).unwrap();
        assert!(position("network") < position("database"));
        assert!(position("database-url") < position("api"));

        let after = plan(&config, false).await.unwrap();
        assert!(after.iter().all(|c| c.action == PlanAction::NoOp));
        assert!(apply(&config).await.unwrap().is_converged());

        let secrets = FileSecretRegistry::open(config.secrets_path()).unwrap();
        assert_eq!(secrets.latest("shop/database-url").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_destroy_plan_is_reversed() {
        std::env::set_var("HARBOR_TEST_CMD_DATABASE_URL", "postgres://db/shop");
        let (_dir, config) = workspace(RESOURCES);
        apply(&config).await.unwrap();

        let changes = plan(&config, true).await.unwrap();
        assert_eq!(changes.first().unwrap().resource, "api");
        assert!(changes.iter().all(|c| c.action == PlanAction::Destroy));

        let report = destroy(&config).await.unwrap();
        assert_eq!(report.destroyed.len(), 4);
        assert!(plan(&config, false)
            .await
            .unwrap()
            .iter()
            .all(|c| c.action == PlanAction::Create));
    }

    #[tokio::test]
    async fn test_cycle_is_an_invalid_invocation() {
        let (_dir, config) = workspace(
            r#"
resources:
  - name: a
    kind: network
    depends_on: [b]
  - name: b
    kind: network
    depends_on: [a]
"#,
        );

        let err = apply(&config).await.unwrap_err();
        assert!(crate::error::is_invalid_invocation(&err));
    }

    #[tokio::test]
    async fn test_failing_resource_halts_apply() {
        let (_dir, config) = workspace(
            r#"
resources:
  - name: network
    kind: network
  - name: database
    kind: database
    depends_on: [network]
    apply: ["sh", "-c", "echo quota exceeded >&2; exit 1"]
  - name: api
    kind: compute-service
    depends_on: [database]
"#,
        );

        let err = apply(&config).await.unwrap_err();
        assert!(!crate::error::is_invalid_invocation(&err));
        let failure = err
            .chain()
            .find_map(|c| c.downcast_ref::<ProvisionError>())
            .unwrap();
        assert!(matches!(failure, ProvisionError::Failure { resource, .. } if resource == "database"));

        // The dependency that succeeded is recorded; the dependent never ran
        let changes = plan(&config, false).await.unwrap();
        let action = |name: &str| changes.iter().find(|c| c.resource == name).unwrap().action;
        assert_eq!(action("network"), PlanAction::NoOp);
        assert_eq!(action("api"), PlanAction::Create);
    }
}
