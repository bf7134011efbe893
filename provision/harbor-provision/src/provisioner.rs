//! Provisioner
//!
//! Walks the resource graph in dependency order and converges live
//! infrastructure to the declared definitions, one resource at a time.
//! A failure halts the walk; resources already applied stay applied and the
//! next `apply` picks up where this one stopped.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::driver::{ApplyRequest, ResourceDriver};
use crate::error::{ProvisionError, SecretError};
use crate::graph::{Resource, ResourceGraph, ResourceKind, ResourceState};
use crate::secrets::{SecretRef, SecretRegistry, SecretValue};

/// What a plan would do to one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
            Self::NoOp => "no-op",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub resource: String,
    pub kind: ResourceKind,
    pub action: PlanAction,
}

/// Outcome of a successful `apply`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Resources that required a side effect, in the order applied
    pub applied: Vec<String>,
    /// Resources whose live state already matched
    pub unchanged: Vec<String>,
}

impl ApplyReport {
    pub fn is_converged(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Outcome of a successful `destroy`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DestroyReport {
    pub destroyed: Vec<String>,
    /// Resources that had no live state to tear down
    pub absent: Vec<String>,
}

/// Converges a resource graph through a driver
pub struct Provisioner {
    driver: Arc<dyn ResourceDriver>,
    secrets: Arc<dyn SecretRegistry>,
}

/// Declared view of one resource, computed before touching anything
struct Desired {
    fingerprint: String,
    secret_refs: BTreeMap<String, SecretRef>,
    /// Secret resource whose registry entry does not exist yet
    missing_secret: bool,
}

impl Provisioner {
    pub fn new(driver: Arc<dyn ResourceDriver>, secrets: Arc<dyn SecretRegistry>) -> Self {
        Self { driver, secrets }
    }

    /// Report what `apply` would do, without side effects
    pub async fn plan(&self, graph: &ResourceGraph) -> Result<Vec<PlannedChange>, ProvisionError> {
        let mut changes = Vec::with_capacity(graph.len());

        for resource in graph.resolve_order()? {
            let desired = self.desired(resource, true).await?;
            let live = self
                .driver
                .observe(resource)
                .await
                .map_err(|e| failure(resource, e))?;

            let action = match live {
                None => PlanAction::Create,
                Some(_) if desired.missing_secret => PlanAction::Update,
                Some(live) if live.fingerprint != desired.fingerprint => PlanAction::Update,
                Some(_) => PlanAction::NoOp,
            };

            changes.push(PlannedChange {
                resource: resource.name.clone(),
                kind: resource.kind,
                action,
            });
        }

        Ok(changes)
    }

    /// Report what `destroy` would do, dependents first
    pub async fn plan_destroy(
        &self,
        graph: &ResourceGraph,
    ) -> Result<Vec<PlannedChange>, ProvisionError> {
        let mut changes = Vec::with_capacity(graph.len());

        for resource in graph.resolve_order()?.into_iter().rev() {
            let live = self
                .driver
                .observe(resource)
                .await
                .map_err(|e| failure(resource, e))?;

            changes.push(PlannedChange {
                resource: resource.name.clone(),
                kind: resource.kind,
                action: if live.is_some() {
                    PlanAction::Destroy
                } else {
                    PlanAction::NoOp
                },
            });
        }

        Ok(changes)
    }

    /// Bring live infrastructure to the declared state.
    ///
    /// Halts at the first failing resource, which is left `failed`.
    pub async fn apply(&self, graph: &mut ResourceGraph) -> Result<ApplyReport, ProvisionError> {
        let order: Vec<String> = graph
            .resolve_order()?
            .into_iter()
            .map(|r| r.name.clone())
            .collect();

        let mut report = ApplyReport::default();

        for name in order {
            let resource = graph.get(&name)?.clone();

            let desired = match self.desired(&resource, false).await {
                Ok(desired) => desired,
                Err(e) => return Err(self.fail(graph, &resource, e.to_string())),
            };

            let live = match self.driver.observe(&resource).await {
                Ok(live) => live,
                Err(e) => return Err(self.fail(graph, &resource, e.to_string())),
            };

            let converged = !desired.missing_secret
                && live
                    .as_ref()
                    .map(|l| l.fingerprint == desired.fingerprint)
                    .unwrap_or(false);

            if converged {
                graph.transition(&name, ResourceState::Applied)?;
                report.unchanged.push(name);
                continue;
            }

            graph.transition(&name, ResourceState::Applying)?;
            info!(resource = %name, kind = %resource.kind, "Applying resource");

            if desired.missing_secret {
                if let Err(cause) = self.create_secret(&resource).await {
                    return Err(self.fail(graph, &resource, cause));
                }
            }

            let request = ApplyRequest {
                fingerprint: desired.fingerprint,
                secret_refs: desired.secret_refs,
                resource,
            };

            if let Err(e) = self.driver.apply(&request).await {
                return Err(self.fail(graph, &request.resource, e.to_string()));
            }

            graph.transition(&name, ResourceState::Applied)?;
            info!(resource = %name, "Resource applied");
            report.applied.push(name);
        }

        Ok(report)
    }

    /// Tear resources down, dependents before their dependencies.
    ///
    /// Halts at the first failure; everything not yet reached stays live.
    pub async fn destroy(&self, graph: &mut ResourceGraph) -> Result<DestroyReport, ProvisionError> {
        let order: Vec<String> = graph
            .resolve_order()?
            .into_iter()
            .rev()
            .map(|r| r.name.clone())
            .collect();

        let mut report = DestroyReport::default();

        for name in order {
            let resource = graph.get(&name)?.clone();

            let live = match self.driver.observe(&resource).await {
                Ok(live) => live,
                Err(e) => return Err(self.fail(graph, &resource, e.to_string())),
            };

            if live.is_none() {
                graph.transition(&name, ResourceState::Destroyed)?;
                report.absent.push(name);
                continue;
            }

            info!(resource = %name, kind = %resource.kind, "Destroying resource");
            if let Err(e) = self.driver.destroy(&resource).await {
                return Err(self.fail(graph, &resource, e.to_string()));
            }

            graph.transition(&name, ResourceState::Destroyed)?;
            report.destroyed.push(name);
        }

        Ok(report)
    }

    /// Compute fingerprint and secret references for a resource.
    ///
    /// When planning, secrets that do not exist yet are tolerated because an
    /// earlier secret resource in the same run may create them.
    async fn desired(&self, resource: &Resource, planning: bool) -> Result<Desired, SecretError> {
        let mut secret_refs = BTreeMap::new();
        let mut pending = Vec::new();

        for (env, secret_name) in &resource.secrets {
            match self.secrets.latest(secret_name).await {
                Ok(reference) => {
                    secret_refs.insert(env.clone(), reference);
                }
                Err(SecretError::NotFound { .. }) if planning => {
                    pending.push(format!("{}={}@pending", env, secret_name));
                }
                Err(e) => return Err(e),
            }
        }

        let missing_secret = if resource.kind == ResourceKind::Secret {
            match self.secrets.latest(resource.registry_name()).await {
                Ok(_) => false,
                Err(SecretError::NotFound { .. }) => true,
                Err(e) => return Err(e),
            }
        } else {
            false
        };

        Ok(Desired {
            fingerprint: fingerprint(resource, &secret_refs, &pending),
            secret_refs,
            missing_secret,
        })
    }

    /// First version of a secret resource, read from its `value_env`.
    ///
    /// Errors are returned as the failure cause for the resource.
    async fn create_secret(&self, resource: &Resource) -> Result<SecretRef, String> {
        let env = resource.value_env.as_deref().ok_or_else(|| {
            format!(
                "secret {} does not exist and no value_env is configured",
                resource.registry_name()
            )
        })?;

        let value = std::env::var(env)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                format!(
                    "secret {} does not exist and environment variable {} is not set",
                    resource.registry_name(),
                    env
                )
            })?;

        let reference = self
            .secrets
            .put(resource.registry_name(), SecretValue::new(value))
            .await
            .map_err(|e| e.to_string())?;
        info!(resource = %resource.name, secret = %reference, "Created secret");
        Ok(reference)
    }

    fn fail(&self, graph: &mut ResourceGraph, resource: &Resource, cause: String) -> ProvisionError {
        if let Err(e) = graph.transition(&resource.name, ResourceState::Failed) {
            warn!(resource = %resource.name, error = %e, "Could not mark resource failed");
        }
        warn!(resource = %resource.name, cause = %cause, "Resource failed");
        ProvisionError::Failure {
            resource: resource.name.clone(),
            cause,
        }
    }
}

fn failure(resource: &Resource, cause: impl fmt::Display) -> ProvisionError {
    ProvisionError::Failure {
        resource: resource.name.clone(),
        cause: cause.to_string(),
    }
}

/// Stable digest of everything that makes up a resource's declared state
fn fingerprint(
    resource: &Resource,
    secret_refs: &BTreeMap<String, SecretRef>,
    pending: &[String],
) -> String {
    let mut depends_on = resource.depends_on.clone();
    depends_on.sort();

    let refs: BTreeMap<&String, String> = secret_refs
        .iter()
        .map(|(env, r)| (env, r.to_string()))
        .collect();

    let canonical = serde_json::json!({
        "kind": resource.kind.name(),
        "config": resource.config,
        "depends_on": depends_on,
        "secret_refs": refs,
        "pending_secrets": pending,
        "secret_name": resource.secret_name,
        "hooks": resource.hooks,
    });

    format!("{:x}", Sha256::digest(canonical.to_string().as_bytes()))
}
