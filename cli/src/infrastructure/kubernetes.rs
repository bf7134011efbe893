//! Kubernetes adapters
//!
//! - [`KubernetesPlatform`]: compute platform backed by Deployments, via the
//!   kube API.
//! - [`KubectlJobExecutor`]: runs migration tasks as one-shot Jobs via
//!   kubectl. The connection string travels in a short-lived Secret that is
//!   written through stdin and deleted with the Job.

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Config};
use serde_json::{json, Value};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MigrationError, PlatformError};
use crate::services::migration_service::{MigrationExecutor, MigrationTask, TaskOutcome};
use crate::services::rollout_service::{ComputePlatform, ServiceHealth, ServiceTarget};
use crate::tools::{get_tool_path, names};

const FIELD_MANAGER: &str = "harbor";

/// Compute platform backed by Kubernetes Deployments
pub struct KubernetesPlatform {
    client: Client,
    namespace: String,
}

impl KubernetesPlatform {
    /// Connect using the ambient kubeconfig or in-cluster config
    pub async fn connect(namespace: impl Into<String>) -> anyhow::Result<Self> {
        let config = Config::infer()
            .await
            .context("Failed to infer kubeconfig")?;
        let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn api_error(&self, target: &ServiceTarget, e: kube::Error) -> PlatformError {
        match e {
            kube::Error::Api(response) if response.code == 404 => PlatformError::DeploymentNotFound {
                name: target.deployment.clone(),
                namespace: self.namespace.clone(),
            },
            other => PlatformError::Api {
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl ComputePlatform for KubernetesPlatform {
    async fn update_service(
        &self,
        target: &ServiceTarget,
        image: &str,
        desired_count: u32,
    ) -> Result<(), PlatformError> {
        let patch = rollout_patch(&target.container, image, desired_count);
        debug!(service = %target.service, deployment = %target.deployment, "Patching deployment");

        self.deployments()
            .patch(
                &target.deployment,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Strategic(patch),
            )
            .await
            .map_err(|e| self.api_error(target, e))?;

        info!(service = %target.service, image, replicas = desired_count, "Deployment updated");
        Ok(())
    }

    async fn service_health(&self, target: &ServiceTarget) -> Result<ServiceHealth, PlatformError> {
        let deployment = self
            .deployments()
            .get(&target.deployment)
            .await
            .map_err(|e| self.api_error(target, e))?;
        Ok(deployment_health(&deployment))
    }
}

/// Strategic merge patch: containers merge by name, so only the image of
/// the named container changes
fn rollout_patch(container: &str, image: &str, desired_count: u32) -> Value {
    json!({
        "spec": {
            "replicas": desired_count,
            "template": {
                "spec": {
                    "containers": [
                        { "name": container, "image": image }
                    ]
                }
            }
        }
    })
}

/// Task counts for the newest ReplicaSet of a Deployment.
///
/// Nothing counts as healthy until the rollout has settled the way
/// `kubectl rollout status` decides it: the latest spec is observed, every
/// desired replica is updated and no old replicas remain. Available
/// replicas of an unfinished rollout may still be old pods.
fn deployment_health(deployment: &Deployment) -> ServiceHealth {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
        .max(0) as u32;

    let Some(status) = deployment.status.as_ref() else {
        return ServiceHealth {
            desired,
            running: 0,
            healthy: 0,
        };
    };

    let running = status.replicas.unwrap_or(0).max(0) as u32;
    let generation = deployment.metadata.generation.unwrap_or(0);
    let observed = status.observed_generation.unwrap_or(0);
    if observed < generation {
        return ServiceHealth {
            desired,
            running,
            healthy: 0,
        };
    }

    let updated = status.updated_replicas.unwrap_or(0).max(0) as u32;
    let available = status.available_replicas.unwrap_or(0).max(0) as u32;
    let settled = updated >= desired && running == updated;
    ServiceHealth {
        desired,
        running,
        healthy: if settled { updated.min(available) } else { 0 },
    }
}

/// Runs migration tasks as Kubernetes Jobs through kubectl
pub struct KubectlJobExecutor {
    namespace: String,
    binary: String,
    poll_interval: Duration,
}

impl KubectlJobExecutor {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            binary: get_tool_path(names::KUBECTL),
            poll_interval: Duration::from_secs(2),
        }
    }

    async fn kubectl(&self, task: &MigrationTask, args: &[&str]) -> Result<Output, MigrationError> {
        Command::new(&self.binary)
            .args(args)
            .args(["-n", &self.namespace])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MigrationError::Monitor {
                task: task.name.clone(),
                message: format!("failed to run kubectl: {}", e),
            })
    }

    /// Delete the task's Job and Secret. With `wait`, block until both are
    /// gone so a Job of the same name can be created right after.
    async fn delete(&self, task: &MigrationTask, wait: bool) -> Result<(), MigrationError> {
        let secret = secret_name(task);
        for (kind, name) in [("job", task.name.as_str()), ("secret", secret.as_str())] {
            let output = self.kubectl(task, &delete_args(kind, name, wait)).await?;
            if !output.status.success() {
                return Err(MigrationError::Cleanup {
                    task: task.name.clone(),
                    message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
        }
        Ok(())
    }

    async fn apply(&self, task: &MigrationTask) -> Result<(), MigrationError> {
        let manifest = job_manifest(task, &self.namespace);
        let launch_error = |message: String| MigrationError::Launch {
            task: task.name.clone(),
            message,
        };

        let mut child = Command::new(&self.binary)
            .args(["apply", "-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| launch_error(format!("failed to spawn kubectl: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(manifest.to_string().as_bytes())
                .await
                .map_err(|e| launch_error(format!("failed to write manifest: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| launch_error(format!("failed to wait for kubectl: {}", e)))?;

        if !output.status.success() {
            return Err(launch_error(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    /// Wait for the Job to finish; true when it completed
    async fn wait(&self, task: &MigrationTask) -> Result<bool, MigrationError> {
        loop {
            let output = self.kubectl(task, &["get", "job", &task.name, "-o", "json"]).await?;
            if !output.status.success() {
                return Err(MigrationError::Monitor {
                    task: task.name.clone(),
                    message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }

            let job: Value = serde_json::from_slice(&output.stdout).map_err(|e| MigrationError::Monitor {
                task: task.name.clone(),
                message: format!("unreadable job status: {}", e),
            })?;

            if let Some(finished) = job_finished(&job) {
                return Ok(finished);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn logs(&self, task: &MigrationTask) -> String {
        match self
            .kubectl(task, &["logs", &format!("job/{}", task.name), "--tail=500"])
            .await
        {
            Ok(output) => String::from_utf8_lossy(&output.stdout).into_owned(),
            Err(e) => format!("<logs unavailable: {}>", e),
        }
    }

    async fn exit_code(&self, task: &MigrationTask) -> Option<i32> {
        let output = self
            .kubectl(
                task,
                &[
                    "get",
                    "pods",
                    "-l",
                    &format!("job-name={}", task.name),
                    "-o",
                    "jsonpath={.items[0].status.containerStatuses[0].state.terminated.exitCode}",
                ],
            )
            .await
            .ok()?;
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }
}

#[async_trait]
impl MigrationExecutor for KubectlJobExecutor {
    async fn execute(&self, task: &MigrationTask) -> Result<TaskOutcome, MigrationError> {
        self.delete(task, true).await?;
        self.apply(task).await?;
        info!(task = %task.name, namespace = %self.namespace, "Migration job created");

        let completed = self.wait(task).await?;
        let logs = self.logs(task).await;
        let exit_code = match self.exit_code(task).await {
            Some(code) => Some(code),
            None if completed => Some(0),
            None => None,
        };

        if let Err(e) = self.delete(task, false).await {
            warn!(task = %task.name, error = %e, "Failed to clean up migration job");
        }

        Ok(TaskOutcome { exit_code, logs })
    }

    async fn abort(&self, task: &MigrationTask) -> Result<(), MigrationError> {
        self.delete(task, false).await
    }
}

fn delete_args<'a>(kind: &'a str, name: &'a str, wait: bool) -> Vec<&'a str> {
    let mut args = vec!["delete", kind, name, "--ignore-not-found"];
    if wait {
        // Foreground so the Job's pods are gone too before it is recreated
        args.extend(["--wait=true", "--cascade=foreground", "--timeout=120s"]);
    } else {
        args.push("--wait=false");
    }
    args
}

fn secret_name(task: &MigrationTask) -> String {
    format!("{}-env", task.name)
}

/// `Some(true)` once complete, `Some(false)` once failed, `None` while running
fn job_finished(job: &Value) -> Option<bool> {
    let conditions = job["status"]["conditions"].as_array()?;
    conditions.iter().find_map(|c| {
        if c["status"] != "True" {
            return None;
        }
        match c["type"].as_str() {
            Some("Complete") => Some(true),
            Some("Failed") => Some(false),
            _ => None,
        }
    })
}

/// Secret + Job as a kubectl `List`
fn job_manifest(task: &MigrationTask, namespace: &str) -> Value {
    let secret = secret_name(task);
    let env: serde_json::Map<String, Value> = task
        .env
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.expose().to_string())))
        .collect();

    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [
            {
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": { "name": secret, "namespace": namespace },
                "type": "Opaque",
                "stringData": env
            },
            {
                "apiVersion": "batch/v1",
                "kind": "Job",
                "metadata": {
                    "name": task.name,
                    "namespace": namespace,
                    "labels": { "app.kubernetes.io/managed-by": "harbor" }
                },
                "spec": {
                    "backoffLimit": 0,
                    "ttlSecondsAfterFinished": 300,
                    "template": {
                        "spec": {
                            "restartPolicy": "Never",
                            "containers": [
                                {
                                    "name": "migrate",
                                    "image": task.image,
                                    "command": task.command,
                                    "envFrom": [ { "secretRef": { "name": secret } } ]
                                }
                            ]
                        }
                    }
                }
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_provision::SecretValue;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use kube::api::ObjectMeta;

    fn deployment(generation: i64, status: DeploymentStatus) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("api".into()),
                generation: Some(generation),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..Default::default()
            }),
            status: Some(status),
        }
    }

    #[test]
    fn test_health_counts_settled_rollout() {
        let health = deployment_health(&deployment(
            3,
            DeploymentStatus {
                observed_generation: Some(3),
                replicas: Some(2),
                updated_replicas: Some(2),
                available_replicas: Some(2),
                ..Default::default()
            },
        ));
        assert_eq!(
            health,
            ServiceHealth {
                desired: 2,
                running: 2,
                healthy: 2
            }
        );
    }

    #[test]
    fn test_old_pods_do_not_count_during_rollout() {
        // surge: one new pod not ready yet, old pods still serving
        let health = deployment_health(&deployment(
            5,
            DeploymentStatus {
                observed_generation: Some(5),
                replicas: Some(3),
                updated_replicas: Some(1),
                available_replicas: Some(2),
                unavailable_replicas: Some(1),
                ..Default::default()
            },
        ));
        assert_eq!(health.healthy, 0);
        assert_eq!(health.running, 3);

        // all updated, but an old pod is still terminating
        let health = deployment_health(&deployment(
            5,
            DeploymentStatus {
                observed_generation: Some(5),
                replicas: Some(3),
                updated_replicas: Some(2),
                available_replicas: Some(3),
                ..Default::default()
            },
        ));
        assert_eq!(health.healthy, 0);
    }

    #[test]
    fn test_settled_rollout_reports_only_available_pods() {
        let health = deployment_health(&deployment(
            2,
            DeploymentStatus {
                observed_generation: Some(2),
                replicas: Some(2),
                updated_replicas: Some(2),
                available_replicas: Some(1),
                ..Default::default()
            },
        ));
        assert_eq!(health.healthy, 1);
    }

    #[test]
    fn test_health_is_zero_until_spec_observed() {
        let health = deployment_health(&deployment(
            4,
            DeploymentStatus {
                observed_generation: Some(3),
                replicas: Some(2),
                updated_replicas: Some(2),
                available_replicas: Some(2),
                ..Default::default()
            },
        ));
        assert_eq!(health.healthy, 0);
        assert_eq!(health.running, 2);
    }

    #[test]
    fn test_rollout_patch_targets_named_container() {
        let patch = rollout_patch("web", "ghcr.io/org/shop/web:abc123@sha256:ff", 3);
        assert_eq!(patch["spec"]["replicas"], 3);
        let container = &patch["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["name"], "web");
        assert_eq!(container["image"], "ghcr.io/org/shop/web:abc123@sha256:ff");
    }

    #[test]
    fn test_delete_before_launch_waits_for_removal() {
        let before = delete_args("job", "api-migrate-abc123", true);
        assert!(before.contains(&"--wait=true"));
        assert!(!before.contains(&"--wait=false"));
        assert!(before.contains(&"--ignore-not-found"));

        let after = delete_args("job", "api-migrate-abc123", false);
        assert!(after.contains(&"--wait=false"));
        assert!(!after.contains(&"--wait=true"));
    }

    #[test]
    fn test_job_finished_conditions() {
        assert_eq!(job_finished(&json!({ "status": {} })), None);
        assert_eq!(
            job_finished(&json!({ "status": { "conditions": [ { "type": "Complete", "status": "True" } ] } })),
            Some(true)
        );
        assert_eq!(
            job_finished(&json!({ "status": { "conditions": [ { "type": "Failed", "status": "True" } ] } })),
            Some(false)
        );
        assert_eq!(
            job_finished(&json!({ "status": { "conditions": [ { "type": "Complete", "status": "False" } ] } })),
            None
        );
    }

    #[test]
    fn test_job_manifest_keeps_secret_out_of_the_job() {
        let task = MigrationTask {
            name: "api-migrate-abc123".into(),
            image: "ghcr.io/org/shop/api:abc123@sha256:ff".into(),
            command: vec!["bin/rails".into(), "db:migrate".into()],
            env: vec![("DATABASE_URL".into(), SecretValue::new("postgres://u:p@db/shop"))],
        };
        let manifest = job_manifest(&task, "shop");

        let secret = &manifest["items"][0];
        assert_eq!(secret["metadata"]["name"], "api-migrate-abc123-env");
        assert_eq!(secret["stringData"]["DATABASE_URL"], "postgres://u:p@db/shop");

        let job = &manifest["items"][1];
        assert_eq!(job["spec"]["backoffLimit"], 0);
        let job_json = job.to_string();
        assert!(!job_json.contains("postgres://"));
        assert!(job_json.contains("api-migrate-abc123-env"));
    }
}
