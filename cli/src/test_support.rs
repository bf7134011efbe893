//! In-memory fakes for the service seams

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::{Artifact, ImageRef};
use crate::error::{BuildError, MigrationError, PlatformError, RegistryError};
use crate::infrastructure::ReleaseStore;
use crate::services::migration_service::{MigrationExecutor, MigrationTask, TaskOutcome};
use crate::services::publisher::{ArtifactRegistry, BuildContext, ImageBuilder};
use crate::services::rollout_service::{ComputePlatform, ServiceHealth, ServiceTarget};

pub fn artifact(service: &str, revision: &str) -> Artifact {
    Artifact {
        service: service.to_string(),
        revision_id: revision.to_string(),
        image: ImageRef::new(format!("ghcr.io/myorg/shop/{}", service), revision),
        digest: format!("sha256:{}", revision),
        published_at: Utc::now(),
        reused: false,
    }
}

#[derive(Default)]
pub struct FakeBuilder {
    builds: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
}

impl FakeBuilder {
    pub async fn builds(&self) -> Vec<String> {
        self.builds.lock().await.clone()
    }

    pub async fn fail_with(&self, logs: &str) {
        *self.failure.lock().await = Some(logs.to_string());
    }
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn build(&self, _context: &BuildContext, image: &ImageRef) -> Result<(), BuildError> {
        if let Some(logs) = self.failure.lock().await.clone() {
            return Err(BuildError {
                exit_code: Some(1),
                logs,
            });
        }
        self.builds.lock().await.push(image.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    published: Mutex<HashMap<String, String>>,
    pushes: Mutex<usize>,
    fail_pushes: Mutex<bool>,
}

impl FakeRegistry {
    pub async fn pushes(&self) -> usize {
        *self.pushes.lock().await
    }

    pub async fn fail_pushes(&self) {
        *self.fail_pushes.lock().await = true;
    }
}

#[async_trait]
impl ArtifactRegistry for FakeRegistry {
    async fn lookup(&self, image: &ImageRef) -> Result<Option<String>, RegistryError> {
        Ok(self.published.lock().await.get(&image.to_string()).cloned())
    }

    async fn push(&self, image: &ImageRef) -> Result<String, RegistryError> {
        if *self.fail_pushes.lock().await {
            return Err(RegistryError::PushFailed {
                attempts: 3,
                message: "connection reset".to_string(),
            });
        }
        *self.pushes.lock().await += 1;
        let digest = format!("sha256:{}", image.tag);
        self.published
            .lock()
            .await
            .insert(image.to_string(), digest.clone());
        Ok(digest)
    }
}

enum ExecutorBehaviour {
    Exit(i32, String),
    Hang,
}

pub struct FakeExecutor {
    behaviour: ExecutorBehaviour,
    tasks: Mutex<Vec<MigrationTask>>,
    aborted: Mutex<Vec<String>>,
    cancel_through: Mutex<Option<Arc<ReleaseStore>>>,
}

impl FakeExecutor {
    fn with(behaviour: ExecutorBehaviour) -> Self {
        Self {
            behaviour,
            tasks: Mutex::new(Vec::new()),
            aborted: Mutex::new(Vec::new()),
            cancel_through: Mutex::new(None),
        }
    }

    /// While running, request cancellation of every unfinished release in
    /// `store`, as an operator would from another shell
    pub async fn cancel_through(&self, store: Arc<ReleaseStore>) {
        *self.cancel_through.lock().await = Some(store);
    }

    pub fn succeeding(logs: &str) -> Self {
        Self::with(ExecutorBehaviour::Exit(0, logs.to_string()))
    }

    pub fn exiting(code: i32, logs: &str) -> Self {
        Self::with(ExecutorBehaviour::Exit(code, logs.to_string()))
    }

    pub fn hanging() -> Self {
        Self::with(ExecutorBehaviour::Hang)
    }

    pub async fn last_task(&self) -> Option<MigrationTask> {
        self.tasks.lock().await.last().cloned()
    }

    pub async fn aborted(&self) -> Vec<String> {
        self.aborted.lock().await.clone()
    }
}

#[async_trait]
impl MigrationExecutor for FakeExecutor {
    async fn execute(&self, task: &MigrationTask) -> Result<TaskOutcome, MigrationError> {
        self.tasks.lock().await.push(task.clone());
        if let Some(store) = self.cancel_through.lock().await.clone() {
            for release in store.list().await.unwrap() {
                if !release.state.is_terminal() {
                    store.request_cancel(&release.id).await.unwrap();
                }
            }
        }
        match &self.behaviour {
            ExecutorBehaviour::Exit(code, logs) => Ok(TaskOutcome {
                exit_code: Some(*code),
                logs: logs.clone(),
            }),
            ExecutorBehaviour::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn abort(&self, task: &MigrationTask) -> Result<(), MigrationError> {
        self.aborted.lock().await.push(task.name.clone());
        Ok(())
    }
}

/// How a fake service responds to health polls
#[derive(Debug, Clone, Copy)]
pub enum HealthScript {
    /// Fully healthy from the nth poll on
    HealthyAfter(u32),
    NeverHealthy,
    Erroring,
}

#[derive(Default)]
pub struct FakePlatform {
    scripts: Mutex<HashMap<String, HealthScript>>,
    polls: Mutex<HashMap<String, u32>>,
    desired: Mutex<HashMap<String, u32>>,
    failing_updates: Mutex<HashSet<String>>,
    slow_updates: Mutex<HashMap<String, Duration>>,
    updates: Mutex<Vec<(String, String)>>,
    accepted_at: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl FakePlatform {
    pub async fn script(&self, service: &str, script: HealthScript) {
        self.scripts.lock().await.insert(service.to_string(), script);
    }

    pub async fn fail_updates(&self, service: &str) {
        self.failing_updates.lock().await.insert(service.to_string());
    }

    /// Hold every update to `service` for `delay` before accepting it
    pub async fn delay_updates(&self, service: &str, delay: Duration) {
        self.slow_updates.lock().await.insert(service.to_string(), delay);
    }

    /// When the last update to `service` was accepted
    pub async fn accepted_at(&self, service: &str) -> Option<DateTime<Utc>> {
        self.accepted_at.lock().await.get(service).copied()
    }

    /// `(service, image)` for every accepted update
    pub async fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().await.clone()
    }
}

#[async_trait]
impl ComputePlatform for FakePlatform {
    async fn update_service(
        &self,
        target: &ServiceTarget,
        image: &str,
        desired_count: u32,
    ) -> Result<(), PlatformError> {
        if self.failing_updates.lock().await.contains(&target.service) {
            return Err(PlatformError::Api {
                message: format!("deployments.apps \"{}\" is forbidden", target.deployment),
            });
        }
        let delay = self.slow_updates.lock().await.get(&target.service).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.desired
            .lock()
            .await
            .insert(target.service.clone(), desired_count);
        self.accepted_at
            .lock()
            .await
            .insert(target.service.clone(), Utc::now());
        self.updates
            .lock()
            .await
            .push((target.service.clone(), image.to_string()));
        Ok(())
    }

    async fn service_health(&self, target: &ServiceTarget) -> Result<ServiceHealth, PlatformError> {
        let script = self
            .scripts
            .lock()
            .await
            .get(&target.service)
            .copied()
            .unwrap_or(HealthScript::HealthyAfter(1));
        let desired = self
            .desired
            .lock()
            .await
            .get(&target.service)
            .copied()
            .unwrap_or(1);
        let poll = {
            let mut polls = self.polls.lock().await;
            let count = polls.entry(target.service.clone()).or_insert(0);
            *count += 1;
            *count
        };

        match script {
            HealthScript::HealthyAfter(n) if poll >= n => Ok(ServiceHealth {
                desired,
                running: desired,
                healthy: desired,
            }),
            HealthScript::HealthyAfter(_) | HealthScript::NeverHealthy => Ok(ServiceHealth {
                desired,
                running: desired,
                healthy: 0,
            }),
            HealthScript::Erroring => Err(PlatformError::Api {
                message: "connection refused".to_string(),
            }),
        }
    }
}
