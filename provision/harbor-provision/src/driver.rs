//! Resource drivers
//!
//! A driver performs the side effects for one resource: it reports the
//! live fingerprint of what was last applied, applies a new definition and
//! tears a resource down. [`LocalStateDriver`] keeps live state in a JSON
//! file and delegates the real work to optional per-resource hook commands.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DriverError;
use crate::graph::{Resource, ResourceKind};
use crate::secrets::SecretRef;

/// What the driver last applied for a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveState {
    pub kind: ResourceKind,
    pub fingerprint: String,
    #[serde(default)]
    pub secret_refs: BTreeMap<String, SecretRef>,
    pub applied_at: DateTime<Utc>,
}

/// Everything a driver needs to converge one resource
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub resource: Resource,
    pub fingerprint: String,
    /// Environment variable name -> secret reference (never the value)
    pub secret_refs: BTreeMap<String, SecretRef>,
}

/// Side-effecting half of the provisioner
#[async_trait]
pub trait ResourceDriver: Send + Sync {
    /// Live state of a resource, `None` if it does not exist
    async fn observe(&self, resource: &Resource) -> Result<Option<LiveState>, DriverError>;

    /// Create or update a resource to match the request
    async fn apply(&self, request: &ApplyRequest) -> Result<(), DriverError>;

    /// Tear a resource down
    async fn destroy(&self, resource: &Resource) -> Result<(), DriverError>;
}

#[derive(Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    resources: BTreeMap<String, LiveState>,
}

/// Driver that records live state in `provision-state.json` and runs hooks
pub struct LocalStateDriver {
    path: PathBuf,
    state: Mutex<BTreeMap<String, LiveState>>,
}

impl LocalStateDriver {
    /// Open the state file, starting empty if it does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref().to_path_buf();
        let resources = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                DriverError::State(format!("failed to read {}: {}", path.display(), e))
            })?;
            let file: StateFile = serde_json::from_str(&content).map_err(|e| {
                DriverError::State(format!("failed to parse {}: {}", path.display(), e))
            })?;
            file.resources
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            state: Mutex::new(resources),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, resources: &BTreeMap<String, LiveState>) -> Result<(), DriverError> {
        let file = StateFile {
            resources: resources.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| DriverError::State(format!("failed to serialize state: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DriverError::State(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| DriverError::State(format!("failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            DriverError::State(format!("failed to replace {}: {}", self.path.display(), e))
        })
    }

    async fn run_hook(
        &self,
        action: &str,
        command: &[String],
        resource: &Resource,
        secret_refs: &BTreeMap<String, SecretRef>,
    ) -> Result<(), DriverError> {
        let Some((program, args)) = command.split_first() else {
            return Ok(());
        };

        let config = serde_json::to_string(&resource.config)
            .map_err(|e| DriverError::HookSpawn {
                resource: resource.name.clone(),
                message: format!("failed to serialize config: {}", e),
            })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("HARBOR_ACTION", action)
            .env("HARBOR_RESOURCE_NAME", &resource.name)
            .env("HARBOR_RESOURCE_KIND", resource.kind.name())
            .env("HARBOR_RESOURCE_CONFIG", config)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (env, reference) in secret_refs {
            cmd.env(format!("HARBOR_SECRET_{}", env), reference.to_string());
        }

        debug!(resource = %resource.name, action, program = %program, "Running hook");

        let output = cmd.output().await.map_err(|e| DriverError::HookSpawn {
            resource: resource.name.clone(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(DriverError::HookFailed {
                resource: resource.name.clone(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ResourceDriver for LocalStateDriver {
    async fn observe(&self, resource: &Resource) -> Result<Option<LiveState>, DriverError> {
        Ok(self.state.lock().await.get(&resource.name).cloned())
    }

    async fn apply(&self, request: &ApplyRequest) -> Result<(), DriverError> {
        let resource = &request.resource;
        self.run_hook("apply", &resource.hooks.apply, resource, &request.secret_refs)
            .await?;

        let mut state = self.state.lock().await;
        let previous = state.insert(
            resource.name.clone(),
            LiveState {
                kind: resource.kind,
                fingerprint: request.fingerprint.clone(),
                secret_refs: request.secret_refs.clone(),
                applied_at: Utc::now(),
            },
        );

        if let Err(e) = self.save(&state).await {
            match previous {
                Some(previous) => state.insert(resource.name.clone(), previous),
                None => state.remove(&resource.name),
            };
            return Err(e);
        }

        info!(resource = %resource.name, kind = %resource.kind, "Recorded applied state");
        Ok(())
    }

    async fn destroy(&self, resource: &Resource) -> Result<(), DriverError> {
        let secret_refs = self
            .state
            .lock()
            .await
            .get(&resource.name)
            .map(|live| live.secret_refs.clone())
            .unwrap_or_default();

        self.run_hook("destroy", &resource.hooks.destroy, resource, &secret_refs)
            .await?;

        let mut state = self.state.lock().await;
        if let Some(previous) = state.remove(&resource.name) {
            if let Err(e) = self.save(&state).await {
                state.insert(resource.name.clone(), previous);
                return Err(e);
            }
        }

        info!(resource = %resource.name, "Removed resource state");
        Ok(())
    }
}
