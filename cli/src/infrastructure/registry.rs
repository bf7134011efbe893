//! Container registry operations
//!
//! Looks up and pushes images with skopeo. Images are built into the
//! local docker daemon and copied from there to the registry.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::ImageRef;
use crate::error::RegistryError;
use crate::services::publisher::ArtifactRegistry;
use crate::tools::{get_tool_path, names};

/// Registry credentials for authentication
#[derive(Clone)]
pub struct RegistryCredentials {
    pub organization: String,
    pub token: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("organization", &self.organization)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl RegistryCredentials {
    pub fn new(organization: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            token: token.into(),
        }
    }

    /// Discover a registry token
    ///
    /// Priority:
    /// 1. Provided token parameter
    /// 2. GHCR_TOKEN environment variable
    /// 3. GITHUB_TOKEN environment variable
    /// 4. gh CLI auth token
    pub fn discover_token(token: Option<String>) -> Result<String, RegistryError> {
        token
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("GHCR_TOKEN").ok().filter(|t| !t.is_empty()))
            .or_else(|| std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()))
            .or_else(Self::try_gh_cli_token)
            .ok_or(RegistryError::TokenNotFound)
    }

    fn try_gh_cli_token() -> Option<String> {
        std::process::Command::new(get_tool_path(names::GH))
            .args(["auth", "token"])
            .output()
            .ok()
            .and_then(|o| {
                if o.status.success() {
                    String::from_utf8(o.stdout)
                        .ok()
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                } else {
                    None
                }
            })
    }

    fn as_arg(&self) -> String {
        format!("{}:{}", self.organization, self.token)
    }
}

/// Registry adapter backed by skopeo
pub struct SkopeoRegistry {
    credentials: RegistryCredentials,
    retries: u32,
    retry_pause: Duration,
    binary: String,
}

impl SkopeoRegistry {
    pub fn new(credentials: RegistryCredentials) -> Self {
        Self {
            credentials,
            retries: 3,
            retry_pause: Duration::from_secs(2),
            binary: get_tool_path(names::SKOPEO),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Digest of a published image via `skopeo inspect`
    async fn inspect(&self, image: &ImageRef) -> Result<Option<String>, RegistryError> {
        let output = Command::new(&self.binary)
            .args([
                "inspect",
                &format!("--creds={}", self.credentials.as_arg()),
                "--format",
                "{{.Digest}}",
                &format!("docker://{}", image),
            ])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RegistryError::Lookup {
                reference: image.to_string(),
                message: format!("failed to run skopeo: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_manifest(&stderr) {
                return Ok(None);
            }
            return Err(RegistryError::Lookup {
                reference: image.to_string(),
                message: format!("skopeo inspect exited with {:?}: {}", output.status.code(), stderr.trim()),
            });
        }

        let digest = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if digest.is_empty() {
            return Err(RegistryError::Lookup {
                reference: image.to_string(),
                message: "empty digest".to_string(),
            });
        }
        Ok(Some(digest))
    }
}

/// skopeo reports an absent tag in a handful of registry-specific ways
fn is_missing_manifest(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("manifest unknown")
        || stderr.contains("not found")
        || stderr.contains("name_unknown")
}

#[async_trait]
impl ArtifactRegistry for SkopeoRegistry {
    async fn lookup(&self, image: &ImageRef) -> Result<Option<String>, RegistryError> {
        self.inspect(image).await
    }

    async fn push(&self, image: &ImageRef) -> Result<String, RegistryError> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let result = Command::new(&self.binary)
                .args([
                    "copy",
                    "--insecure-policy",
                    &format!("--dest-creds={}", self.credentials.as_arg()),
                    &format!("docker-daemon:{}", image),
                    &format!("docker://{}", image),
                ])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
                .await;

            let message = match result {
                Ok(output) if output.status.success() => break,
                Ok(output) => format!(
                    "exit code {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => e.to_string(),
            };

            if attempts >= self.retries {
                return Err(RegistryError::PushFailed { attempts, message });
            }

            warn!(image = %image, "Push attempt {} failed, retrying...", attempts);
            tokio::time::sleep(self.retry_pause).await;
        }

        debug!(image = %image, attempts, "Pushed image");

        self.inspect(image).await?.ok_or_else(|| RegistryError::Lookup {
            reference: image.to_string(),
            message: "image not visible after push".to_string(),
        })
    }
}
