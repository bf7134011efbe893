//! Image publisher - builds and pushes immutable artifacts
//!
//! An artifact is addressed by `{repository}:{revision_id}`. Before building,
//! the registry is asked whether that tag already exists; if it does the
//! existing artifact is returned as-is, so publishing is idempotent and a
//! release for a prior revision never rebuilds anything.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::domain::{Artifact, ImageRef};
use crate::error::{BuildError, PublishError, RegistryError};

/// What to build for one service
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub repository: String,
    pub context_dir: PathBuf,
    pub dockerfile: Option<PathBuf>,
}

/// Builds a local image tagged as `image`
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, context: &BuildContext, image: &ImageRef) -> Result<(), BuildError>;
}

/// Versioned image registry
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Digest of `image` if it has been published
    async fn lookup(&self, image: &ImageRef) -> Result<Option<String>, RegistryError>;

    /// Push the locally built `image`, returning its digest
    async fn push(&self, image: &ImageRef) -> Result<String, RegistryError>;
}

/// Publishes one artifact per `(service, revision)`
#[derive(Clone)]
pub struct ImagePublisher {
    builder: Arc<dyn ImageBuilder>,
    registry: Arc<dyn ArtifactRegistry>,
}

impl ImagePublisher {
    pub fn new(builder: Arc<dyn ImageBuilder>, registry: Arc<dyn ArtifactRegistry>) -> Self {
        Self { builder, registry }
    }

    pub async fn publish(
        &self,
        service: &str,
        revision_id: &str,
        context: &BuildContext,
    ) -> Result<Artifact, PublishError> {
        let image = ImageRef::new(&context.repository, revision_id);
        let registry_error = |source: RegistryError| PublishError::Registry {
            service: service.to_string(),
            revision: revision_id.to_string(),
            source,
        };

        if let Some(digest) = self.registry.lookup(&image).await.map_err(registry_error)? {
            info!(service, image = %image, "Artifact already published, skipping build");
            return Ok(Artifact {
                service: service.to_string(),
                revision_id: revision_id.to_string(),
                image,
                digest,
                published_at: Utc::now(),
                reused: true,
            });
        }

        let start = Instant::now();
        info!(service, image = %image, context = %context.context_dir.display(), "Building image");

        self.builder
            .build(context, &image)
            .await
            .map_err(|e| PublishError::Build {
                service: service.to_string(),
                revision: revision_id.to_string(),
                logs: e.logs,
            })?;

        info!(
            service,
            "Build completed in {:.1}s, pushing",
            start.elapsed().as_secs_f64()
        );

        let digest = self.registry.push(&image).await.map_err(|e| match e {
            RegistryError::PushFailed { attempts, message } => PublishError::Push {
                service: service.to_string(),
                revision: revision_id.to_string(),
                attempts,
                message,
            },
            other => registry_error(other),
        })?;

        info!(service, image = %image, digest = %digest, "Published artifact");

        Ok(Artifact {
            service: service.to_string(),
            revision_id: revision_id.to_string(),
            image,
            digest,
            published_at: Utc::now(),
            reused: false,
        })
    }
}
