//! Centralized error types for harbor
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use thiserror::Error;
use uuid::Uuid;

use harbor_provision::{DefinitionError, GraphError, ProvisionError, SecretError};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse config {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Invalid configuration:\n  {}", problems.join("\n  "))]
    Invalid { problems: Vec<String> },
}

/// Container registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry token not found. Set GHCR_TOKEN or authenticate with `gh auth login`")]
    TokenNotFound,

    #[error("Push failed after {attempts} attempts: {message}")]
    PushFailed { attempts: u32, message: String },

    #[error("Registry lookup failed for {reference}: {message}")]
    Lookup { reference: String, message: String },
}

/// A failed image build, with the captured build output
#[derive(Error, Debug)]
#[error("Image build exited with {exit_code:?}")]
pub struct BuildError {
    pub exit_code: Option<i32>,
    pub logs: String,
}

/// Image Publisher errors.
///
/// `Build` and `Push` are kept apart because recovery differs: a failed
/// build is rebuilt, a failed push is re-pushed.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Build failed for {service}@{revision}")]
    Build {
        service: String,
        revision: String,
        logs: String,
    },

    #[error("Push failed for {service}@{revision} after {attempts} attempts: {message}")]
    Push {
        service: String,
        revision: String,
        attempts: u32,
        message: String,
    },

    #[error("Registry error for {service}@{revision}: {source}")]
    Registry {
        service: String,
        revision: String,
        #[source]
        source: RegistryError,
    },
}

/// Migration task errors raised by an executor
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Failed to launch migration task {task}: {message}")]
    Launch { task: String, message: String },

    #[error("Lost track of migration task {task}: {message}")]
    Monitor { task: String, message: String },

    #[error("Failed to clean up migration task {task}: {message}")]
    Cleanup { task: String, message: String },
}

/// Compute platform control API errors
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Deployment {name} not found in namespace {namespace}")]
    DeploymentNotFound { name: String, namespace: String },

    #[error("Kubernetes API error: {message}")]
    Api { message: String },
}

/// Why a single service did not reach a healthy revision.
///
/// Recorded per service; never stops sibling services.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceFailure {
    #[error("deploy failed: {cause}")]
    DeployFailure { cause: String },

    #[error("health check timed out after {waited_secs}s ({healthy}/{desired} healthy)")]
    HealthTimeout {
        healthy: u32,
        desired: u32,
        waited_secs: u64,
    },

    #[error("health check failed: {cause}")]
    HealthCheckFailed { cause: String },

    #[error("not deployed: {reason}")]
    NotDeployed { reason: String },
}

/// Release state machine violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Release cannot move from {from} to {to}: {reason}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// Release store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Release store I/O error at {path}: {message}")]
    Io { path: String, message: String },

    #[error("Corrupt release record {path}: {message}")]
    Corrupt { path: String, message: String },
}

/// Release orchestration errors that reject a request before any stage runs
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("No services given for the release")]
    NoServices,

    #[error("Unknown service: {name}")]
    UnknownService { name: String },

    #[error("Invalid revision {revision:?}: {reason}")]
    InvalidRevision { revision: String, reason: String },

    #[error("Release {release_id} is still in progress for {}", services.join(", "))]
    Conflict {
        release_id: Uuid,
        services: Vec<String>,
    },

    #[error("Release not found: {id}")]
    NotFound { id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// True if an error chain describes an invalid invocation (exit code 2)
/// rather than a stage or runtime failure (exit code 1).
pub fn is_invalid_invocation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if cause.downcast_ref::<ConfigError>().is_some()
            || cause.downcast_ref::<GraphError>().is_some()
            || cause.downcast_ref::<DefinitionError>().is_some()
        {
            return true;
        }
        if let Some(e) = cause.downcast_ref::<OrchestratorError>() {
            return !matches!(e, OrchestratorError::Store(_));
        }
        if let Some(e) = cause.downcast_ref::<ProvisionError>() {
            return matches!(e, ProvisionError::Graph(_));
        }
        if let Some(e) = cause.downcast_ref::<SecretError>() {
            return matches!(
                e,
                SecretError::InvalidName { .. } | SecretError::InvalidReference { .. }
            );
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::TokenNotFound;
        assert!(err.to_string().contains("GHCR_TOKEN"));
    }

    #[test]
    fn test_service_failure_display() {
        let err = ServiceFailure::HealthTimeout {
            healthy: 0,
            desired: 1,
            waited_secs: 600,
        };
        assert_eq!(
            err.to_string(),
            "health check timed out after 600s (0/1 healthy)"
        );
    }

    #[test]
    fn test_invalid_invocation_classification() {
        let cycle: anyhow::Error = ProvisionError::Graph(GraphError::Cycle {
            resource: "a".into(),
            dependency: "b".into(),
            path: vec!["a".into(), "b".into(), "a".into()],
        })
        .into();
        assert!(is_invalid_invocation(&cycle));

        let unknown = Err::<(), _>(OrchestratorError::UnknownService {
            name: "cache".into(),
        })
        .context("Failed to start release")
        .unwrap_err();
        assert!(is_invalid_invocation(&unknown));

        let failure: anyhow::Error = ProvisionError::Failure {
            resource: "database".into(),
            cause: "quota".into(),
        }
        .into();
        assert!(!is_invalid_invocation(&failure));

        let store: anyhow::Error = OrchestratorError::Store(StoreError::Io {
            path: ".harbor".into(),
            message: "disk full".into(),
        })
        .into();
        assert!(!is_invalid_invocation(&store));

        let stage = anyhow::anyhow!("Release failed at migrate");
        assert!(!is_invalid_invocation(&stage));
    }
}
