//! Typed errors for resource graphs, provisioning and secrets
//!
//! Uses thiserror so callers can match on the failure kind, while staying
//! compatible with anyhow for propagation in command handlers.

use thiserror::Error;

use crate::graph::ResourceState;

/// Resource graph errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Dependency cycle: declaring {resource} -> {dependency} would close the cycle {}", path.join(" -> "))]
    Cycle {
        resource: String,
        dependency: String,
        path: Vec<String>,
    },

    #[error("Resource not found: {name}")]
    NotFound { name: String },

    #[error("Resource already declared: {name}")]
    Duplicate { name: String },

    #[error("Resource {resource} depends on undeclared resource {dependency}")]
    UnknownDependency { resource: String, dependency: String },

    #[error("Resource {resource} cannot move from {from} to {to}{}", reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default())]
    InvalidTransition {
        resource: String,
        from: ResourceState,
        to: ResourceState,
        reason: Option<String>,
    },
}

/// Errors raised by a resource driver while touching live infrastructure
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Hook for {resource} exited with {exit_code:?}: {stderr}")]
    HookFailed {
        resource: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to run hook for {resource}: {message}")]
    HookSpawn { resource: String, message: String },

    #[error("State storage error: {0}")]
    State(String),
}

/// Secret registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Secret not found: {name}{}", version.map(|v| format!("@v{}", v)).unwrap_or_default())]
    NotFound { name: String, version: Option<u32> },

    #[error("Invalid secret name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid secret reference {reference:?}. Expected: name or name@vN")]
    InvalidReference { reference: String },

    #[error("Secret storage error: {0}")]
    Storage(String),
}

/// Provisioning errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Provisioning failed at {resource}: {cause}")]
    Failure { resource: String, cause: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// Resource definition loading errors
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Failed to read resource definitions {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse resource definitions {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid resource definitions:\n  {}", problems.join("\n  "))]
    Invalid { problems: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_display() {
        let err = GraphError::Cycle {
            resource: "network".to_string(),
            dependency: "api".to_string(),
            path: vec!["api".into(), "database".into(), "network".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("api -> database -> network"));
    }

    #[test]
    fn test_secret_not_found_display() {
        let err = SecretError::NotFound {
            name: "app/db".to_string(),
            version: Some(2),
        };
        assert_eq!(err.to_string(), "Secret not found: app/db@v2");
    }

    #[test]
    fn test_error_conversion() {
        let graph_err = GraphError::NotFound {
            name: "api".to_string(),
        };
        let err: ProvisionError = graph_err.into();
        assert!(matches!(err, ProvisionError::Graph(_)));
    }
}
