//! # Deployment Configuration
//!
//! A single `harbor.yaml` describes the registry, the deployable services,
//! the optional migration task and where harbor keeps its local state:
//!
//! ```yaml
//! name: shop
//! namespace: shop-production
//! registry:
//!   base: ghcr.io/myorg/shop
//! services:
//!   - name: api
//!     build_context: api
//!   - name: web
//!     build_context: web
//!     health:
//!       timeout: 5m
//! migration:
//!   service: api
//!   command: ["bin/rails", "db:migrate"]
//!   database_secret: shop/database-url
//! ```
//!
//! Relative paths are resolved against the directory of the config file.

mod migration;
mod registry;
mod service;

pub use migration::MigrationConfig;
pub use registry::RegistryConfig;
pub use service::ServiceConfig;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use harbor_provision::validation::{validate_env_name, validate_resource_name};
use harbor_provision::SecretSelector;

use crate::error::ConfigError;

/// Top-level harbor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Application name, used in headers and task names
    pub name: String,

    /// Local state directory (default: ".harbor")
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Resource definitions file (default: "infra/resources.yaml")
    #[serde(default = "default_resources")]
    pub resources: PathBuf,

    /// Kubernetes namespace for services and migration tasks
    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub registry: RegistryConfig,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    #[serde(default)]
    pub migration: Option<MigrationConfig>,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".harbor")
}

fn default_resources() -> PathBuf {
    PathBuf::from("infra/resources.yaml")
}

fn default_namespace() -> String {
    "default".to_string()
}

impl DeployConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let mut config = Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::ParseError { message, .. } => ConfigError::ParseError {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;

        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        config.validate()?;
        Ok(config)
    }

    /// Parse a config from YAML without validating it
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Check every field, reporting all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("name cannot be empty".to_string());
        }
        if self.namespace.trim().is_empty() {
            problems.push("namespace cannot be empty".to_string());
        }

        problems.extend(self.registry.problems());

        let mut seen = HashSet::new();
        for service in &self.services {
            if let Err(e) = validate_resource_name(&service.name, "service name") {
                problems.push(e.to_string());
            }
            if !seen.insert(service.name.as_str()) {
                problems.push(format!("service {} is declared more than once", service.name));
            }
            if service.desired_count == 0 {
                problems.push(format!("service {}: desired_count must be at least 1", service.name));
            }
            if let Err(e) = service.health.timeout() {
                problems.push(format!("service {}: {}", service.name, e));
            }
            match service.health.interval() {
                Ok(interval) if interval.is_zero() => {
                    problems.push(format!("service {}: health.interval must be positive", service.name))
                }
                Ok(_) => {}
                Err(e) => problems.push(format!("service {}: {}", service.name, e)),
            }
        }

        if let Some(migration) = &self.migration {
            if !seen.contains(migration.service.as_str()) {
                problems.push(format!(
                    "migration.service '{}' is not a configured service",
                    migration.service
                ));
            }
            if migration.command.is_empty() {
                problems.push("migration.command cannot be empty".to_string());
            }
            if let Err(e) = SecretSelector::parse(&migration.database_secret) {
                problems.push(format!("migration.database_secret: {}", e));
            }
            if let Err(e) = validate_env_name(&migration.env_var, "migration.env_var") {
                problems.push(e.to_string());
            }
            if let Err(e) = migration.timeout() {
                problems.push(e.to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Resolve a configured path against the config file's directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve(&self.state_dir)
    }

    pub fn resources_path(&self) -> PathBuf {
        self.resolve(&self.resources)
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.state_dir().join("secrets.json")
    }

    pub fn provision_state_path(&self) -> PathBuf {
        self.state_dir().join("provision-state.json")
    }
}

pub(crate) fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        value: format!("{} ({})", value, e),
    })
}
