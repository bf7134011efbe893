//! Per-service release configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::parse_duration;
use crate::error::ConfigError;

/// A deployable service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name (e.g., "api", "web")
    pub name: String,

    /// Image repository (default: "{registry.base}/{name}")
    #[serde(default)]
    pub repository: Option<String>,

    /// Docker build context (default: "{name}")
    #[serde(default)]
    pub build_context: Option<PathBuf>,

    /// Dockerfile path relative to the build context
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,

    /// Number of running tasks the platform should converge to
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,

    /// Kubernetes Deployment name (default: service name)
    #[serde(default)]
    pub deployment: Option<String>,

    /// Container inside the Deployment to update (default: service name)
    #[serde(default)]
    pub container: Option<String>,

    #[serde(default)]
    pub health: HealthConfig,
}

fn default_desired_count() -> u32 {
    1
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repository: None,
            build_context: None,
            dockerfile: None,
            desired_count: default_desired_count(),
            deployment: None,
            container: None,
            health: HealthConfig::default(),
        }
    }

    pub fn repository(&self, base: &str) -> String {
        self.repository
            .clone()
            .unwrap_or_else(|| format!("{}/{}", base.trim_end_matches('/'), self.name))
    }

    pub fn build_context(&self) -> PathBuf {
        self.build_context
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.name))
    }

    /// Dockerfile joined onto the build context
    pub fn dockerfile(&self) -> Option<PathBuf> {
        self.dockerfile
            .as_ref()
            .map(|dockerfile| self.build_context().join(dockerfile))
    }

    pub fn deployment(&self) -> &str {
        self.deployment.as_deref().unwrap_or(&self.name)
    }

    pub fn container(&self) -> &str {
        self.container.as_deref().unwrap_or(&self.name)
    }
}

/// Health verification budget for one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Wall-clock ceiling for reaching the desired healthy count (default: 10m)
    #[serde(default = "default_health_timeout")]
    pub timeout: String,

    /// Fixed polling interval (default: 5s)
    #[serde(default = "default_health_interval")]
    pub interval: String,

    /// Consecutive platform errors tolerated before giving up (default: 3)
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
}

fn default_health_timeout() -> String {
    "10m".to_string()
}

fn default_health_interval() -> String {
    "5s".to_string()
}

fn default_max_errors() -> u32 {
    3
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout: default_health_timeout(),
            interval: default_health_interval(),
            max_errors: default_max_errors(),
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("health.timeout", &self.timeout)
    }

    pub fn interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("health.interval", &self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_service_name() {
        let service = ServiceConfig::new("api");
        assert_eq!(service.repository("ghcr.io/org/shop/"), "ghcr.io/org/shop/api");
        assert_eq!(service.build_context(), PathBuf::from("api"));
        assert_eq!(service.deployment(), "api");
        assert_eq!(service.container(), "api");
        assert_eq!(service.health.timeout().unwrap(), Duration::from_secs(600));
        assert_eq!(service.health.interval().unwrap(), Duration::from_secs(5));
        assert!(service.dockerfile().is_none());
    }

    #[test]
    fn test_dockerfile_is_relative_to_build_context() {
        let mut service = ServiceConfig::new("web");
        service.build_context = Some(PathBuf::from("apps/web"));
        service.dockerfile = Some(PathBuf::from("docker/Dockerfile.prod"));
        assert_eq!(
            service.dockerfile(),
            Some(PathBuf::from("apps/web/docker/Dockerfile.prod"))
        );
    }

    #[test]
    fn test_overrides() {
        let yaml = r#"
name: web
repository: ghcr.io/org/storefront
deployment: storefront
container: nginx
desired_count: 3
health:
  timeout: 90s
"#;
        let service: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(service.repository("ghcr.io/org/shop"), "ghcr.io/org/storefront");
        assert_eq!(service.deployment(), "storefront");
        assert_eq!(service.container(), "nginx");
        assert_eq!(service.desired_count, 3);
        assert_eq!(service.health.timeout().unwrap(), Duration::from_secs(90));
        assert_eq!(service.health.max_errors, 3);
    }
}
