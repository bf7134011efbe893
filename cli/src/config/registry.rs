//! Container registry configuration

use serde::{Deserialize, Serialize};

/// Where published images live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Repository prefix (e.g., "ghcr.io/myorg/shop"); each service pushes to
    /// `{base}/{service}` unless it overrides `repository`
    pub base: String,

    /// Organization used as the registry username (default: second path
    /// segment of `base`)
    #[serde(default)]
    pub organization: Option<String>,

    /// Push attempts before giving up (default: 3, range: 1-10)
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_retries() -> u32 {
    3
}

impl RegistryConfig {
    /// Registry username: explicit organization or the one embedded in `base`
    pub fn organization(&self) -> Option<String> {
        self.organization
            .clone()
            .or_else(|| extract_organization(&self.base))
    }

    pub(crate) fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.base.trim().is_empty() {
            problems.push("registry.base cannot be empty".to_string());
        } else if self.organization().is_none() {
            problems.push(format!(
                "registry.base '{}' has no organization segment (expected host/organization/...); set registry.organization",
                self.base
            ));
        }

        if !(1..=10).contains(&self.retries) {
            problems.push(format!(
                "registry.retries must be between 1 and 10, got: {}",
                self.retries
            ));
        }

        problems
    }
}

/// Organization from a repository path
///
/// Example: "ghcr.io/org/project/service" -> "org"
pub fn extract_organization(registry: &str) -> Option<String> {
    registry
        .split('/')
        .nth(1)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_organization() {
        assert_eq!(
            extract_organization("ghcr.io/myorg/shop/api").as_deref(),
            Some("myorg")
        );
        assert!(extract_organization("localhost").is_none());
        assert!(extract_organization("ghcr.io/").is_none());
    }

    #[test]
    fn test_explicit_organization_wins() {
        let config = RegistryConfig {
            base: "registry.example.com/team/shop".to_string(),
            organization: Some("robot".to_string()),
            retries: 3,
        };
        assert_eq!(config.organization().as_deref(), Some("robot"));
        assert!(config.problems().is_empty());
    }

    #[test]
    fn test_problems() {
        let config = RegistryConfig {
            base: "localhost".to_string(),
            organization: None,
            retries: 0,
        };
        let problems = config.problems();
        assert_eq!(problems.len(), 2);
    }
}
